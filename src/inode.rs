use super::*;
use error::FsError;
use fs::{codec, padded, SuperBlock};

use bincode::Options;
use serde::{Deserialize, Serialize};

/// an unused direct block slot
pub const EMPTY: u32 = 0;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileKind {
    #[default]
    File = 0,
    Directory = 1,
}

impl TryFrom<u32> for FileKind {
    type Error = FsError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(FileKind::File),
            1 => Ok(FileKind::Directory),
            _ => Err(FsError::Corrupt {
                what: "inode",
                why: format!("unknown file type {code}"),
            }),
        }
    }
}

/// inode record header on disk, followed by the direct block list
#[derive(Serialize, Deserialize)]
struct DInodeHeader {
    data_blocks_used: u32,
    size: u32,
    kind: u32,
}

/// Per-file metadata with a fixed array of direct data blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    /// Inode number, given by position and not stored on disk
    ino: u32,
    kind: FileKind,
    /// Size of file (bytes)
    size: u32,
    /// Data block addresses, `EMPTY` past the last used one
    data_blocks: Vec<u32>,
}

impl Inode {
    pub fn new(sb: &SuperBlock, ino: u32, kind: FileKind) -> Self {
        Inode {
            ino,
            kind,
            size: 0,
            data_blocks: vec![EMPTY; sb.data_blocks_per_inode as usize],
        }
    }

    /// Load inode `ino` out of the inode block that holds it.
    pub fn decode(sb: &SuperBlock, block: &[u8], ino: u32) -> Result<Self, FsError> {
        let offset = sb.inode_offset(ino);
        let Some(mut reader) = block.get(offset..offset + sb.inode_size()) else {
            return Err(FsError::Corrupt {
                what: "inode block",
                why: format!("{} bytes cannot hold inode {ino}", block.len()),
            });
        };
        let header: DInodeHeader = codec().deserialize_from(&mut reader)?;
        let mut data_blocks = Vec::with_capacity(sb.data_blocks_per_inode as usize);
        for _ in 0..sb.data_blocks_per_inode {
            data_blocks.push(codec().deserialize_from::<_, u32>(&mut reader)?);
        }
        let inode = Inode {
            ino,
            kind: FileKind::try_from(header.kind)?,
            size: header.size,
            data_blocks,
        };
        if inode.data_blocks_used() != header.data_blocks_used as usize {
            return Err(FsError::Corrupt {
                what: "inode",
                why: format!(
                    "inode {ino} claims {} data blocks but lists {}",
                    header.data_blocks_used,
                    inode.data_blocks_used()
                ),
            });
        }
        Ok(inode)
    }

    /// The record alone, `inode_size` bytes.
    pub fn encode(&self, sb: &SuperBlock) -> Result<Vec<u8>, FsError> {
        let header = DInodeHeader {
            data_blocks_used: self.data_blocks_used() as u32,
            size: self.size,
            kind: self.kind as u32,
        };
        let mut bytes = codec().serialize(&header)?;
        for bno in &self.data_blocks {
            codec().serialize_into(&mut bytes, bno)?;
        }
        padded(bytes, sb.inode_size(), "inode")
    }

    /// Store the record into its slot of an inode block.
    pub fn encode_into(&self, sb: &SuperBlock, block: &mut [u8]) -> Result<(), FsError> {
        let record = self.encode(sb)?;
        let offset = sb.inode_offset(self.ino);
        match block.get_mut(offset..offset + record.len()) {
            Some(slot) => {
                slot.copy_from_slice(&record);
                Ok(())
            }
            None => Err(FsError::Corrupt {
                what: "inode block",
                why: format!("{} bytes cannot hold inode {}", block.len(), self.ino),
            }),
        }
    }

    pub fn ino(&self) -> u32 {
        self.ino
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn set_size(&mut self, size: u32) {
        self.size = size;
    }

    /// # of leading non-empty direct slots
    pub fn data_blocks_used(&self) -> usize {
        self.data_blocks.iter().take_while(|&&b| b != EMPTY).count()
    }

    pub fn max_data_blocks(&self) -> usize {
        self.data_blocks.len()
    }

    /// the i-th data block, `None` if the slot is unused
    pub fn data_block(&self, i: usize) -> Option<usize> {
        match self.data_blocks.get(i) {
            Some(&b) if b != EMPTY => Some(b as usize),
            _ => None,
        }
    }

    pub fn data_blocks(&self) -> impl Iterator<Item = usize> + '_ {
        self.data_blocks
            .iter()
            .take_while(|&&b| b != EMPTY)
            .map(|&b| b as usize)
    }

    /// Append `blockno` at the first empty slot, false when every slot is used.
    pub fn add_data_block(&mut self, blockno: u32) -> bool {
        assert_ne!(blockno, EMPTY, "block 0 is never a data block");
        match self.data_blocks.iter_mut().find(|b| **b == EMPTY) {
            Some(slot) => {
                *slot = blockno;
                true
            }
            None => false,
        }
    }
}
