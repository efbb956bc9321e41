//! Superblock and the fixed-width record codec shared by every on-disk
//! structure: 32-bit big-endian integers, fields in declaration order.

use super::*;
use common::*;
use error::FsError;

use bincode::Options;
use serde::{Deserialize, Serialize};

pub(crate) fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_big_endian()
        .allow_trailing_bytes()
}

/// Pad a record out to `len` bytes.
pub(crate) fn padded(mut bytes: Vec<u8>, len: usize, what: &'static str) -> Result<Vec<u8>, FsError> {
    if bytes.len() > len {
        return Err(FsError::Corrupt {
            what,
            why: format!("record of {} bytes overflows {len}", bytes.len()),
        });
    }
    bytes.resize(len, 0);
    Ok(bytes)
}

/// an unused slot of the directory-inode list
const NO_DIR_INODE: u32 = u32::MAX;

#[derive(Serialize, Deserialize)]
struct SuperBlockHeader {
    inodes_per_block: u32,
    inode_block_ratio: u32,
    dir_inodes_used: u32,
    num_blocks: u32,
    data_blocks_per_inode: u32,
}

/// Filesystem-wide geometry. Every layout calculation derives from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperBlock {
    pub inodes_per_block: u32,
    /// data blocks that follow each inode block
    pub inode_block_ratio: u32,
    pub data_blocks_per_inode: u32,
    /// size of file system image (blocks)
    pub num_blocks: u32,
    pub dir_inodes: [Option<u32>; MAX_DIR_INODES],
    pub dir_inodes_used: u32,
}

impl SuperBlock {
    /// Geometry for a fresh image. Slot 0 of the directory list is inode 0.
    pub fn new(num_blocks: u32, config: &Config) -> Self {
        let mut dir_inodes = [None; MAX_DIR_INODES];
        dir_inodes[0] = Some(DIR_INO);
        SuperBlock {
            inodes_per_block: config.inodes_per_block,
            inode_block_ratio: config.inode_block_ratio,
            data_blocks_per_inode: config.data_blocks_per_inode,
            num_blocks,
            dir_inodes,
            dir_inodes_used: 1,
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Self, FsError> {
        if buf.len() != BSIZE {
            return Err(FsError::Corrupt {
                what: "superblock",
                why: format!("{} bytes instead of {BSIZE}", buf.len()),
            });
        }
        let mut reader = buf;
        let header: SuperBlockHeader = codec().deserialize_from(&mut reader)?;
        let mut dir_inodes = [None; MAX_DIR_INODES];
        for slot in dir_inodes.iter_mut() {
            let ino: u32 = codec().deserialize_from(&mut reader)?;
            *slot = (ino != NO_DIR_INODE).then_some(ino);
        }
        // images written before the field existed carry zero here
        let version: u32 = codec().deserialize_from(&mut reader)?;
        if version != 0 && version != LAYOUT_VERSION {
            return Err(FsError::Corrupt {
                what: "superblock",
                why: format!("layout version {version}, expected {LAYOUT_VERSION}"),
            });
        }
        let sb = SuperBlock {
            inodes_per_block: header.inodes_per_block,
            inode_block_ratio: header.inode_block_ratio,
            data_blocks_per_inode: header.data_blocks_per_inode,
            num_blocks: header.num_blocks,
            dir_inodes,
            dir_inodes_used: header.dir_inodes_used,
        };
        sb.check()?;
        Ok(sb)
    }

    pub fn encode(&self) -> Result<Vec<u8>, FsError> {
        let header = SuperBlockHeader {
            inodes_per_block: self.inodes_per_block,
            inode_block_ratio: self.inode_block_ratio,
            dir_inodes_used: self.dir_inodes_used,
            num_blocks: self.num_blocks,
            data_blocks_per_inode: self.data_blocks_per_inode,
        };
        let mut bytes = codec().serialize(&header)?;
        for ino in self.dir_inodes {
            codec().serialize_into(&mut bytes, &ino.unwrap_or(NO_DIR_INODE))?;
        }
        codec().serialize_into(&mut bytes, &LAYOUT_VERSION)?;
        padded(bytes, BSIZE, "superblock")
    }

    fn check(&self) -> Result<(), FsError> {
        let config = Config {
            inodes_per_block: self.inodes_per_block,
            inode_block_ratio: self.inode_block_ratio,
            data_blocks_per_inode: self.data_blocks_per_inode,
            ..Config::default()
        };
        config.validate().map_err(|err| FsError::Corrupt {
            what: "superblock",
            why: err.to_string(),
        })
    }

    /// size of one inode record
    pub fn inode_size(&self) -> usize {
        BSIZE / self.inodes_per_block as usize
    }

    pub fn max_file_size(&self) -> usize {
        self.data_blocks_per_inode as usize * BSIZE
    }

    /// block that holds inode `ino`
    pub fn iblock(&self, ino: u32) -> usize {
        INODE_REGION_START
            + (self.inode_block_ratio as usize + 1) * (ino / self.inodes_per_block) as usize
    }

    /// byte offset of inode `ino` inside its block
    pub fn inode_offset(&self, ino: u32) -> usize {
        (ino % self.inodes_per_block) as usize * self.inode_size()
    }

    pub fn is_inode_block(&self, blockno: usize) -> bool {
        blockno >= INODE_REGION_START
            && (blockno - INODE_REGION_START) % (self.inode_block_ratio as usize + 1) == 0
    }

    /// # of inodes whose block lies on the disk, capped by the inode bitmap
    pub fn max_inodes(&self) -> usize {
        let num_blocks = self.num_blocks as usize;
        if num_blocks <= INODE_REGION_START {
            return 0;
        }
        let stride = self.inode_block_ratio as usize + 1;
        let inode_blocks = (num_blocks - INODE_REGION_START).div_ceil(stride);
        (inode_blocks * self.inodes_per_block as usize).min(BPB)
    }

    pub fn dir_inode(&self, i: usize) -> Option<u32> {
        self.dir_inodes.get(i).copied().flatten()
    }

    /// Record another directory inode, false when the list is full.
    pub fn add_dir_inode(&mut self, ino: u32) -> bool {
        match self.dir_inodes.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(ino);
                self.dir_inodes_used += 1;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sb() -> SuperBlock {
        SuperBlock::new(256, &Config::default())
    }

    #[test]
    fn round_trip() {
        let sb = sb();
        let bytes = sb.encode().unwrap();
        assert_eq!(BSIZE, bytes.len());
        assert_eq!(sb, SuperBlock::decode(&bytes).unwrap());
    }

    #[test]
    fn big_endian_field_order() {
        let bytes = sb().encode().unwrap();
        assert_eq!(&[0, 0, 0, 8], &bytes[0..4]); // inodes per block
        assert_eq!(&[0, 0, 0, 8], &bytes[4..8]); // inode block ratio
        assert_eq!(&[0, 0, 0, 1], &bytes[8..12]); // dir inodes used
        assert_eq!(&[0, 0, 1, 0], &bytes[12..16]); // num blocks
        assert_eq!(&[0, 0, 0, 8], &bytes[16..20]); // data blocks per inode
        assert_eq!(&[0, 0, 0, 0], &bytes[20..24]); // dir inode 0
        assert_eq!(&[0, 0, 0, 1], &bytes[24..28]); // layout version
    }

    #[test]
    fn layout_version_is_checked() {
        let mut bytes = sb().encode().unwrap();
        bytes[24..28].copy_from_slice(&[0, 0, 0, 7]);
        let err = SuperBlock::decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("layout version 7"));

        bytes[24..28].copy_from_slice(&[0, 0, 0, 0]);
        assert_eq!(sb(), SuperBlock::decode(&bytes).unwrap());
    }

    #[test]
    fn layout_arithmetic() {
        let sb = sb();
        assert_eq!(512, sb.inode_size());
        assert_eq!(8 * BSIZE, sb.max_file_size());
        assert_eq!(3, sb.iblock(0));
        assert_eq!(3, sb.iblock(7));
        assert_eq!(12, sb.iblock(8));
        assert_eq!(21, sb.iblock(17));
        assert_eq!(512 * 3, sb.inode_offset(11));
        assert!(sb.is_inode_block(12));
        assert!(!sb.is_inode_block(13));
        // inode blocks 3, 12, ..., 255 -> 29 blocks
        assert_eq!(29 * 8, sb.max_inodes());
    }

    #[test]
    fn directory_list_is_fixed_capacity() {
        let mut sb = sb();
        assert_eq!(Some(0), sb.dir_inode(0));
        assert!(!sb.add_dir_inode(5));
        assert_eq!(1, sb.dir_inodes_used);
    }

    #[test]
    fn decode_rejects_garbage() {
        let mut bytes = sb().encode().unwrap();
        bytes[0..4].copy_from_slice(&[0, 0, 0, 0]);
        assert!(SuperBlock::decode(&bytes).is_err());
        assert!(SuperBlock::decode(&bytes[..100]).is_err());
    }
}
