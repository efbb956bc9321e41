//! The single flat directory: one block of fixed-size name -> inode records.

use super::*;
use common::*;
use error::FsError;
use fs::codec;

use bincode::Options;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Serialize, Deserialize)]
struct DirEnt {
    inum: u32,
    name: [u8; DIRSIZ],
}

/// Directory entry. Inode 0 marks a free slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dentry {
    ino: u32,
    name: String,
}

impl Dentry {
    pub fn new(name: &str, ino: u32) -> Self {
        Dentry {
            ino,
            name: name.to_owned(),
        }
    }

    pub fn ino(&self) -> u32 {
        self.ino
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_free(&self) -> bool {
        self.ino == 0
    }

    /// A name that decodes back to itself: no NUL and no trailing blank.
    pub fn is_storable(name: &str) -> bool {
        !name.contains('\0') && !name.ends_with(' ')
    }

    pub fn decode(buf: &[u8]) -> Result<Self, FsError> {
        let mut reader = buf;
        let dirent: DirEnt = codec().deserialize_from(&mut reader)?;
        let name = String::from_utf8_lossy(&dirent.name);
        let name = name.trim_end_matches(['\0', ' ']);
        // a name shorter than the field is NUL terminated
        let name = name.split('\0').next().unwrap_or_default();
        Ok(Dentry {
            ino: dirent.inum,
            name: name.to_owned(),
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, FsError> {
        let bytes = self.name.as_bytes();
        if bytes.len() > DIRSIZ {
            return Err(FsError::Corrupt {
                what: "dentry",
                why: format!("name of {} bytes is wider than {DIRSIZ}", bytes.len()),
            });
        }
        let mut name = [0; DIRSIZ];
        name[..bytes.len()].copy_from_slice(bytes);
        Ok(codec().serialize(&DirEnt {
            inum: self.ino,
            name,
        })?)
    }
}

impl PartialOrd for Dentry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// dentries sort by file name
impl Ord for Dentry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(&other.name)
            .then_with(|| self.ino.cmp(&other.ino))
    }
}

/// One sector of `NDENTRY` dentry slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryBlock {
    dentries: Vec<Dentry>,
}

impl Default for DirectoryBlock {
    fn default() -> Self {
        Self {
            dentries: vec![Dentry::default(); NDENTRY],
        }
    }
}

impl DirectoryBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(block: &[u8]) -> Result<Self, FsError> {
        if block.len() != BSIZE {
            return Err(FsError::Corrupt {
                what: "directory block",
                why: format!("{} bytes instead of {BSIZE}", block.len()),
            });
        }
        let dentries = block
            .chunks_exact(DENTRY_SIZE)
            .take(NDENTRY)
            .map(Dentry::decode)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { dentries })
    }

    pub fn encode(&self) -> Result<Vec<u8>, FsError> {
        let mut block = Vec::with_capacity(BSIZE);
        for dentry in &self.dentries {
            block.extend(dentry.encode()?);
        }
        block.resize(BSIZE, 0);
        Ok(block)
    }

    /// The live entry called `name`.
    pub fn lookup_by_name(&self, name: &str) -> Option<&Dentry> {
        self.dentries
            .iter()
            .find(|d| !d.is_free() && d.name == name)
    }

    /// Take the first free slot. False if the name is taken or no slot is free.
    pub fn add_dentry(&mut self, dentry: Dentry) -> bool {
        if dentry.is_free() || self.lookup_by_name(&dentry.name).is_some() {
            return false;
        }
        match self.dentries.iter_mut().find(|d| d.is_free()) {
            Some(slot) => {
                *slot = dentry;
                true
            }
            None => false,
        }
    }

    /// Free the slot holding `name`.
    pub fn find_remove(&mut self, name: &str) -> bool {
        match self
            .dentries
            .iter_mut()
            .find(|d| !d.is_free() && d.name == name)
        {
            Some(slot) => {
                *slot = Dentry::default();
                true
            }
            None => false,
        }
    }

    pub fn is_available(&self) -> bool {
        self.dentries.iter().any(Dentry::is_free)
    }

    /// every slot, free ones included
    pub fn dentries(&self) -> &[Dentry] {
        &self.dentries
    }

    /// live entries sorted by name
    pub fn live(&self) -> Vec<Dentry> {
        let mut live: Vec<Dentry> = self
            .dentries
            .iter()
            .filter(|d| !d.is_free())
            .cloned()
            .collect();
        live.sort();
        live
    }
}
