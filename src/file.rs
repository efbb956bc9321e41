use super::*;
use inode::Inode;
use process::Pid;

use enumflags2::{bitflags, BitFlags};

#[allow(clippy::upper_case_acronyms)]
#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFlag {
    WRONLY = 0x0000_0001,
    RDWR = 0x0000_0002,
    RDONLY = 0x0000_0004,
    APPEND = 0x0000_2000,
}

pub type OpenFlags = BitFlags<OpenFlag>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// from the beginning of the file
    Set,
    /// from the current position
    Cur,
    /// back from the end of the file
    End,
}

impl TryFrom<i32> for Whence {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Whence::Set),
            1 => Ok(Whence::Cur),
            2 => Ok(Whence::End),
            _ => Err(value),
        }
    }
}

/// An entry of the open-file table.
#[derive(Debug, Clone)]
pub struct OpenFile {
    pub fd: usize,
    pub flags: OpenFlags,
    /// byte offset
    pub pos: u32,
    pub file_name: String,
    pub pid: Pid,
    pub inode: Inode,
}

impl OpenFile {
    pub fn new(fd: usize, flags: OpenFlags, file_name: &str, inode: Inode, pid: Pid) -> Self {
        OpenFile {
            fd,
            flags,
            pos: 0,
            file_name: file_name.to_owned(),
            pid,
            inode,
        }
    }

    /// Opened for reading only, no write mode requested.
    pub fn is_read_only(&self) -> bool {
        self.flags.contains(OpenFlag::RDONLY)
            && !self.flags.intersects(OpenFlag::WRONLY | OpenFlag::RDWR)
    }

    pub fn is_append(&self) -> bool {
        self.flags.contains(OpenFlag::APPEND)
    }
}
