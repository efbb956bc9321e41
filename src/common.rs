use super::*;
use error::FsError;

use serde::{Deserialize, Serialize};

/// block size, also the size of a cache page
pub const BSIZE: usize = 4096;

/// bitmap bits per block
pub const BPB: usize = BSIZE * 8;

/// fixed block location
pub const BLK_SUPERBLOCK: usize = 0;
pub const BLK_USED_BITMAP: usize = 1;
pub const BLK_INODE_BITMAP: usize = 2;
pub const BLK_DIR_INODE: usize = 3;
pub const BLK_DIR_DATA: usize = 4;

/// # of blocks loaded and pinned by startup()
pub const NBOOTSTRAP: usize = 5;

/// first inode block; inode blocks repeat every `inode_block_ratio + 1` blocks
pub const INODE_REGION_START: usize = 3;

/// the (only) directory inode
pub const DIR_INO: u32 = 0;

/// capacity of the superblock's directory-inode list
pub const MAX_DIR_INODES: usize = 1;

/// width of the file name field in a dentry
pub const DIRSIZ: usize = 32;

/// inode number + file name
pub const DENTRY_SIZE: usize = 4 + DIRSIZ;

/// dentries per directory block
pub const NDENTRY: usize = BSIZE / DENTRY_SIZE;

/// maximum number of open files
pub const MAX_OPEN_FILE: usize = 1024;

/// byte layout implemented by the encode/decode functions
pub const LAYOUT_VERSION: u32 = 1;

/// Tunables of an image and of the running system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub inodes_per_block: u32,
    /// data blocks that follow every inode block
    pub inode_block_ratio: u32,
    pub data_blocks_per_inode: u32,
    /// share of the disk pages used as cache frames
    pub mem_percentage: u32,
    pub min_frames: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            inodes_per_block: 8,
            inode_block_ratio: 8,
            data_blocks_per_inode: 8,
            mem_percentage: 100,
            min_frames: 6,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), FsError> {
        if self.inodes_per_block == 0 || BSIZE % self.inodes_per_block as usize != 0 {
            return Err(FsError::Config(format!(
                "inodes_per_block {} does not divide the block size {BSIZE}",
                self.inodes_per_block
            )));
        }
        if self.inode_block_ratio == 0 {
            return Err(FsError::Config("inode_block_ratio must be positive".into()));
        }
        if self.data_blocks_per_inode == 0 {
            return Err(FsError::Config("data_blocks_per_inode must be positive".into()));
        }
        // header (used, size, type) + the direct block list
        let record = 4 * (3 + self.data_blocks_per_inode as usize);
        if record > BSIZE / self.inodes_per_block as usize {
            return Err(FsError::Config(format!(
                "an inode record of {record} bytes does not fit {} inodes per block",
                self.inodes_per_block
            )));
        }
        if self.mem_percentage == 0 || self.mem_percentage > 100 {
            return Err(FsError::Config(format!(
                "mem_percentage {} is not in 1..=100",
                self.mem_percentage
            )));
        }
        Ok(())
    }

    /// # of cache frames for a disk of `num_blocks` blocks
    pub fn frame_count(&self, num_blocks: usize) -> Result<usize, FsError> {
        let frames = self.mem_percentage as usize * num_blocks / 100;
        if frames < self.min_frames {
            return Err(FsError::TooFewFrames {
                frames,
                min: self.min_frames,
            });
        }
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dentry_geometry() {
        assert_eq!(36, DENTRY_SIZE);
        assert_eq!(113, NDENTRY);
        assert_eq!(32768, BPB);
    }

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn rejects_bad_ratios() {
        let config = Config {
            inodes_per_block: 3,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            inode_block_ratio: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        // 4096 / 512 = 8 bytes per inode, far too small
        let config = Config {
            inodes_per_block: 512,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn frame_count_follows_mem_percentage() {
        let config = Config {
            mem_percentage: 50,
            ..Config::default()
        };
        assert_eq!(128, config.frame_count(256).unwrap());
        assert!(matches!(
            config.frame_count(10),
            Err(FsError::TooFewFrames { frames: 5, min: 6 })
        ));
    }
}
