//! Disk layout:
//! [ super block | used block bitmap | inode bitmap | inode block 0 | directory data |
//!   data blocks(ratio - 1) | inode block 1 | data blocks(ratio) | inode block 2 | ... ]
//!
//! The directory inode is inode 0, the first record of block 3, and the
//! directory data block (block 4) is its only data block.

use super::*;
use bitmap::BitmapBlock;
use blk_dev::{BlockDevice, FileDisk};
use common::*;
use dir::DirectoryBlock;
use error::{DeviceError, FsError};
use fs::SuperBlock;
use inode::{FileKind, Inode};
use stat::Stats;

use log::info;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

/// Write an empty file system onto `blk_dev`.
pub fn mkfs(blk_dev: &dyn BlockDevice, config: &Config) -> Result<SuperBlock, FsError> {
    config.validate()?;
    let num_blocks = blk_dev.num_blocks();
    if num_blocks <= BLK_DIR_DATA {
        return Err(FsError::Config(format!(
            "a disk of {num_blocks} blocks cannot hold the {NBOOTSTRAP} fixed blocks"
        )));
    }
    let num_blocks = u32::try_from(num_blocks)
        .map_err(|_| FsError::Config(format!("a disk of {num_blocks} blocks is too large")))?;
    let sb = SuperBlock::new(num_blocks, config);
    write(blk_dev, BLK_SUPERBLOCK, &sb.encode()?)?;

    let mut used_blocks = BitmapBlock::new();
    for blockno in 0..BPB {
        if blockno <= BLK_DIR_DATA || sb.is_inode_block(blockno) || blockno >= num_blocks as usize {
            used_blocks.set(blockno);
        }
    }
    write(blk_dev, BLK_USED_BITMAP, &used_blocks.encode())?;

    let mut used_inodes = BitmapBlock::new();
    used_inodes.set(DIR_INO as usize);
    for ino in sb.max_inodes()..BPB {
        used_inodes.set(ino);
    }
    write(blk_dev, BLK_INODE_BITMAP, &used_inodes.encode())?;

    let mut dir_inode = Inode::new(&sb, DIR_INO, FileKind::Directory);
    dir_inode.add_data_block(BLK_DIR_DATA as u32);
    let mut inode_block = vec![0; BSIZE];
    dir_inode.encode_into(&sb, &mut inode_block)?;
    write(blk_dev, BLK_DIR_INODE, &inode_block)?;

    write(blk_dev, BLK_DIR_DATA, &DirectoryBlock::new().encode()?)?;

    info!(
        "mkfs: {num_blocks} blocks, {} inodes, {} free data blocks",
        sb.max_inodes(),
        used_blocks.num_free()
    );
    Ok(sb)
}

fn write(blk_dev: &dyn BlockDevice, blockno: usize, buf: &[u8]) -> Result<(), DeviceError> {
    blk_dev.write_block(blockno, buf)
}

/// Create (or truncate) an image of `size` bytes, rounded down to whole
/// sectors, and format it.
pub fn create_image(
    path: impl AsRef<Path>,
    size: u64,
    config: &Config,
    stats: Arc<Stats>,
) -> Result<FileDisk, FsError> {
    let path = path.as_ref();
    let len = size / BSIZE as u64 * BSIZE as u64;
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(DeviceError::from)?;
    file.set_len(len).map_err(DeviceError::from)?;
    drop(file);

    let disk = FileDisk::open(path, stats)?;
    mkfs(&disk, config)?;
    Ok(disk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use blk_dev::MemDisk;

    fn formatted(blocks: usize) -> (MemDisk, SuperBlock) {
        let disk = MemDisk::new(blocks, Arc::new(Stats::new()));
        let sb = mkfs(&disk, &Config::default()).unwrap();
        (disk, sb)
    }

    #[test]
    fn superblock_lands_in_block_zero() {
        let (disk, sb) = formatted(64);
        assert_eq!(sb, SuperBlock::decode(&disk.sector(BLK_SUPERBLOCK)).unwrap());
        assert_eq!(64, sb.num_blocks);
    }

    #[test]
    fn used_blocks_cover_metadata_and_tail() {
        let (disk, _) = formatted(64);
        let bitmap = BitmapBlock::decode(&disk.sector(BLK_USED_BITMAP)).unwrap();
        for b in [0, 1, 2, 3, 4, 12, 21, 30, 39, 48, 57] {
            assert!(bitmap.get(b), "block {b} should be used");
        }
        for b in [5, 11, 13, 63] {
            assert!(!bitmap.get(b), "block {b} should be free");
        }
        assert!(bitmap.get(64));
        assert!(bitmap.get(BPB - 1));
        // 64 blocks - 5 fixed - 6 further inode blocks
        assert_eq!(53, bitmap.num_free());
    }

    #[test]
    fn directory_inode_points_at_directory_block() {
        let (disk, sb) = formatted(64);
        let inode = Inode::decode(&sb, &disk.sector(BLK_DIR_INODE), DIR_INO).unwrap();
        assert_eq!(FileKind::Directory, inode.kind());
        assert_eq!(Some(BLK_DIR_DATA), inode.data_block(0));

        let dir = DirectoryBlock::decode(&disk.sector(BLK_DIR_DATA)).unwrap();
        assert!(dir.live().is_empty());
    }

    #[test]
    fn inode_bitmap_caps_at_inode_blocks() {
        let (disk, sb) = formatted(64);
        let bitmap = BitmapBlock::decode(&disk.sector(BLK_INODE_BITMAP)).unwrap();
        assert!(bitmap.get(0));
        // inode blocks 3, 12, ..., 57 -> 7 blocks of 8 inodes
        assert_eq!(56, sb.max_inodes());
        assert!(!bitmap.get(55));
        assert!(bitmap.get(56));
        assert_eq!(55, bitmap.num_free());
    }

    #[test]
    fn tiny_disk_is_rejected() {
        let disk = MemDisk::new(4, Arc::new(Stats::new()));
        assert!(matches!(
            mkfs(&disk, &Config::default()),
            Err(FsError::Config(_))
        ));
    }

    #[test]
    fn image_file_is_formatted() {
        let path = std::env::temp_dir().join(format!("bufcache-mkfs-{}.img", std::process::id()));
        let disk = create_image(&path, 32 * BSIZE as u64 + 100, &Config::default(), Arc::new(Stats::new()))
            .unwrap();
        assert_eq!(32, disk.num_blocks());
        let mut buf = vec![0; BSIZE];
        disk.read_block(BLK_SUPERBLOCK, &mut buf).unwrap();
        drop(disk);
        std::fs::remove_file(&path).unwrap();
        assert_eq!(32, SuperBlock::decode(&buf).unwrap().num_blocks);
    }
}
