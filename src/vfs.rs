//! Syscall layer: the open-file table plus create/open/close/read/write/seek
//! on top of a `BufferCache`. Every block it touches goes through the cache.

use super::*;
use bitmap::BitmapBlock;
use blk_dev::BlockDevice;
use block_cache::{BufferCache, SyncBufferCache};
use buf::Page;
use common::*;
use dir::{Dentry, DirectoryBlock};
use error::{FsError, VfsError};
use file::{OpenFile, OpenFlags, Whence};
use fs::SuperBlock;
use inode::{FileKind, Inode};
use process::CurrentProcess;
use stat::Stats;

use log::{debug, info, warn};
use std::sync::Arc;

pub struct Vfs<C: BufferCache = SyncBufferCache> {
    cache: C,
    open_files: Vec<Option<OpenFile>>,
    process: Arc<dyn CurrentProcess>,
}

impl Vfs<SyncBufferCache> {
    /// Put a synchronous cache sized by `config` in front of `blk_dev`.
    pub fn mount(
        blk_dev: Arc<dyn BlockDevice>,
        config: &Config,
        process: Arc<dyn CurrentProcess>,
        stats: Arc<Stats>,
    ) -> Result<Self, FsError> {
        config.validate()?;
        let nframes = config.frame_count(blk_dev.num_blocks())?;
        info!("mount: {} blocks, {nframes} cache pages", blk_dev.num_blocks());
        let cache = SyncBufferCache::new(blk_dev, nframes, Arc::clone(&process), stats);
        Ok(Self::new(cache, process))
    }
}

impl<C: BufferCache> Vfs<C> {
    pub fn new(cache: C, process: Arc<dyn CurrentProcess>) -> Self {
        Self {
            cache,
            open_files: vec![None; MAX_OPEN_FILE],
            process,
        }
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut C {
        &mut self.cache
    }

    pub fn open_file(&self, fd: usize) -> Option<&OpenFile> {
        self.open_files.get(fd).and_then(Option::as_ref)
    }

    fn current_pid(&self) -> process::Pid {
        self.process.current_pid()
    }

    /*------------------ metadata through the cache ------------------*/

    pub fn super_block(&mut self) -> Result<SuperBlock, VfsError> {
        let page = self.cache.read(BLK_SUPERBLOCK)?;
        Ok(SuperBlock::decode(page.as_bytes())?)
    }

    pub fn used_block_bitmap(&mut self) -> Result<BitmapBlock, VfsError> {
        let page = self.cache.read(BLK_USED_BITMAP)?;
        Ok(BitmapBlock::decode(page.as_bytes())?)
    }

    pub fn inode_bitmap(&mut self) -> Result<BitmapBlock, VfsError> {
        let page = self.cache.read(BLK_INODE_BITMAP)?;
        Ok(BitmapBlock::decode(page.as_bytes())?)
    }

    pub fn dir_inode(&mut self) -> Result<Inode, VfsError> {
        let sb = self.super_block()?;
        self.read_inode(&sb, DIR_INO)
    }

    fn dir_block(&mut self) -> Result<DirectoryBlock, VfsError> {
        let page = self.cache.read(BLK_DIR_DATA)?;
        Ok(DirectoryBlock::decode(page.as_bytes())?)
    }

    fn write_dir_block(&mut self, dir: &DirectoryBlock) -> Result<(), VfsError> {
        Ok(self.cache.write(BLK_DIR_DATA, &dir.encode()?)?)
    }

    fn read_inode(&mut self, sb: &SuperBlock, ino: u32) -> Result<Inode, VfsError> {
        let page = self.cache.read(sb.iblock(ino))?;
        Ok(Inode::decode(sb, page.as_bytes(), ino)?)
    }

    /// Store `inode` into its slot, leaving its neighbours untouched.
    fn write_inode(&mut self, sb: &SuperBlock, inode: &Inode) -> Result<(), VfsError> {
        let blockno = sb.iblock(inode.ino());
        let mut page = self.cache.read(blockno)?.clone();
        inode.encode_into(sb, page.as_bytes_mut())?;
        Ok(self.cache.write(blockno, page.as_bytes())?)
    }

    /*------------------------- allocators ---------------------------*/

    /// Allocate a data block, `None` when the disk is full.
    pub fn balloc(&mut self) -> Result<Option<u32>, VfsError> {
        let mut bitmap = self.used_block_bitmap()?;
        let Some(blockno) = bitmap.allocate() else {
            return Ok(None);
        };
        self.cache.write(BLK_USED_BITMAP, &bitmap.encode())?;
        debug!("balloc: block {blockno}");
        Ok(Some(blockno as u32))
    }

    /// Allocate an inode of `kind` and write its empty record, `None` when
    /// every inode is taken.
    pub fn ialloc(&mut self, kind: FileKind) -> Result<Option<Inode>, VfsError> {
        let sb = self.super_block()?;
        let mut bitmap = self.inode_bitmap()?;
        let Some(ino) = bitmap.allocate() else {
            return Ok(None);
        };
        self.cache.write(BLK_INODE_BITMAP, &bitmap.encode())?;
        let inode = Inode::new(&sb, ino as u32, kind);
        self.write_inode(&sb, &inode)?;
        debug!("ialloc: inode {ino} ({kind:?})");
        Ok(Some(inode))
    }

    /// The open file at `fd`, owned by the running process.
    fn file(&self, fd: usize) -> Result<&OpenFile, VfsError> {
        match self.open_files.get(fd).and_then(Option::as_ref) {
            Some(file) if file.pid == self.current_pid() => Ok(file),
            _ => Err(VfsError::BadFileDescriptor(fd)),
        }
    }

    /*--------------------------- syscalls ---------------------------*/

    pub fn create(&mut self, name: &str) -> Result<(), VfsError> {
        debug!("create({name})");
        self.do_create(name).inspect_err(report)
    }

    fn do_create(&mut self, name: &str) -> Result<(), VfsError> {
        if name.len() > DIRSIZ {
            return Err(VfsError::NameTooLong(name.to_owned()));
        }
        if !Dentry::is_storable(name) {
            return Err(VfsError::InvalidName(name.to_owned()));
        }
        let mut dir = self.dir_block()?;
        if !dir.is_available() {
            return Err(VfsError::DentryFull(name.to_owned()));
        }
        if dir.lookup_by_name(name).is_some() {
            return Err(VfsError::FileAlreadyExists(name.to_owned()));
        }
        let Some(inode) = self.ialloc(FileKind::File)? else {
            return Err(VfsError::InodeFull(name.to_owned()));
        };
        if !dir.add_dentry(Dentry::new(name, inode.ino())) {
            return Err(VfsError::DentryFull(name.to_owned()));
        }
        self.write_dir_block(&dir)
    }

    /// Open `name` at descriptor `fd`, which must be free.
    pub fn open(&mut self, name: &str, flags: OpenFlags, fd: usize) -> Result<usize, VfsError> {
        debug!("open({name}, {flags:?}) = {fd}");
        self.do_open(name, flags, fd).inspect_err(report)
    }

    fn do_open(&mut self, name: &str, flags: OpenFlags, fd: usize) -> Result<usize, VfsError> {
        if self.open_files.get(fd).map_or(true, Option::is_some) {
            return Err(VfsError::BadFileDescriptor(fd));
        }
        let dir = self.dir_block()?;
        let Some(dentry) = dir.lookup_by_name(name) else {
            return Err(VfsError::FileNotFound(name.to_owned()));
        };
        let sb = self.super_block()?;
        let inode = self.read_inode(&sb, dentry.ino())?;
        let file = OpenFile::new(fd, flags, name, inode, self.current_pid());
        self.open_files[fd] = Some(file);
        Ok(fd)
    }

    /// Flush the file's data blocks, then its inode block, and free `fd`.
    pub fn close(&mut self, fd: usize) -> Result<(), VfsError> {
        debug!("close({fd})");
        self.do_close(fd).inspect_err(report)
    }

    fn do_close(&mut self, fd: usize) -> Result<(), VfsError> {
        self.file(fd)?;
        let Some(file) = self.open_files[fd].take() else {
            return Err(VfsError::BadFileDescriptor(fd));
        };
        // another descriptor may have grown the file since this one looked
        let sb = self.super_block()?;
        let inode = self.read_inode(&sb, file.inode.ino())?;
        for blockno in inode.data_blocks() {
            self.cache.flush(blockno)?;
        }
        self.cache.flush(sb.iblock(inode.ino()))?;
        Ok(())
    }

    /// Write `size` copies of `value` at the file position. Returns the
    /// number of bytes written, short once the file runs out of direct blocks
    /// or the disk runs out of free ones.
    pub fn write(&mut self, fd: usize, size: usize, value: u8) -> Result<usize, VfsError> {
        debug!("write({fd}, {size}) = {value:#x}");
        self.do_write(fd, size, value).inspect_err(report)
    }

    fn do_write(&mut self, fd: usize, size: usize, value: u8) -> Result<usize, VfsError> {
        let file = self.file(fd)?;
        if file.is_read_only() {
            return Err(VfsError::BadFileDescriptor(fd));
        }
        let (ino, append, mut pos, name) =
            (file.inode.ino(), file.is_append(), file.pos as usize, file.file_name.clone());

        let sb = self.super_block()?;
        let mut inode = self.read_inode(&sb, ino)?;
        if append {
            pos = inode.size() as usize;
        }

        let mut written = 0;
        let mut disk_full = false;
        while written < size {
            let index = pos / BSIZE;
            if index >= inode.max_data_blocks() {
                break;
            }
            let (blockno, fresh) = match inode.data_block(index) {
                Some(blockno) => (blockno, false),
                None => match self.balloc()? {
                    Some(blockno) => {
                        inode.add_data_block(blockno);
                        (blockno as usize, true)
                    }
                    None => {
                        disk_full = true;
                        break;
                    }
                },
            };

            let offset = pos % BSIZE;
            let n = (BSIZE - offset).min(size - written);
            // a block just allocated holds nothing worth reading
            let mut page = if fresh {
                Page::new()
            } else {
                self.cache.read(blockno)?.clone()
            };
            page.as_bytes_mut()[offset..offset + n].fill(value);
            if let Err(err) = self.cache.write(blockno, page.as_bytes()) {
                if fresh {
                    // keep the block just taken from the bitmap reachable
                    let _ = self.write_inode(&sb, &inode);
                }
                return Err(err.into());
            }

            written += n;
            pos += n;
        }

        inode.set_size(inode.size().max(pos as u32));
        self.write_inode(&sb, &inode)?;
        if let Some(file) = self.open_files[fd].as_mut() {
            file.pos = pos as u32;
            file.inode = inode;
        }

        if written == 0 && size > 0 {
            return Err(if disk_full {
                VfsError::DiskFull(name)
            } else {
                VfsError::FileSizeLimit(name)
            });
        }
        Ok(written)
    }

    /// Advance the file position by up to `size` bytes, stopping at the end
    /// of the last allocated block. Returns the number of bytes passed over.
    pub fn read(&mut self, fd: usize, size: usize) -> Result<usize, VfsError> {
        self.read_bytes(fd, size).map(|bytes| bytes.len())
    }

    /// `read`, returning the bytes passed over.
    pub fn read_bytes(&mut self, fd: usize, size: usize) -> Result<Vec<u8>, VfsError> {
        debug!("read({fd}, {size})");
        self.do_read(fd, size).inspect_err(report)
    }

    fn do_read(&mut self, fd: usize, size: usize) -> Result<Vec<u8>, VfsError> {
        let file = self.file(fd)?;
        let (ino, mut pos) = (file.inode.ino(), file.pos as usize);

        let sb = self.super_block()?;
        let inode = self.read_inode(&sb, ino)?;
        let extent = inode.data_blocks_used() * BSIZE;
        let end = extent.min(pos.saturating_add(size));

        let mut bytes = Vec::with_capacity(end.saturating_sub(pos));
        while pos < end {
            let Some(blockno) = inode.data_block(pos / BSIZE) else {
                break;
            };
            let offset = pos % BSIZE;
            let n = (BSIZE - offset).min(end - pos);
            let page = self.cache.read(blockno)?;
            bytes.extend_from_slice(&page.as_bytes()[offset..offset + n]);
            pos += n;
        }

        if let Some(file) = self.open_files[fd].as_mut() {
            file.pos = pos as u32;
            file.inode = inode;
        }
        Ok(bytes)
    }

    /// Move the file position, clamped to `[0, size]`. `Whence::End` counts
    /// back from the end of the file.
    pub fn seek(&mut self, fd: usize, whence: Whence, offset: i64) -> Result<u32, VfsError> {
        debug!("seek({fd}, {whence:?}, {offset})");
        self.do_seek(fd, whence, offset).inspect_err(report)
    }

    fn do_seek(&mut self, fd: usize, whence: Whence, offset: i64) -> Result<u32, VfsError> {
        let file = self.file(fd)?;
        let (ino, cur) = (file.inode.ino(), i64::from(file.pos));

        let sb = self.super_block()?;
        let inode = self.read_inode(&sb, ino)?;
        let size = i64::from(inode.size());
        let target = match whence {
            Whence::Set => offset,
            Whence::Cur => cur.saturating_add(offset),
            Whence::End => size.saturating_sub(offset),
        };
        let pos = target.clamp(0, size) as u32;

        if let Some(file) = self.open_files[fd].as_mut() {
            file.pos = pos;
            file.inode = inode;
        }
        Ok(pos)
    }

    /// Load and pin the fixed metadata blocks.
    pub fn startup(&mut self) -> Result<(), VfsError> {
        for blockno in 0..NBOOTSTRAP {
            self.cache.read(blockno)?;
            self.cache.set_pin(blockno, true)?;
        }
        let sb = self.super_block()?;
        info!(
            "startup: {} blocks, {} inodes per block, ratio {}, {} data blocks per inode",
            sb.num_blocks, sb.inodes_per_block, sb.inode_block_ratio, sb.data_blocks_per_inode
        );
        Ok(())
    }

    /// Write every cached block back to disk.
    pub fn shutdown(&mut self) -> Result<(), VfsError> {
        info!("Flushing BufferCache to disk");
        Ok(self.cache.flush_all()?)
    }

    /// Live directory entries, sorted by name.
    pub fn list(&mut self) -> Result<Vec<Dentry>, VfsError> {
        Ok(self.dir_block()?.live())
    }

    pub fn stat(&mut self, name: &str) -> Result<Inode, VfsError> {
        let dir = self.dir_block()?;
        let Some(dentry) = dir.lookup_by_name(name) else {
            return Err(VfsError::FileNotFound(name.to_owned()));
        };
        let sb = self.super_block()?;
        self.read_inode(&sb, dentry.ino())
    }
}

fn report(err: &VfsError) {
    warn!("Err: {err}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use blk_dev::MemDisk;
    use disk::mkfs;
    use file::OpenFlag;
    use process::RunningProcess;

    fn setup(blocks: usize) -> Vfs {
        let stats = Arc::new(Stats::new());
        let disk = Arc::new(MemDisk::new(blocks, stats.clone()));
        mkfs(disk.as_ref(), &Config::default()).unwrap();
        let mut vfs = Vfs::mount(
            disk,
            &Config::default(),
            Arc::new(RunningProcess::new(1)),
            stats,
        )
        .unwrap();
        vfs.startup().unwrap();
        vfs
    }

    #[test]
    fn inode_record_lands_in_its_slot() {
        let mut vfs = setup(64);
        vfs.create("a").unwrap();
        vfs.create("b").unwrap();
        let a = vfs.stat("a").unwrap();
        let b = vfs.stat("b").unwrap();
        assert_eq!((1, 2), (a.ino(), b.ino()));
        // the directory inode shares block 3 and must survive
        assert_eq!(Some(BLK_DIR_DATA), vfs.dir_inode().unwrap().data_block(0));
    }

    #[test]
    fn write_fills_blocks_in_order() {
        let mut vfs = setup(64);
        vfs.create("f").unwrap();
        vfs.open("f", OpenFlag::RDWR.into(), 0).unwrap();
        assert_eq!(BSIZE + 10, vfs.write(0, BSIZE + 10, 0x5a).unwrap());

        let inode = vfs.stat("f").unwrap();
        assert_eq!(2, inode.data_blocks_used());
        assert_eq!((BSIZE + 10) as u32, inode.size());

        vfs.seek(0, Whence::Set, BSIZE as i64 - 2).unwrap();
        let bytes = vfs.read_bytes(0, 100).unwrap();
        assert_eq!(vec![0x5a; 12], bytes[..12]);
        assert_eq!(vec![0; 88], bytes[12..]);
    }

    #[test]
    fn overwrite_keeps_neighbouring_bytes() {
        let mut vfs = setup(64);
        vfs.create("f").unwrap();
        vfs.open("f", OpenFlag::RDWR.into(), 0).unwrap();
        vfs.write(0, 8, 0x11).unwrap();
        vfs.seek(0, Whence::Set, 2).unwrap();
        vfs.write(0, 3, 0x22).unwrap();
        vfs.seek(0, Whence::Set, 0).unwrap();
        assert_eq!(
            vec![0x11, 0x11, 0x22, 0x22, 0x22, 0x11, 0x11, 0x11],
            vfs.read_bytes(0, 8).unwrap()
        );
        assert_eq!(8, vfs.stat("f").unwrap().size());
    }

    #[test]
    fn seek_clamps() {
        let mut vfs = setup(64);
        vfs.create("f").unwrap();
        vfs.open("f", OpenFlag::WRONLY.into(), 4).unwrap();
        vfs.write(4, 100, 1).unwrap();

        assert_eq!(100, vfs.seek(4, Whence::Set, 500).unwrap());
        assert_eq!(0, vfs.seek(4, Whence::Set, -5).unwrap());
        assert_eq!(40, vfs.seek(4, Whence::Cur, 40).unwrap());
        assert_eq!(0, vfs.seek(4, Whence::Cur, -400).unwrap());
        assert_eq!(90, vfs.seek(4, Whence::End, 10).unwrap());
        assert_eq!(0, vfs.seek(4, Whence::End, 1000).unwrap());
        assert_eq!(100, vfs.seek(4, Whence::End, -7).unwrap());
    }

    #[test]
    fn fd_out_of_range() {
        let mut vfs = setup(64);
        vfs.create("f").unwrap();
        assert!(matches!(
            vfs.open("f", OpenFlag::RDONLY.into(), MAX_OPEN_FILE),
            Err(VfsError::BadFileDescriptor(MAX_OPEN_FILE))
        ));
        assert!(matches!(
            vfs.read(MAX_OPEN_FILE + 3, 1),
            Err(VfsError::BadFileDescriptor(_))
        ));
    }

    #[test]
    fn ialloc_until_full() {
        let mut vfs = setup(16);
        // inode blocks 3 and 12 -> 16 inodes, inode 0 is the directory
        for ino in 1..16 {
            assert_eq!(ino, vfs.ialloc(FileKind::File).unwrap().unwrap().ino());
        }
        assert!(vfs.ialloc(FileKind::File).unwrap().is_none());
    }
}
