//! The block device contract, plus an in-memory disk and an image-file disk.

use super::*;
use common::BSIZE;
use error::DeviceError;
use stat::Stats;

use log::{debug, error};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

pub trait BlockDevice: Send + Sync {
    fn read_block(&self, blockno: usize, buf: &mut [u8]) -> Result<(), DeviceError>;
    fn write_block(&self, blockno: usize, buf: &[u8]) -> Result<(), DeviceError>;
    fn num_blocks(&self) -> usize;
}

/// Head position and failure state common to both disks.
#[derive(Debug, Default)]
struct DiskState {
    broken: bool,
    head: usize,
    /// successful requests left before the injected failure fires
    fail_after: Option<usize>,
}

impl DiskState {
    fn check(&mut self, sector: usize, sectors: usize, len: usize) -> Result<(), DeviceError> {
        if self.broken {
            return Err(DeviceError::Broken);
        }
        if let Some(n) = self.fail_after {
            if n == 0 {
                self.broken = true;
                self.fail_after = None;
                error!("disk failed at sector {sector}, disk is now broken");
                return Err(DeviceError::Broken);
            }
            self.fail_after = Some(n - 1);
        }
        if sector >= sectors {
            return Err(DeviceError::OutOfBounds { sector, sectors });
        }
        if len != BSIZE {
            return Err(DeviceError::BadLength(len));
        }
        Ok(())
    }

    /// move the head, return the distance travelled
    fn seek(&mut self, sector: usize) -> u64 {
        let travelled = sector.abs_diff(self.head) as u64;
        self.head = sector;
        travelled
    }

    fn io_failed(&mut self, err: std::io::Error) -> DeviceError {
        self.broken = true;
        error!("disk i/o failed, disk is now broken: {err}");
        DeviceError::Io(err)
    }
}

/// A disk held in memory.
pub struct MemDisk {
    inner: Mutex<(Vec<u8>, DiskState)>,
    sectors: usize,
    stats: Arc<Stats>,
}

impl MemDisk {
    pub fn new(sectors: usize, stats: Arc<Stats>) -> Self {
        Self {
            inner: Mutex::new((vec![0; sectors * BSIZE], DiskState::default())),
            sectors,
            stats,
        }
    }

    /// The request after the next `n` successful ones breaks the disk.
    pub fn fail_after(&self, n: usize) {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.1.fail_after = Some(n);
    }

    /// Break the disk on the next request.
    pub fn inject_failure(&self) {
        self.fail_after(0);
    }

    pub fn is_broken(&self) -> bool {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.1.broken
    }

    /// Raw sector contents, bypassing stats and failure injection.
    pub fn sector(&self, blockno: usize) -> Vec<u8> {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.0[blockno * BSIZE..(blockno + 1) * BSIZE].to_vec()
    }
}

impl BlockDevice for MemDisk {
    fn read_block(&self, blockno: usize, buf: &mut [u8]) -> Result<(), DeviceError> {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let (data, state) = &mut *guard;
        state.check(blockno, self.sectors, buf.len())?;
        buf.copy_from_slice(&data[blockno * BSIZE..(blockno + 1) * BSIZE]);
        self.stats.disk_read(state.seek(blockno));
        debug!("disk read: block {blockno}");
        Ok(())
    }

    fn write_block(&self, blockno: usize, buf: &[u8]) -> Result<(), DeviceError> {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let (data, state) = &mut *guard;
        state.check(blockno, self.sectors, buf.len())?;
        data[blockno * BSIZE..(blockno + 1) * BSIZE].copy_from_slice(buf);
        self.stats.disk_write(state.seek(blockno));
        debug!("disk write: block {blockno}");
        Ok(())
    }

    fn num_blocks(&self) -> usize {
        self.sectors
    }
}

/// A disk backed by an image file, one sector per `BSIZE` bytes.
pub struct FileDisk {
    inner: Mutex<(File, DiskState)>,
    sectors: usize,
    stats: Arc<Stats>,
}

impl FileDisk {
    pub fn open(path: impl AsRef<Path>, stats: Arc<Stats>) -> Result<Self, DeviceError> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        if len == 0 {
            return Err(DeviceError::BadImage(format!(
                "{} is zero length",
                path.display()
            )));
        }
        if len % BSIZE as u64 != 0 {
            return Err(DeviceError::BadImage(format!(
                "{} is {len} bytes long, which is not a multiple of the sector size {BSIZE}",
                path.display()
            )));
        }
        let sectors = usize::try_from(len / BSIZE as u64)
            .map_err(|_| DeviceError::BadImage(format!("{} is too large", path.display())))?;
        Ok(Self {
            inner: Mutex::new((file, DiskState::default())),
            sectors,
            stats,
        })
    }

    pub fn is_broken(&self) -> bool {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.1.broken
    }
}

impl BlockDevice for FileDisk {
    fn read_block(&self, blockno: usize, buf: &mut [u8]) -> Result<(), DeviceError> {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let (file, state) = &mut *guard;
        state.check(blockno, self.sectors, buf.len())?;
        let res = file
            .seek(SeekFrom::Start((blockno * BSIZE) as u64))
            .and_then(|_| file.read_exact(buf));
        if let Err(err) = res {
            return Err(state.io_failed(err));
        }
        self.stats.disk_read(state.seek(blockno));
        debug!("disk read: block {blockno}");
        Ok(())
    }

    fn write_block(&self, blockno: usize, buf: &[u8]) -> Result<(), DeviceError> {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let (file, state) = &mut *guard;
        state.check(blockno, self.sectors, buf.len())?;
        let res = file
            .seek(SeekFrom::Start((blockno * BSIZE) as u64))
            .and_then(|_| file.write_all(buf));
        if let Err(err) = res {
            return Err(state.io_failed(err));
        }
        self.stats.disk_write(state.seek(blockno));
        debug!("disk write: block {blockno}");
        Ok(())
    }

    fn num_blocks(&self) -> usize {
        self.sectors
    }
}
