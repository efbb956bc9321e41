//! The buffer cache: a bounded pool of page frames in front of the disk,
//! keyed by block number, with LRU replacement and write-back.

use super::*;
use blk_dev::BlockDevice;
use buf::{FrameTable, Page};
use error::CacheError;
use process::{CurrentProcess, Pid};
use stat::Stats;

use log::{debug, trace};
use std::collections::BTreeMap;
use std::sync::Arc;

/// What the file system needs from a cache. `SyncBufferCache` waits for the
/// disk on every miss; a non-blocking cache would implement the same calls.
pub trait BufferCache {
    /// Borrow the page holding `blockno`, pulling it from disk on a miss.
    fn read(&mut self, blockno: usize) -> Result<&Page, CacheError>;

    /// Install `buf` as the content of `blockno` without reading the old one.
    fn write(&mut self, blockno: usize, buf: &[u8]) -> Result<(), CacheError>;

    /// Write a resident block back to disk. The entry stays cached.
    fn flush(&mut self, blockno: usize) -> Result<(), CacheError>;

    fn flush_all(&mut self) -> Result<(), CacheError>;

    /// A pinned block is never chosen for eviction.
    fn set_pin(&mut self, blockno: usize, pin: bool) -> Result<(), CacheError>;

    fn stats(&self) -> Arc<Stats>;
}

/// Per-block metadata of a resident page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub frame: usize,
    /// logical time of the last access
    pub timestamp: u64,
    /// process that brought the block in
    pub pid: Pid,
    pub pin: bool,
    /// waiters on a page that is not ready yet, always 0 for a synchronous cache
    pub io_pending: u32,
}

pub struct SyncBufferCache {
    blk_dev: Arc<dyn BlockDevice>,
    frames: Vec<Page>,
    frame_table: FrameTable,
    // ordered, so equal timestamps evict the lowest block first
    entries: BTreeMap<usize, CacheEntry>,
    time: u64,
    process: Arc<dyn CurrentProcess>,
    stats: Arc<Stats>,
}

impl SyncBufferCache {
    pub fn new(
        blk_dev: Arc<dyn BlockDevice>,
        nframes: usize,
        process: Arc<dyn CurrentProcess>,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            blk_dev,
            frames: vec![Page::new(); nframes],
            frame_table: FrameTable::new(nframes),
            entries: BTreeMap::new(),
            time: 0,
            process,
            stats,
        }
    }

    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    pub fn resident(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, blockno: usize) -> bool {
        self.entries.contains_key(&blockno)
    }

    pub fn entry(&self, blockno: usize) -> Option<&CacheEntry> {
        self.entries.get(&blockno)
    }

    pub fn is_pinned(&self, blockno: usize) -> bool {
        self.entries.get(&blockno).is_some_and(|e| e.pin)
    }

    /// Raw frame allocation, lowest free frame first.
    pub fn page_alloc(&mut self) -> Option<usize> {
        self.frame_table.alloc()
    }

    pub fn page_free(&mut self, frame: usize) {
        self.frame_table.free(frame);
    }

    fn tick(&mut self) -> u64 {
        let now = self.time;
        self.time += 1;
        now
    }

    /// A free frame, evicting the least recently used unpinned block if
    /// the pool is full.
    fn claim_frame(&mut self) -> Result<usize, CacheError> {
        if let Some(frame) = self.page_alloc() {
            return Ok(frame);
        }
        self.remove_lru()?;
        self.page_alloc().ok_or(CacheError::PoolExhausted)
    }

    /// Write back and drop the unpinned entry with the smallest timestamp.
    /// Returns the frame it released.
    fn remove_lru(&mut self) -> Result<usize, CacheError> {
        let mut victim: Option<(usize, u64)> = None;
        for (&blockno, entry) in self.entries.iter().filter(|(_, e)| !e.pin) {
            if victim.map_or(true, |(_, oldest)| entry.timestamp < oldest) {
                victim = Some((blockno, entry.timestamp));
            }
        }
        let (blockno, timestamp) = victim.ok_or(CacheError::PoolExhausted)?;

        // first write to disk, then drop it from the cache
        self.flush(blockno)?;
        let entry = self
            .entries
            .remove(&blockno)
            .ok_or(CacheError::NotResident(blockno))?;
        self.page_free(entry.frame);
        self.stats.page_replaced();
        debug!(
            "cache evict: block {blockno} (timestamp {timestamp}) from frame {}",
            entry.frame
        );
        Ok(entry.frame)
    }

    fn install(&mut self, blockno: usize, frame: usize) {
        let entry = CacheEntry {
            frame,
            timestamp: self.tick(),
            pid: self.process.current_pid(),
            pin: false,
            io_pending: 0,
        };
        self.entries.insert(blockno, entry);
    }
}

impl BufferCache for SyncBufferCache {
    fn read(&mut self, blockno: usize) -> Result<&Page, CacheError> {
        self.stats.cache_read();
        let now = self.tick();
        if let Some(entry) = self.entries.get_mut(&blockno) {
            self.stats.cache_hit();
            entry.timestamp = now;
            let frame = entry.frame;
            trace!("cache hit: block {blockno} in frame {frame}");
            return Ok(&self.frames[frame]);
        }

        self.stats.cache_miss();
        let frame = self.claim_frame()?;
        if let Err(err) = self
            .blk_dev
            .read_block(blockno, self.frames[frame].as_bytes_mut())
        {
            self.page_free(frame);
            return Err(err.into());
        }
        self.install(blockno, frame);
        debug!("cache miss: block {blockno} into frame {frame}");
        Ok(&self.frames[frame])
    }

    fn write(&mut self, blockno: usize, buf: &[u8]) -> Result<(), CacheError> {
        self.stats.cache_write();
        if let Some(entry) = self.entries.get(&blockno) {
            let frame = entry.frame;
            self.frames[frame].set_bytes(buf)?;
            let now = self.tick();
            if let Some(entry) = self.entries.get_mut(&blockno) {
                entry.timestamp = now;
            }
            trace!("cache write: block {blockno} over frame {frame}");
            return Ok(());
        }

        let frame = self.claim_frame()?;
        if let Err(err) = self.frames[frame].set_bytes(buf) {
            self.page_free(frame);
            return Err(err);
        }
        self.install(blockno, frame);
        debug!("cache write: block {blockno} into frame {frame}");
        Ok(())
    }

    fn flush(&mut self, blockno: usize) -> Result<(), CacheError> {
        let Some(entry) = self.entries.get(&blockno) else {
            return Ok(());
        };
        self.blk_dev
            .write_block(blockno, self.frames[entry.frame].as_bytes())?;
        trace!("cache flush: block {blockno}");
        Ok(())
    }

    fn flush_all(&mut self) -> Result<(), CacheError> {
        let blocks: Vec<usize> = self.entries.keys().copied().collect();
        for blockno in blocks {
            self.flush(blockno)?;
        }
        Ok(())
    }

    fn set_pin(&mut self, blockno: usize, pin: bool) -> Result<(), CacheError> {
        let entry = self
            .entries
            .get_mut(&blockno)
            .ok_or(CacheError::NotResident(blockno))?;
        entry.pin = pin;
        Ok(())
    }

    fn stats(&self) -> Arc<Stats> {
        Arc::clone(&self.stats)
    }
}
