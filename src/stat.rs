//! Statistics shared by the cache and the disk. One `Stats` per simulated
//! system, handed to both at construction time.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Stats {
    cache_read: AtomicU64,
    cache_hit: AtomicU64,
    cache_miss: AtomicU64,
    cache_write: AtomicU64,
    cache_page_replaced: AtomicU64,
    disk_reads: AtomicU64,
    disk_writes: AtomicU64,
    disk_sectors_travelled: AtomicU64,
}

/// Point-in-time copy of [`Stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub cache_read: u64,
    pub cache_hit: u64,
    pub cache_miss: u64,
    pub cache_write: u64,
    pub cache_page_replaced: u64,
    pub disk_reads: u64,
    pub disk_writes: u64,
    pub disk_sectors_travelled: u64,
}

fn bump(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache_read(&self) {
        bump(&self.cache_read, 1);
    }
    pub fn cache_hit(&self) {
        bump(&self.cache_hit, 1);
    }
    pub fn cache_miss(&self) {
        bump(&self.cache_miss, 1);
    }
    pub fn cache_write(&self) {
        bump(&self.cache_write, 1);
    }
    pub fn page_replaced(&self) {
        bump(&self.cache_page_replaced, 1);
    }
    pub fn disk_read(&self, travelled: u64) {
        bump(&self.disk_reads, 1);
        bump(&self.disk_sectors_travelled, travelled);
    }
    pub fn disk_write(&self, travelled: u64) {
        bump(&self.disk_writes, 1);
        bump(&self.disk_sectors_travelled, travelled);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            cache_read: get(&self.cache_read),
            cache_hit: get(&self.cache_hit),
            cache_miss: get(&self.cache_miss),
            cache_write: get(&self.cache_write),
            cache_page_replaced: get(&self.cache_page_replaced),
            disk_reads: get(&self.disk_reads),
            disk_writes: get(&self.disk_writes),
            disk_sectors_travelled: get(&self.disk_sectors_travelled),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.cache_read,
            &self.cache_hit,
            &self.cache_miss,
            &self.cache_write,
            &self.cache_page_replaced,
            &self.disk_reads,
            &self.disk_writes,
            &self.disk_sectors_travelled,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl StatsSnapshot {
    /// hits over every cache access, reads and writes
    pub fn hit_rate(&self) -> f64 {
        let accesses = self.cache_read + self.cache_write;
        if accesses == 0 {
            return 0.0;
        }
        self.cache_hit as f64 / accesses as f64
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Buffer cache hit rate: {:.2}%", 100.0 * self.hit_rate())?;
        writeln!(f, "Disk sectors travelled: {}", self.disk_sectors_travelled)?;
        writeln!(
            f,
            "Number of disk (reads)(writes): ({})({})",
            self.disk_reads, self.disk_writes
        )?;
        write!(f, "Number of page replacement: {}", self.cache_page_replaced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_and_resets() {
        let stats = Stats::new();
        stats.cache_read();
        stats.cache_hit();
        stats.cache_write();
        stats.disk_read(7);
        stats.disk_write(3);

        let snap = stats.snapshot();
        assert_eq!(1, snap.cache_read);
        assert_eq!(1, snap.disk_reads);
        assert_eq!(10, snap.disk_sectors_travelled);
        assert!((snap.hit_rate() - 0.5).abs() < f64::EPSILON);

        stats.reset();
        assert_eq!(StatsSnapshot::default(), stats.snapshot());
    }

    #[test]
    fn empty_hit_rate_is_zero() {
        assert_eq!(0.0, StatsSnapshot::default().hit_rate());
    }
}
