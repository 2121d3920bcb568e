//! Buffer pool statistics.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters kept by the buffer pool.
///
/// Counters are independent and only ever read through a [`StatsSnapshot`],
/// so `Relaxed` ordering is enough everywhere.
#[derive(Debug, Default)]
pub struct BufferPoolStats {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    evictions: AtomicU64,
    pages_read: AtomicU64,
    pages_written: AtomicU64,
    checksum_failures: AtomicU64,
}

impl BufferPoolStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn record_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// A miss that was served by reading the page from the store.
    #[inline]
    pub(crate) fn record_load(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        self.pages_read.fetch_add(1, Ordering::Relaxed);
    }

    /// A miss that failed: the store had no such page or it was damaged.
    #[inline]
    pub(crate) fn record_failed_load(&self, checksum_mismatch: bool) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        if checksum_mismatch {
            self.checksum_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_write(&self) {
        self.pages_written.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the counters out.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            pages_read: self.pages_read.load(Ordering::Relaxed),
            pages_written: self.pages_written.load(Ordering::Relaxed),
            checksum_failures: self.checksum_failures.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`BufferPoolStats`].
///
/// ```
/// use genbtree::{BTree, MemoryStore, NoMonitor, SimpleLongLayout, TreeConfig};
///
/// let config = TreeConfig::default().with_page_size(256).with_pool_size(16);
/// let tree = BTree::open_or_create(MemoryStore::new(256), SimpleLongLayout::new(), config, NoMonitor).unwrap();
/// let stats = tree.pool_stats();
/// println!("{}", stats);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub evictions: u64,
    pub pages_read: u64,
    pub pages_written: u64,
    pub checksum_failures: u64,
}

impl StatsSnapshot {
    /// Fraction of fetches served from the pool, 0.0 when nothing was
    /// fetched.
    pub fn hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }

    /// Activity between `earlier` and this snapshot.
    pub fn since(&self, earlier: &StatsSnapshot) -> StatsSnapshot {
        StatsSnapshot {
            cache_hits: self.cache_hits.saturating_sub(earlier.cache_hits),
            cache_misses: self.cache_misses.saturating_sub(earlier.cache_misses),
            evictions: self.evictions.saturating_sub(earlier.evictions),
            pages_read: self.pages_read.saturating_sub(earlier.pages_read),
            pages_written: self.pages_written.saturating_sub(earlier.pages_written),
            checksum_failures: self
                .checksum_failures
                .saturating_sub(earlier.checksum_failures),
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits: {}, misses: {}, evictions: {}, read: {}, written: {}, hit_rate: {:.2}%",
            self.cache_hits,
            self.cache_misses,
            self.evictions,
            self.pages_read,
            self.pages_written,
            self.hit_rate() * 100.0
        )?;
        if self.checksum_failures > 0 {
            write!(f, ", checksum_failures: {}", self.checksum_failures)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot() {
        let snapshot = BufferPoolStats::new().snapshot();
        assert_eq!(snapshot, StatsSnapshot::default());
        assert_eq!(snapshot.hit_rate(), 0.0);
    }

    #[test]
    fn test_loads_count_as_misses_and_reads() {
        let stats = BufferPoolStats::new();
        for _ in 0..7 {
            stats.record_hit();
        }
        stats.record_load();
        stats.record_load();
        stats.record_failed_load(true);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.cache_misses, 3);
        assert_eq!(snapshot.pages_read, 2);
        assert_eq!(snapshot.checksum_failures, 1);
        assert_eq!(snapshot.hit_rate(), 0.7);
    }

    #[test]
    fn test_since() {
        let stats = BufferPoolStats::new();
        stats.record_write();
        let before = stats.snapshot();

        stats.record_write();
        stats.record_write();
        stats.record_eviction();

        let delta = stats.snapshot().since(&before);
        assert_eq!(delta.pages_written, 2);
        assert_eq!(delta.evictions, 1);
        assert_eq!(delta.cache_hits, 0);
    }

    #[test]
    fn test_display() {
        let stats = BufferPoolStats::new();
        for _ in 0..4 {
            stats.record_hit();
        }
        stats.record_load();

        let display = stats.snapshot().to_string();
        assert!(display.contains("hits: 4"));
        assert!(display.contains("misses: 1"));
        assert!(display.contains("80.00%"));
        assert!(!display.contains("checksum_failures"));

        stats.record_failed_load(true);
        assert!(stats.snapshot().to_string().contains("checksum_failures: 1"));
    }
}
