//! Configuration for genbtree.
//!
//! Constants describe the hard limits of the on-disk format. [`TreeConfig`]
//! carries the tunables a caller may change when opening a tree.

use crate::common::{Error, Result};

/// Default size of a page in bytes (4KB).
///
/// Matches the OS page size on most systems. Trees can be opened with any
/// page size from [`MIN_PAGE_SIZE`] upwards as long as the page store agrees.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Smallest page size a tree accepts.
///
/// Small pages are useful in tests because they force splits early.
pub const MIN_PAGE_SIZE: usize = 128;

/// Largest page size a tree accepts (node entry counts are stored as u16).
pub const MAX_PAGE_SIZE: usize = 64 * 1024;

/// Maximum number of pages with u32 PageId.
pub const MAX_PAGES: u64 = u32::MAX as u64;

/// Default number of frames in the buffer pool.
pub const DEFAULT_POOL_SIZE: usize = 1024;

/// Smallest pool a tree accepts. The writer pins one page at a time and every
/// concurrent reader pins one more, so this leaves room for a few of each.
pub const MIN_POOL_SIZE: usize = 8;

/// Pages written between two calls into the checkpoint IO limiter.
pub const DEFAULT_FLUSH_BATCH: usize = 16;

/// Reader restarts allowed regardless of tree height.
pub const DEFAULT_READ_RETRY_BASE: usize = 8;

/// Additional reader restarts allowed per level of tree height.
pub const DEFAULT_READ_RETRY_PER_LEVEL: usize = 4;

/// Longest successor chain a reader follows before restarting from the root.
///
/// In steady state a chain has at most one hop: a page is superseded once per
/// generation and superseded pages are reclaimed after the next checkpoint.
pub const MAX_SUCCESSOR_CHAIN: usize = 8;

/// Tunables for opening a tree.
///
/// # Example
/// ```
/// use genbtree::TreeConfig;
///
/// let config = TreeConfig::default().with_page_size(256).with_pool_size(64);
/// assert_eq!(config.page_size, 256);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeConfig {
    /// Page size in bytes. Must match the page store's page size.
    pub page_size: usize,
    /// Number of frames in the buffer pool.
    pub pool_size: usize,
    /// Pages flushed between limiter calls during a checkpoint.
    pub flush_batch: usize,
    /// Reader restarts allowed regardless of height.
    pub read_retry_base: usize,
    /// Reader restarts allowed per level of height.
    pub read_retry_per_level: usize,
}

impl TreeConfig {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_flush_batch(mut self, flush_batch: usize) -> Self {
        self.flush_batch = flush_batch;
        self
    }

    pub fn with_read_retries(mut self, base: usize, per_level: usize) -> Self {
        self.read_retry_base = base;
        self.read_retry_per_level = per_level;
        self
    }

    /// Number of reader restarts tolerated for a tree of the given height.
    pub fn read_retry_limit(&self, height: usize) -> usize {
        self.read_retry_base + self.read_retry_per_level * height
    }

    /// Check limits that do not depend on the layout.
    pub fn validate(&self) -> Result<()> {
        if self.page_size < MIN_PAGE_SIZE || self.page_size > MAX_PAGE_SIZE {
            return Err(Error::InvalidConfig(format!(
                "page size {} outside [{}, {}]",
                self.page_size, MIN_PAGE_SIZE, MAX_PAGE_SIZE
            )));
        }
        if self.pool_size < MIN_POOL_SIZE {
            return Err(Error::InvalidConfig(format!(
                "pool size {} below minimum {}",
                self.pool_size, MIN_POOL_SIZE
            )));
        }
        if self.flush_batch == 0 {
            return Err(Error::InvalidConfig("flush batch must be > 0".into()));
        }
        Ok(())
    }
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            pool_size: DEFAULT_POOL_SIZE,
            flush_batch: DEFAULT_FLUSH_BATCH,
            read_retry_base: DEFAULT_READ_RETRY_BASE,
            read_retry_per_level: DEFAULT_READ_RETRY_PER_LEVEL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_page_size_is_power_of_two() {
        assert!(DEFAULT_PAGE_SIZE.is_power_of_two());
        assert_eq!(TreeConfig::default().page_size, 4096);
    }

    #[test]
    fn test_builder_methods() {
        let config = TreeConfig::default()
            .with_page_size(256)
            .with_pool_size(32)
            .with_flush_batch(4)
            .with_read_retries(2, 1);

        assert_eq!(config.page_size, 256);
        assert_eq!(config.pool_size, 32);
        assert_eq!(config.flush_batch, 4);
        assert_eq!(config.read_retry_limit(3), 5);
    }

    #[test]
    fn test_validate_rejects_small_page() {
        let config = TreeConfig::default().with_page_size(64);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_small_pool() {
        let config = TreeConfig::default().with_pool_size(2);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_limit_grows_with_height() {
        let config = TreeConfig::default();
        assert!(config.read_retry_limit(4) > config.read_retry_limit(1));
    }
}
