//! Buffer Pool Manager - the page cache the tree runs on.
//!
//! The [`BufferPoolManager`] provides:
//! - Page caching between the page store and memory
//! - Pin-based reference counting with RAII guards
//! - Dirty page write-back on eviction and flush
//! - Checksums stamped on write-back and verified on load

use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::buffer::replacer::FifoReplacer;
use crate::buffer::{BufferPoolStats, Frame, PageReadGuard, PageWriteGuard};
use crate::common::{Error, FrameId, PageId, Result};
use crate::storage::{IoLimiter, PageStore, Unlimited, INITIAL_STAMP};

/// Manages a pool of buffer frames caching pages of one [`PageStore`].
///
/// # Architecture
/// ```text
/// ┌─────────────────────────────────────────────────────────────┐
/// │                    BufferPoolManager                        │
/// │  ┌──────────────┐  ┌───────────────────────────────────┐   │
/// │  │ page_table   │  │        frames: Vec<Frame>         │   │
/// │  │PageId → Fid  │─▶│  [Frame0] [Frame1] [Frame2] ...   │   │
/// │  └──────────────┘  └───────────────────────────────────┘   │
/// │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐      │
/// │  │  free_list   │  │   replacer   │  │    store     │      │
/// │  │ Vec<FrameId> │  │ FifoReplacer │  │Mutex<dyn PS> │      │
/// │  └──────────────┘  └──────────────┘  └──────────────┘      │
/// └─────────────────────────────────────────────────────────────┘
/// ```
///
/// # Thread Safety
/// - `page_table`: `RwLock`. Cache hits pin under the read lock; misses
///   choose a victim, write it back and publish the new entry under the
///   write lock, so a frame pinned by a concurrent hit is never evicted and
///   a page is never loaded twice.
/// - A miss publishes its entry with the frame latched and reads the store
///   after releasing the table lock. Fetches of the same page wait on the
///   latch and re-check residency, since a failed load vacates the frame.
/// - `free_list`, `replacer`, `store`: `Mutex`
/// - `frames`: fixed size, each Frame has internal locks
/// - `stats`: atomic counters
///
/// # Crash model
/// Pages only reach the store on eviction or flush. Dropping the pool without
/// flushing loses every dirty page, which is exactly what a crash does.
pub struct BufferPoolManager {
    /// Fixed pool of frames allocated at startup.
    frames: Vec<Frame>,

    /// Maps page IDs to frame IDs.
    page_table: RwLock<HashMap<PageId, FrameId>>,

    /// Stack of free frame IDs (LIFO for cache locality).
    free_list: Mutex<Vec<FrameId>>,

    /// Eviction policy for selecting victim frames.
    replacer: Mutex<FifoReplacer>,

    /// Durable home of the pages.
    store: Mutex<Box<dyn PageStore>>,

    /// Performance statistics.
    stats: BufferPoolStats,

    page_size: usize,
}

impl BufferPoolManager {
    /// Create a new buffer pool manager over `store`.
    ///
    /// # Panics
    /// Panics if `pool_size` is 0.
    pub fn new(pool_size: usize, store: Box<dyn PageStore>) -> Self {
        assert!(pool_size > 0, "pool_size must be > 0");

        let page_size = store.page_size();
        let frames: Vec<Frame> = (0..pool_size).map(|_| Frame::new(page_size)).collect();
        let free_list: Vec<FrameId> = (0..pool_size).map(FrameId::new).collect();

        Self {
            frames,
            page_table: RwLock::new(HashMap::new()),
            free_list: Mutex::new(free_list),
            replacer: Mutex::new(FifoReplacer::new()),
            store: Mutex::new(store),
            stats: BufferPoolStats::new(),
            page_size,
        }
    }

    // ========================================================================
    // Public API: Fetch pages
    // ========================================================================

    /// Fetch a page for reading (shared latch).
    ///
    /// # Errors
    /// - `Error::PageNotFound` if the page doesn't exist in the store
    /// - `Error::NoFreeFrames` if all frames are pinned
    /// - `Error::CorruptionDetected` if the stored checksum does not match
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<PageReadGuard<'_>> {
        loop {
            let frame_id = self.fetch_page_internal(page_id)?;
            let frame = &self.frames[frame_id.index()];
            let lock = frame.page();
            if frame.page_id() == Some(page_id) {
                return Ok(PageReadGuard::new(self, frame_id, page_id, lock));
            }
            // The load this fetch waited for failed
            drop(lock);
            self.unpin_page_internal(frame_id, false);
        }
    }

    /// Fetch a page for writing (exclusive latch).
    ///
    /// The page is marked dirty when the guard drops.
    ///
    /// # Errors
    /// Same as [`fetch_page_read`](Self::fetch_page_read).
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<PageWriteGuard<'_>> {
        loop {
            let frame_id = self.fetch_page_internal(page_id)?;
            let frame = &self.frames[frame_id.index()];
            let lock = frame.page_mut();
            if frame.page_id() == Some(page_id) {
                return Ok(PageWriteGuard::new(self, frame_id, page_id, lock));
            }
            drop(lock);
            self.unpin_page_internal(frame_id, false);
        }
    }

    /// Get a zeroed, write-latched page for `page_id` without reading the
    /// store.
    ///
    /// Used when the caller is about to overwrite the whole page: a freshly
    /// allocated page or a reused freelist page. A cached copy of the page is
    /// reused and zeroed.
    pub fn create_page(&self, page_id: PageId) -> Result<PageWriteGuard<'_>> {
        if !page_id.is_valid() {
            return Err(Error::InvalidPageId(page_id.0));
        }

        loop {
            if let Some(frame_id) = self.pin_if_cached(page_id) {
                let frame = &self.frames[frame_id.index()];
                let mut lock = frame.page_mut();
                if frame.page_id() != Some(page_id) {
                    drop(lock);
                    self.unpin_page_internal(frame_id, false);
                    continue;
                }
                lock.reset();
                return Ok(PageWriteGuard::new(self, frame_id, page_id, lock));
            }

            let mut pt = self.page_table.write();
            if pt.contains_key(&page_id) {
                // A reader loaded the old content meanwhile; use its frame.
                continue;
            }
            let frame_id = self.take_frame(&mut pt)?;
            let frame = &self.frames[frame_id.index()];
            let mut lock = frame.page_mut();
            lock.reset();
            frame.assign(page_id);
            frame.pin();
            pt.insert(page_id, frame_id);
            drop(pt);

            self.record_pinned_access(frame_id);
            return Ok(PageWriteGuard::new(self, frame_id, page_id, lock));
        }
    }

    // ========================================================================
    // Public API: Flush pages
    // ========================================================================

    /// Write a specific page back to the store if it's dirty.
    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        let frame_id = match self.page_table.read().get(&page_id) {
            Some(&fid) => fid,
            None => return Ok(()),
        };

        self.flush_frame(frame_id, page_id).map(|_| ())
    }

    /// Write all dirty pages back to the store.
    pub fn flush_all_pages(&self) -> Result<()> {
        self.flush_all_pages_limited(&Unlimited, usize::MAX)
            .map(|_| ())
    }

    /// Write all dirty pages back to the store in page order, calling
    /// `limiter` after every `batch` written pages.
    ///
    /// Returns the number of pages written. Pages dirtied while the flush is
    /// running may or may not be included.
    pub fn flush_all_pages_limited(&self, limiter: &dyn IoLimiter, batch: usize) -> Result<usize> {
        let mut pages: Vec<(PageId, FrameId)> = {
            let pt = self.page_table.read();
            pt.iter().map(|(&pid, &fid)| (pid, fid)).collect()
        };
        pages.sort_unstable_by_key(|(pid, _)| *pid);

        let mut stamp = INITIAL_STAMP;
        let mut since_limit = 0;
        let mut written = 0;
        for (page_id, frame_id) in pages {
            if self.flush_frame(frame_id, page_id)? {
                written += 1;
                since_limit += 1;
                if since_limit >= batch {
                    stamp = limiter.maybe_limit(stamp, since_limit);
                    since_limit = 0;
                }
            }
        }

        Ok(written)
    }

    /// Force everything written to the store onto stable storage.
    pub fn sync(&self) -> Result<()> {
        self.store.lock().sync()
    }

    // ========================================================================
    // Public API: Stats and info
    // ========================================================================

    /// Get buffer pool statistics.
    pub fn stats(&self) -> &BufferPoolStats {
        &self.stats
    }

    /// Get the pool size.
    pub fn pool_size(&self) -> usize {
        self.frames.len()
    }

    /// Size of every page in bytes.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of pages the store currently backs.
    pub fn store_page_count(&self) -> u32 {
        self.store.lock().page_count()
    }

    /// Get the number of free frames.
    pub fn free_frame_count(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Get the number of pages in the buffer pool.
    pub fn page_count(&self) -> usize {
        self.page_table.read().len()
    }

    /// Pin count of a cached page, or None if it is not cached.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let pt = self.page_table.read();
        pt.get(&page_id)
            .map(|fid| self.frames[fid.index()].pin_count())
    }

    // ========================================================================
    // Internal: Called by PageGuard on drop
    // ========================================================================

    /// Unpin a page. Called by PageReadGuard/PageWriteGuard on drop.
    ///
    /// The last unpin hands a resident frame to the replacer, or returns a
    /// frame whose load failed to the free list.
    pub(crate) fn unpin_page_internal(&self, frame_id: FrameId, is_dirty: bool) {
        let frame = &self.frames[frame_id.index()];

        if is_dirty {
            frame.mark_dirty();
        }

        // Read while still pinned: a pinned frame only loses its page when
        // the load into it failed.
        let resident = frame.page_id();
        if frame.unpin() > 0 {
            return;
        }

        match resident {
            Some(page_id) => {
                let mut replacer = self.replacer.lock();
                // Skip the hand-off if the frame was pinned again or evicted
                // and reassigned since the unpin.
                if frame.pin_count() == 0 && frame.page_id() == Some(page_id) {
                    replacer.record_access(frame_id);
                    replacer.set_evictable(frame_id, true);
                }
            }
            None => self.free_list.lock().push(frame_id),
        }
    }

    // ========================================================================
    // Internal: Core fetch logic
    // ========================================================================

    /// Fetch a page into the buffer pool, returning its (pinned) frame ID.
    fn fetch_page_internal(&self, page_id: PageId) -> Result<FrameId> {
        if !page_id.is_valid() {
            return Err(Error::InvalidPageId(page_id.0));
        }

        if let Some(frame_id) = self.pin_if_cached(page_id) {
            self.stats.record_hit();
            return Ok(frame_id);
        }

        self.handle_cache_miss(page_id)
    }

    /// Pin the frame holding `page_id` if it is cached.
    fn pin_if_cached(&self, page_id: PageId) -> Option<FrameId> {
        let frame_id = {
            let pt = self.page_table.read();
            let frame_id = *pt.get(&page_id)?;
            // Pin under the read lock so eviction cannot take the frame.
            self.frames[frame_id.index()].pin();
            frame_id
        };

        self.record_pinned_access(frame_id);
        Some(frame_id)
    }

    fn record_pinned_access(&self, frame_id: FrameId) {
        let mut replacer = self.replacer.lock();
        replacer.record_access(frame_id);
        replacer.set_evictable(frame_id, false);
    }

    /// Handle a cache miss: reserve a frame for the page, then load it.
    ///
    /// The page-table entry is published with the frame already latched, so
    /// concurrent fetches of the page wait for the load instead of reading
    /// the store themselves. A write-back of the page can therefore never
    /// race with a load of an older copy.
    fn handle_cache_miss(&self, page_id: PageId) -> Result<FrameId> {
        let mut pt = self.page_table.write();
        if let Some(&existing) = pt.get(&page_id) {
            // Another thread loaded the same page first.
            self.frames[existing.index()].pin();
            drop(pt);
            self.record_pinned_access(existing);
            self.stats.record_hit();
            return Ok(existing);
        }
        let frame_id = match self.take_frame(&mut pt) {
            Ok(frame_id) => frame_id,
            Err(err) => {
                drop(pt);
                self.stats.record_failed_load(false);
                return Err(err);
            }
        };
        let frame = &self.frames[frame_id.index()];
        let mut page = frame.page_mut();
        frame.assign(page_id);
        frame.pin();
        pt.insert(page_id, frame_id);
        drop(pt);

        let read = self.store.lock().read_page(page_id, page.as_mut_slice());
        let loaded = read.and_then(|_| {
            if page.verify_checksum() {
                Ok(())
            } else {
                Err(Error::corruption(page_id, "page checksum mismatch"))
            }
        });
        if let Err(err) = loaded {
            // Waiters see the vacated frame and retry
            self.page_table.write().remove(&page_id);
            frame.vacate();
            page.reset();
            drop(page);
            self.stats.record_failed_load(err.is_corruption());
            self.unpin_page_internal(frame_id, false);
            return Err(err);
        }
        drop(page);

        self.stats.record_load();
        self.record_pinned_access(frame_id);
        Ok(frame_id)
    }

    // ========================================================================
    // Internal: Frame allocation and eviction
    // ========================================================================

    /// Get an unowned frame, evicting if necessary.
    ///
    /// Runs under the page-table write lock. Pins are only taken under that
    /// lock, so the pin check here cannot be overtaken by a cache hit.
    fn take_frame(&self, pt: &mut HashMap<PageId, FrameId>) -> Result<FrameId> {
        if let Some(frame_id) = self.free_list.lock().pop() {
            return Ok(frame_id);
        }

        for _ in 0..self.frames.len() {
            let frame_id = self.replacer.lock().evict().ok_or(Error::NoFreeFrames)?;
            let frame = &self.frames[frame_id.index()];

            if frame.is_pinned() {
                // Pinned by a cache hit after the replacer picked it.
                self.record_pinned_access(frame_id);
                continue;
            }
            let Some(old_page_id) = frame.page_id() else {
                // Stale entry for a frame on the free list
                continue;
            };

            // Write back under the table lock so nobody reloads a stale copy.
            if let Err(err) = self.flush_frame(frame_id, old_page_id) {
                warn!(page = %old_page_id, error = %err, "buffer.evict.write_back_failed");
                let mut replacer = self.replacer.lock();
                replacer.record_access(frame_id);
                replacer.set_evictable(frame_id, true);
                return Err(err);
            }
            pt.remove(&old_page_id);
            frame.vacate();

            self.stats.record_eviction();
            debug!(frame = %frame_id, page = %old_page_id, "buffer.evict");
            return Ok(frame_id);
        }

        Err(Error::NoFreeFrames)
    }

    /// Write a frame back to the store if it is dirty and still holds
    /// `page_id`. Returns whether a write happened.
    fn flush_frame(&self, frame_id: FrameId, page_id: PageId) -> Result<bool> {
        let frame = &self.frames[frame_id.index()];

        // Exclusive latch: the checksum is stamped into the page itself.
        let mut page = frame.page_mut();
        if !frame.take_dirty(page_id) {
            return Ok(false);
        }

        page.update_checksum();
        if let Err(err) = self.store.lock().write_page(page_id, page.as_slice()) {
            frame.mark_dirty();
            return Err(err);
        }
        drop(page);

        self.stats.record_write();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::{PageHeader, PageType};
    use crate::storage::MemoryStore;

    const PAGE_SIZE: usize = 256;

    fn create_test_pool(pool_size: usize) -> (BufferPoolManager, MemoryStore) {
        let store = MemoryStore::new(PAGE_SIZE);
        (
            BufferPoolManager::new(pool_size, Box::new(store.clone())),
            store,
        )
    }

    fn write_leaf_marker(guard: &mut PageWriteGuard<'_>, marker: u8) {
        guard.set_header(&PageHeader::new(PageType::BTreeLeaf, 1, 0));
        guard.as_mut_slice()[PAGE_SIZE - 1] = marker;
    }

    #[test]
    fn test_create_and_fetch() {
        let (pool, _store) = create_test_pool(10);

        {
            let mut guard = pool.create_page(PageId::new(3)).unwrap();
            write_leaf_marker(&mut guard, 0xAB);
        }

        let guard = pool.fetch_page_read(PageId::new(3)).unwrap();
        assert_eq!(guard.as_slice()[PAGE_SIZE - 1], 0xAB);
        assert_eq!(guard.page_type(), PageType::BTreeLeaf);
    }

    #[test]
    fn test_unflushed_pages_never_reach_store() {
        let (pool, store) = create_test_pool(10);

        {
            let mut guard = pool.create_page(PageId::new(0)).unwrap();
            write_leaf_marker(&mut guard, 1);
        }
        assert_eq!(store.page_count(), 0);

        pool.flush_all_pages().unwrap();
        assert_eq!(store.page_count(), 1);
    }

    #[test]
    fn test_cache_hit() {
        let (pool, _store) = create_test_pool(10);
        drop(pool.create_page(PageId::new(0)).unwrap());

        drop(pool.fetch_page_read(PageId::new(0)).unwrap());
        drop(pool.fetch_page_read(PageId::new(0)).unwrap());

        assert!(pool.stats().snapshot().cache_hits >= 2);
    }

    #[test]
    fn test_dirty_page_written_back_on_eviction() {
        let (pool, _store) = create_test_pool(1);

        {
            let mut guard = pool.create_page(PageId::new(0)).unwrap();
            write_leaf_marker(&mut guard, 0x42);
        }
        // Evicts page 0, which must be written back first
        drop(pool.create_page(PageId::new(1)).unwrap());

        let guard = pool.fetch_page_read(PageId::new(0)).unwrap();
        assert_eq!(guard.as_slice()[PAGE_SIZE - 1], 0x42);
        assert!(pool.stats().snapshot().evictions >= 1);
    }

    #[test]
    fn test_checksum_verified_on_load() {
        let (pool, store) = create_test_pool(1);

        {
            let mut guard = pool.create_page(PageId::new(0)).unwrap();
            write_leaf_marker(&mut guard, 0x10);
        }
        pool.flush_all_pages().unwrap();

        // Corrupt the stored copy behind the pool's back
        let mut raw = vec![0u8; PAGE_SIZE];
        let mut handle = store.clone();
        handle.read_page(PageId::new(0), &mut raw).unwrap();
        raw[PAGE_SIZE - 1] ^= 0xFF;
        handle.write_page(PageId::new(0), &raw).unwrap();

        // Push page 0 out of the pool, then reload it
        drop(pool.create_page(PageId::new(1)).unwrap());
        let err = pool.fetch_page_read(PageId::new(0)).err().unwrap();
        assert!(err.is_corruption());
        assert_eq!(pool.stats().snapshot().checksum_failures, 1);
        // The frame went back to the free list
        assert_eq!(pool.free_frame_count(), 1);
    }

    #[test]
    fn test_create_page_reuses_cached_frame() {
        let (pool, _store) = create_test_pool(4);

        {
            let mut guard = pool.create_page(PageId::new(2)).unwrap();
            write_leaf_marker(&mut guard, 9);
        }
        let guard = pool.create_page(PageId::new(2)).unwrap();
        assert!(guard.as_slice().iter().all(|&b| b == 0));
        drop(guard);
        assert_eq!(pool.page_count(), 1);
    }

    #[test]
    fn test_pin_count_tracking() {
        let (pool, _store) = create_test_pool(4);
        drop(pool.create_page(PageId::new(0)).unwrap());
        assert_eq!(pool.pin_count(PageId::new(0)), Some(0));

        let guard = pool.fetch_page_read(PageId::new(0)).unwrap();
        assert_eq!(pool.pin_count(PageId::new(0)), Some(1));
        drop(guard);
        assert_eq!(pool.pin_count(PageId::new(0)), Some(0));
        assert_eq!(pool.pin_count(PageId::new(9)), None);
    }

    #[test]
    fn test_page_not_found() {
        let (pool, _store) = create_test_pool(4);
        assert!(matches!(
            pool.fetch_page_read(PageId::new(999)),
            Err(Error::PageNotFound(999))
        ));
        assert_eq!(pool.free_frame_count(), 4);
    }

    #[test]
    fn test_no_free_frames() {
        let (pool, _store) = create_test_pool(2);

        let _guard1 = pool.create_page(PageId::new(0)).unwrap();
        let _guard2 = pool.create_page(PageId::new(1)).unwrap();

        assert!(matches!(
            pool.create_page(PageId::new(2)),
            Err(Error::NoFreeFrames)
        ));
    }

    #[test]
    fn test_flush_limited_counts_writes() {
        let (pool, _store) = create_test_pool(10);
        for i in 0..5 {
            let mut guard = pool.create_page(PageId::new(i)).unwrap();
            write_leaf_marker(&mut guard, i as u8);
        }

        assert_eq!(pool.flush_all_pages_limited(&Unlimited, 2).unwrap(), 5);
        // Nothing dirty any more
        assert_eq!(pool.flush_all_pages_limited(&Unlimited, 2).unwrap(), 0);
    }

    #[test]
    fn test_concurrent_reads() {
        use std::sync::Arc;
        use std::thread;

        let (pool, _store) = create_test_pool(10);
        let pool = Arc::new(pool);

        {
            let mut guard = pool.create_page(PageId::new(0)).unwrap();
            write_leaf_marker(&mut guard, 0x42);
        }

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    let guard = pool.fetch_page_read(PageId::new(0)).unwrap();
                    assert_eq!(guard.as_slice()[PAGE_SIZE - 1], 0x42);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
