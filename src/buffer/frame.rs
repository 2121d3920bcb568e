//! Frame - a slot in the buffer pool.
//!
//! A frame owns one page buffer (the page latch) and a packed residency
//! word naming the cached page and whether it differs from the store copy.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::PageId;
use crate::storage::page::Page;

/// Bit set while a page is resident.
const RESIDENT: u64 = 1 << 32;
/// Bit set while the cached copy has not been written back.
const DIRTY: u64 = 1 << 33;
const PAGE_MASK: u64 = u32::MAX as u64;

/// A frame in the buffer pool.
///
/// Residency and dirtiness share one atomic word so write-back can check
/// "still holds this page and is dirty" and clear the dirty bit in a single
/// step.
pub struct Frame {
    /// Page latch taken by guards and by write-back.
    page: RwLock<Page>,
    /// `RESIDENT | DIRTY | page id`, or 0 when empty.
    residency: AtomicU64,
    pin_count: AtomicU32,
}

impl Frame {
    /// An empty frame holding a zeroed page of `page_size` bytes.
    pub fn new(page_size: usize) -> Self {
        Self {
            page: RwLock::new(Page::new(page_size)),
            residency: AtomicU64::new(0),
            pin_count: AtomicU32::new(0),
        }
    }

    #[inline]
    pub fn page(&self) -> RwLockReadGuard<'_, Page> {
        self.page.read()
    }

    #[inline]
    pub fn page_mut(&self) -> RwLockWriteGuard<'_, Page> {
        self.page.write()
    }

    // ========================================================================
    // Residency
    // ========================================================================

    /// The page held by this frame, if any.
    #[inline]
    pub fn page_id(&self) -> Option<PageId> {
        let word = self.residency.load(Ordering::Acquire);
        (word & RESIDENT != 0).then(|| PageId::new((word & PAGE_MASK) as u32))
    }

    /// Make `page_id` resident with a clean copy.
    pub fn assign(&self, page_id: PageId) {
        self.residency
            .store(RESIDENT | page_id.0 as u64, Ordering::Release);
    }

    /// Forget the resident page, dirty or not.
    pub fn vacate(&self) {
        self.residency.store(0, Ordering::Release);
    }

    #[inline]
    pub fn mark_dirty(&self) {
        self.residency.fetch_or(DIRTY, Ordering::AcqRel);
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.residency.load(Ordering::Acquire) & DIRTY != 0
    }

    /// Clear the dirty bit if the frame still holds `page_id` and is dirty.
    ///
    /// Returns whether the caller now owns the write-back. On a failed write
    /// the caller must call [`mark_dirty`](Self::mark_dirty) again.
    pub fn take_dirty(&self, page_id: PageId) -> bool {
        let dirty = RESIDENT | DIRTY | page_id.0 as u64;
        self.residency
            .compare_exchange(
                dirty,
                dirty & !DIRTY,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    // ========================================================================
    // Pinning
    // ========================================================================

    /// Returns the new pin count.
    #[inline]
    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Returns the new pin count.
    ///
    /// # Panics
    /// Panics if the frame is not pinned.
    #[inline]
    pub fn unpin(&self) -> u32 {
        let old = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        assert!(old > 0, "pin count underflow");
        old - 1
    }

    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_frame_is_empty() {
        let frame = Frame::new(256);
        assert_eq!(frame.page_id(), None);
        assert!(!frame.is_pinned());
        assert!(!frame.is_dirty());
        assert_eq!(frame.page().size(), 256);
    }

    #[test]
    fn test_assign_and_vacate() {
        let frame = Frame::new(128);
        frame.assign(PageId::new(0));
        assert_eq!(frame.page_id(), Some(PageId::new(0)));

        frame.assign(PageId::new(u32::MAX - 1));
        assert_eq!(frame.page_id(), Some(PageId::new(u32::MAX - 1)));

        frame.mark_dirty();
        frame.vacate();
        assert_eq!(frame.page_id(), None);
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_assign_starts_clean() {
        let frame = Frame::new(128);
        frame.assign(PageId::new(3));
        frame.mark_dirty();
        frame.assign(PageId::new(4));
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_take_dirty_checks_page() {
        let frame = Frame::new(128);
        frame.assign(PageId::new(7));
        assert!(!frame.take_dirty(PageId::new(7)));

        frame.mark_dirty();
        assert!(!frame.take_dirty(PageId::new(8)));
        assert!(frame.is_dirty());

        assert!(frame.take_dirty(PageId::new(7)));
        assert!(!frame.is_dirty());
        assert_eq!(frame.page_id(), Some(PageId::new(7)));
        // Only one caller wins the write-back
        assert!(!frame.take_dirty(PageId::new(7)));
    }

    #[test]
    fn test_pin_unpin() {
        let frame = Frame::new(128);

        assert_eq!(frame.pin(), 1);
        assert_eq!(frame.pin(), 2);
        assert_eq!(frame.unpin(), 1);
        assert!(frame.is_pinned());
        assert_eq!(frame.unpin(), 0);
        assert!(!frame.is_pinned());
    }

    #[test]
    #[should_panic(expected = "pin count underflow")]
    fn test_unpin_underflow() {
        Frame::new(128).unpin();
    }

    #[test]
    fn test_concurrent_mark_dirty_and_pin() {
        use std::thread;

        let frame = Frame::new(128);
        frame.assign(PageId::new(1));
        thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..100 {
                        frame.pin();
                        frame.mark_dirty();
                    }
                });
            }
        });

        assert_eq!(frame.pin_count(), 800);
        assert_eq!(frame.page_id(), Some(PageId::new(1)));
        assert!(frame.take_dirty(PageId::new(1)));
    }
}
