//! RAII guards for page access.
//!
//! A guard is a pin on a frame plus the frame's page latch. Readers decode
//! nodes under a [`PageReadGuard`]; the writer mutates through a
//! [`PageWriteGuard`], which leaves the frame dirty. Tree code never holds
//! more than one write guard at a time.

use std::ops::{Deref, DerefMut};

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::common::{FrameId, PageId};
use crate::storage::page::Page;

use super::buffer_pool_manager::BufferPoolManager;

/// A pinned frame, unpinned on drop.
struct Pin<'a> {
    pool: &'a BufferPoolManager,
    frame_id: FrameId,
    page_id: PageId,
    dirty: bool,
}

impl Drop for Pin<'_> {
    fn drop(&mut self) {
        self.pool.unpin_page_internal(self.frame_id, self.dirty);
    }
}

/// Shared access to a cached page.
///
/// ```ignore
/// let guard = pool.fetch_page_read(page_id)?;
/// let node = Node::decode(layout, dims, page_id, &guard)?;
/// ```
pub struct PageReadGuard<'a> {
    // Declared first: the pin is released while the latch is still held
    pin: Pin<'a>,
    lock: RwLockReadGuard<'a, Page>,
}

impl<'a> PageReadGuard<'a> {
    pub(crate) fn new(
        pool: &'a BufferPoolManager,
        frame_id: FrameId,
        page_id: PageId,
        lock: RwLockReadGuard<'a, Page>,
    ) -> Self {
        Self {
            pin: Pin {
                pool,
                frame_id,
                page_id,
                dirty: false,
            },
            lock,
        }
    }

    #[inline]
    pub fn page_id(&self) -> PageId {
        self.pin.page_id
    }
}

impl Deref for PageReadGuard<'_> {
    type Target = Page;

    #[inline]
    fn deref(&self) -> &Page {
        &self.lock
    }
}

/// Exclusive access to a cached page.
///
/// The frame is marked dirty while the latch is still held, so a concurrent
/// write-back never clears the dirty bit for a change it did not write.
pub struct PageWriteGuard<'a> {
    pin: Pin<'a>,
    lock: RwLockWriteGuard<'a, Page>,
}

impl<'a> PageWriteGuard<'a> {
    pub(crate) fn new(
        pool: &'a BufferPoolManager,
        frame_id: FrameId,
        page_id: PageId,
        lock: RwLockWriteGuard<'a, Page>,
    ) -> Self {
        Self {
            pin: Pin {
                pool,
                frame_id,
                page_id,
                dirty: true,
            },
            lock,
        }
    }

    #[inline]
    pub fn page_id(&self) -> PageId {
        self.pin.page_id
    }
}

impl Deref for PageWriteGuard<'_> {
    type Target = Page;

    #[inline]
    fn deref(&self) -> &Page {
        &self.lock
    }
}

impl DerefMut for PageWriteGuard<'_> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Page {
        &mut self.lock
    }
}
