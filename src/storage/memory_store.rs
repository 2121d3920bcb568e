//! In-memory [`PageStore`].
//!
//! Used for ephemeral trees and, through [`MemoryStore::snapshot`], for crash
//! simulation in tests: a snapshot holds exactly the pages that had reached
//! the store at that moment, which is what a crashed process leaves behind.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{Error, PageId, Result};
use crate::storage::PageStore;

/// A page store kept entirely in memory.
///
/// Cloning a `MemoryStore` yields another handle to the same pages, so a test
/// can keep a handle while the buffer pool owns the other one.
///
/// # Example
/// ```
/// use genbtree::storage::{MemoryStore, PageStore};
/// use genbtree::PageId;
///
/// let mut store = MemoryStore::new(128);
/// store.write_page(PageId::new(0), &[7u8; 128]).unwrap();
///
/// let crashed = store.snapshot();
/// store.write_page(PageId::new(0), &[9u8; 128]).unwrap();
///
/// let mut buf = [0u8; 128];
/// crashed.clone().read_page(PageId::new(0), &mut buf).unwrap();
/// assert_eq!(buf[0], 7);
/// ```
#[derive(Clone)]
pub struct MemoryStore {
    page_size: usize,
    pages: Arc<Mutex<Vec<Box<[u8]>>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            pages: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Deep copy of the current contents as an independent store.
    ///
    /// Anything still cached in a buffer pool is not part of the snapshot.
    /// Opening a tree on the snapshot is therefore equivalent to restarting
    /// after a crash at this instant.
    pub fn snapshot(&self) -> MemoryStore {
        let pages = self.pages.lock().clone();
        Self {
            page_size: self.page_size,
            pages: Arc::new(Mutex::new(pages)),
        }
    }
}

impl PageStore for MemoryStore {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn page_count(&self) -> u32 {
        self.pages.lock().len() as u32
    }

    fn read_page(&mut self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        let pages = self.pages.lock();
        let page = pages
            .get(page_id.0 as usize)
            .ok_or(Error::PageNotFound(page_id.0))?;
        buf.copy_from_slice(page);
        Ok(())
    }

    fn write_page(&mut self, page_id: PageId, data: &[u8]) -> Result<()> {
        if !page_id.is_valid() {
            return Err(Error::InvalidPageId(page_id.0));
        }
        let mut pages = self.pages.lock();
        let index = page_id.0 as usize;
        while pages.len() <= index {
            pages.push(vec![0u8; self.page_size].into_boxed_slice());
        }
        pages[index].copy_from_slice(data);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}
