//! The page store contract.
//!
//! A [`PageStore`] is the durable home of pages. It knows nothing about
//! trees: it reads and writes whole pages by ID and can force everything it
//! has been handed to stable storage.

use crate::common::{PageId, Result};

/// Fixed-size page storage.
///
/// # Durability
/// A page handed to [`write_page`](PageStore::write_page) survives a crash
/// once [`sync`](PageStore::sync) has returned. Pages still cached in the
/// buffer pool (not yet written here) are lost on a crash; that is the whole
/// crash model the tree is built against.
///
/// # Thread Safety
/// Implementations are driven by the buffer pool, which serializes all calls
/// behind a mutex, so methods take `&mut self`.
pub trait PageStore: Send {
    /// Size of every page in bytes.
    fn page_size(&self) -> usize;

    /// Number of pages currently backed by the store.
    fn page_count(&self) -> u32;

    /// Read a page into `buf` (`buf.len() == page_size()`).
    ///
    /// # Errors
    /// Returns `Error::PageNotFound` if the page was never written.
    fn read_page(&mut self, page_id: PageId, buf: &mut [u8]) -> Result<()>;

    /// Write a page. Writing past the current end grows the store; any gap
    /// reads back as zeros.
    fn write_page(&mut self, page_id: PageId, data: &[u8]) -> Result<()>;

    /// Force all written pages to stable storage.
    fn sync(&mut self) -> Result<()>;
}
