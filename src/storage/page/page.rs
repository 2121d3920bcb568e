//! Page - the fundamental unit of storage.
//!
//! A [`Page`] is a raw byte buffer of the tree's page size that serves as the
//! unit of I/O between the page store and memory. Pages are held in
//! [`Frame`](crate::buffer::Frame)s within the buffer pool.

use super::page_header::{PageHeader, PageType};

/// A page of data.
///
/// The size is fixed when the page is created and matches the page store's
/// page size for the lifetime of the tree.
///
/// # Clone Implementation
/// `Page` does NOT implement `Clone` in production code: copying a page is
/// expensive and should be explicit (see [`Page::copy_from`]). A `#[cfg(test)]`
/// Clone is provided for tests.
///
/// # Example
/// ```
/// use genbtree::storage::page::Page;
///
/// let mut page = Page::new(256);
/// page.as_mut_slice()[0] = 0xFF;
/// assert_eq!(page.as_slice()[0], 0xFF);
/// assert_eq!(page.size(), 256);
/// ```
pub struct Page {
    data: Box<[u8]>,
}

impl Page {
    /// Create a new zeroed page.
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0u8; size].into_boxed_slice(),
        }
    }

    /// Get immutable slice of page data.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Get mutable slice of page data.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Zero out the entire page.
    pub fn reset(&mut self) {
        self.data.fill(0);
    }

    /// Size of this page in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Overwrite this page with the contents of `src`.
    ///
    /// # Panics
    /// Panics if the sizes differ.
    pub fn copy_from(&mut self, src: &[u8]) {
        self.data.copy_from_slice(src);
    }

    /// Read the page header.
    pub fn header(&self) -> PageHeader {
        PageHeader::from_bytes(&self.data)
    }

    /// Write a page header.
    pub fn set_header(&mut self, header: &PageHeader) {
        header.write_to(&mut self.data);
    }

    /// Page type from the header.
    pub fn page_type(&self) -> PageType {
        PageType::from_u8(self.data[PageHeader::OFFSET_PAGE_TYPE])
    }

    /// Overwrite only the stamp field of the header.
    pub fn set_stamp(&mut self, stamp: u64) {
        self.data[PageHeader::OFFSET_STAMP..PageHeader::OFFSET_STAMP + 8]
            .copy_from_slice(&stamp.to_le_bytes());
    }

    /// Compute and store checksum in the header.
    ///
    /// Call this after all modifications to the page are complete.
    pub fn update_checksum(&mut self) {
        let checksum = PageHeader::compute_checksum(&self.data);
        self.data[PageHeader::OFFSET_CHECKSUM..PageHeader::OFFSET_CHECKSUM + 4]
            .copy_from_slice(&checksum.to_le_bytes());
    }

    /// Verify the page checksum is valid.
    ///
    /// A never-written page (type `Invalid`, all zeros) carries no checksum
    /// and is always accepted.
    pub fn verify_checksum(&self) -> bool {
        let header = self.header();
        header.page_type == PageType::Invalid || header.verify_checksum(&self.data)
    }
}

// Clone only available in tests - forces explicit copying in production
#[cfg(test)]
impl Clone for Page {
    fn clone(&self) -> Self {
        let mut new_page = Page::new(self.size());
        new_page.copy_from(&self.data);
        new_page
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_new_is_zeroed() {
        let page = Page::new(512);
        assert_eq!(page.size(), 512);
        assert!(page.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_page_reset() {
        let mut page = Page::new(256);
        page.as_mut_slice()[0] = 0xFF;
        page.as_mut_slice()[100] = 0xAB;

        page.reset();

        assert_eq!(page.as_slice()[0], 0);
        assert_eq!(page.as_slice()[100], 0);
    }

    #[test]
    fn test_page_header_access() {
        let mut page = Page::new(256);
        page.set_header(&PageHeader::new(PageType::BTreeLeaf, 7, 9));

        assert_eq!(page.page_type(), PageType::BTreeLeaf);
        assert_eq!(page.header().generation, 7);

        page.set_stamp(11);
        assert_eq!(page.header().stamp, 11);
    }

    #[test]
    fn test_zero_page_passes_checksum() {
        let page = Page::new(256);
        assert!(page.verify_checksum());
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let mut page = Page::new(256);
        page.set_header(&PageHeader::new(PageType::BTreeLeaf, 1, 1));
        page.as_mut_slice()[200] = 0x42;
        page.update_checksum();
        assert!(page.verify_checksum());

        page.as_mut_slice()[200] = 0x43;
        assert!(!page.verify_checksum());
    }

    #[test]
    fn test_page_clone_in_tests() {
        let mut page = Page::new(128);
        page.as_mut_slice()[0] = 0xAB;

        let cloned = page.clone();
        assert_eq!(cloned.as_slice()[0], 0xAB);
        assert_eq!(cloned.size(), 128);
    }
}
