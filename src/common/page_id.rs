//! Page identifier type.

use std::fmt;

/// Identifies a page in the page store.
///
/// Page N lives at byte offset `N × page_size`. Pages 0 and 1 hold the
/// tree's two meta slots; node and freelist pages start at 2.
///
/// # Example
/// ```
/// use genbtree::PageId;
///
/// let page_id = PageId::new(42);
/// assert!(page_id.is_valid());
/// assert_eq!(page_id.0, 42);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub u32);

impl PageId {
    /// Invalid/sentinel page ID.
    ///
    /// On disk this encodes "no page" (no sibling, empty freelist, ...).
    pub const INVALID: PageId = PageId(u32::MAX);

    /// Size of an encoded page ID in bytes.
    pub const SIZE: usize = 4;

    /// Create a new PageId.
    #[inline]
    pub fn new(id: u32) -> Self {
        PageId(id)
    }

    /// Check if this page ID is valid (not the sentinel value).
    #[inline]
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }

    /// Byte offset of this page in a store with the given page size.
    #[inline]
    pub fn offset(&self, page_size: usize) -> u64 {
        self.0 as u64 * page_size as u64
    }

    /// Decode from the first four bytes of `buf` (little-endian).
    pub fn read_from(buf: &[u8]) -> Self {
        let mut bytes = [0u8; Self::SIZE];
        bytes.copy_from_slice(&buf[..Self::SIZE]);
        PageId(u32::from_le_bytes(bytes))
    }

    /// Encode into the first four bytes of `buf` (little-endian).
    pub fn write_to(&self, buf: &mut [u8]) {
        buf[..Self::SIZE].copy_from_slice(&self.0.to_le_bytes());
    }

    /// `None` for the sentinel, `Some(self)` otherwise.
    #[inline]
    pub fn into_option(self) -> Option<PageId> {
        self.is_valid().then_some(self)
    }

    /// Sentinel-encode an optional page ID.
    #[inline]
    pub fn from_option(page_id: Option<PageId>) -> PageId {
        page_id.unwrap_or(Self::INVALID)
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "Page(INVALID)")
        } else {
            write!(f, "Page({})", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_id_invalid() {
        assert!(!PageId::INVALID.is_valid());
        assert_eq!(PageId::INVALID.0, u32::MAX);
    }

    #[test]
    fn test_page_id_encoding() {
        let mut buf = [0u8; 6];
        PageId::new(0x0403_0201).write_to(&mut buf[1..]);
        assert_eq!(&buf[1..5], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(PageId::read_from(&buf[1..]), PageId::new(0x0403_0201));
    }

    #[test]
    fn test_page_id_option_sentinel() {
        assert_eq!(PageId::INVALID.into_option(), None);
        assert_eq!(PageId::new(3).into_option(), Some(PageId::new(3)));
        assert_eq!(PageId::from_option(None), PageId::INVALID);
    }

    #[test]
    fn test_page_id_offset() {
        assert_eq!(PageId::new(3).offset(256), 768);
    }

    #[test]
    fn test_page_id_display() {
        assert_eq!(format!("{}", PageId::new(42)), "Page(42)");
        assert_eq!(format!("{}", PageId::INVALID), "Page(INVALID)");
    }
}
