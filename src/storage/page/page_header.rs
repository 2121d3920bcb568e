//! Page header and type definitions.
//!
//! Every page starts with a [`PageHeader`] containing metadata:
//! - [`PageType`] discriminator
//! - CRC32 checksum for integrity
//! - Generation the page content was written in
//! - Change stamp used by readers to notice structural changes

/// Type of page stored on disk.
///
/// Uses `#[repr(u8)]` to guarantee a 1-byte representation for serialization.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    /// Never written (all zeros) or unknown.
    #[default]
    Invalid = 0,
    /// Tree meta page (always page 0).
    Meta = 1,
    /// B-tree internal (routing) node.
    BTreeInternal = 2,
    /// B-tree leaf node.
    BTreeLeaf = 3,
    /// Page of the persisted freelist chain.
    FreeList = 4,
}

impl PageType {
    /// Convert from u8, returning Invalid for unknown values.
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => PageType::Meta,
            2 => PageType::BTreeInternal,
            3 => PageType::BTreeLeaf,
            4 => PageType::FreeList,
            _ => PageType::Invalid,
        }
    }

    /// Leaf or internal node.
    pub fn is_node(&self) -> bool {
        matches!(self, PageType::BTreeInternal | PageType::BTreeLeaf)
    }
}

/// Metadata stored at the beginning of every page.
///
/// # Layout (21 bytes)
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       1     page_type (PageType as u8)
/// 1       4     checksum (CRC32, little-endian)
/// 5       8     generation (little-endian)
/// 13      8     stamp (little-endian)
/// ```
///
/// # Checksum
/// The checksum is computed over the entire page with the checksum field
/// itself set to zero. The buffer pool stamps it on write-back and verifies it
/// when a page is loaded, so page-level code never has to maintain it.
///
/// # Generation
/// The checkpoint generation in which the page content was last written. A
/// page whose generation is older than the writer's must be copied before it
/// is modified.
///
/// # Stamp
/// Bumped whenever a node loses keys to a split, gains a successor, or is
/// rebuilt from a reused page. Readers compare stamps to detect that a page
/// they looked at has changed shape underneath them.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    /// Type of this page.
    pub page_type: PageType,
    /// CRC32 checksum of the page contents.
    pub checksum: u32,
    /// Generation of the last write.
    pub generation: u64,
    /// Structural change stamp.
    pub stamp: u64,
}

impl PageHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = 21;

    /// Offset of each field within the header.
    pub const OFFSET_PAGE_TYPE: usize = 0;
    pub const OFFSET_CHECKSUM: usize = 1;
    pub const OFFSET_GENERATION: usize = 5;
    pub const OFFSET_STAMP: usize = 13;

    /// Create a new header with the given page type, generation and stamp.
    pub fn new(page_type: PageType, generation: u64, stamp: u64) -> Self {
        Self {
            page_type,
            checksum: 0,
            generation,
            stamp,
        }
    }

    /// Read a header from the beginning of a byte slice.
    ///
    /// # Panics
    /// Panics if `data.len() < PageHeader::SIZE`.
    pub fn from_bytes(data: &[u8]) -> Self {
        assert!(data.len() >= Self::SIZE, "buffer too small for PageHeader");

        Self {
            page_type: PageType::from_u8(data[Self::OFFSET_PAGE_TYPE]),
            checksum: read_u32(data, Self::OFFSET_CHECKSUM),
            generation: read_u64(data, Self::OFFSET_GENERATION),
            stamp: read_u64(data, Self::OFFSET_STAMP),
        }
    }

    /// Write this header to the beginning of a byte slice.
    ///
    /// # Panics
    /// Panics if `data.len() < PageHeader::SIZE`.
    pub fn write_to(&self, data: &mut [u8]) {
        assert!(data.len() >= Self::SIZE, "buffer too small for PageHeader");

        data[Self::OFFSET_PAGE_TYPE] = self.page_type as u8;
        data[Self::OFFSET_CHECKSUM..Self::OFFSET_CHECKSUM + 4]
            .copy_from_slice(&self.checksum.to_le_bytes());
        data[Self::OFFSET_GENERATION..Self::OFFSET_GENERATION + 8]
            .copy_from_slice(&self.generation.to_le_bytes());
        data[Self::OFFSET_STAMP..Self::OFFSET_STAMP + 8].copy_from_slice(&self.stamp.to_le_bytes());
    }

    /// Compute CRC32 checksum of a page.
    ///
    /// The checksum is computed with the checksum field (bytes 1-4) zeroed out,
    /// so the checksum doesn't include itself.
    pub fn compute_checksum(page_data: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&page_data[..Self::OFFSET_CHECKSUM]);
        hasher.update(&[0u8; 4]);
        hasher.update(&page_data[Self::OFFSET_CHECKSUM + 4..]);
        hasher.finalize()
    }

    /// Verify that the stored checksum matches the computed checksum.
    pub fn verify_checksum(&self, page_data: &[u8]) -> bool {
        self.checksum == Self::compute_checksum(page_data)
    }
}

/// Read a little-endian u32 at `offset`.
pub(crate) fn read_u32(data: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

/// Read a little-endian u64 at `offset`.
pub(crate) fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

/// Read a little-endian u16 at `offset`.
pub(crate) fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

// ============================================================================
// TESTS
// ============================================================================
