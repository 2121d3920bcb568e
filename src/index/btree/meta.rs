//! Meta pages.
//!
//! The tree's durable state lives in two meta slots, pages 0 and 1. Every
//! write goes to the slot not holding the newest state, so a torn meta write
//! leaves the previous state readable. Open picks the valid slot with the
//! highest sequence number.
//!
//! # Layout (after the page header)
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//! 21      4     magic
//! 25      4     format version
//! 29      4     page size
//! 33      4     key size
//! 37      4     value size
//! 41      8     layout identifier
//! 49      4     root page
//! 53      8     stable generation
//! 61      8     unstable generation (highest generation a session may
//!               have written)
//! 69      4     freelist head
//! 73      4     high water (first never-allocated page)
//! 77      1     clean shutdown flag
//! 78      8     sequence
//! ```

use crate::buffer::BufferPoolManager;
use crate::common::{Error, PageId, Result};
use crate::index::Layout;
use crate::storage::page::{read_u32, read_u64, Page, PageHeader, PageType};

/// The two meta slots.
pub const META_SLOTS: [PageId; 2] = [PageId(0), PageId(1)];

/// First page available to nodes and freelist pages.
pub const FIRST_DATA_PAGE: u32 = 2;

const MAGIC: u32 = 0x4742_5452;
const FORMAT_VERSION: u32 = 1;

const OFFSET_MAGIC: usize = PageHeader::SIZE;
const OFFSET_VERSION: usize = OFFSET_MAGIC + 4;
const OFFSET_PAGE_SIZE: usize = OFFSET_VERSION + 4;
const OFFSET_KEY_SIZE: usize = OFFSET_PAGE_SIZE + 4;
const OFFSET_VALUE_SIZE: usize = OFFSET_KEY_SIZE + 4;
const OFFSET_LAYOUT: usize = OFFSET_VALUE_SIZE + 4;
const OFFSET_ROOT: usize = OFFSET_LAYOUT + 8;
const OFFSET_STABLE: usize = OFFSET_ROOT + 4;
const OFFSET_UNSTABLE: usize = OFFSET_STABLE + 8;
const OFFSET_FREELIST: usize = OFFSET_UNSTABLE + 8;
const OFFSET_HIGH_WATER: usize = OFFSET_FREELIST + 4;
const OFFSET_CLEAN: usize = OFFSET_HIGH_WATER + 4;
const OFFSET_SEQUENCE: usize = OFFSET_CLEAN + 1;

/// Decoded meta page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Meta {
    pub page_size: u32,
    pub key_size: u32,
    pub value_size: u32,
    pub layout_id: u64,
    pub root: PageId,
    pub stable: u64,
    pub unstable: u64,
    pub freelist_head: PageId,
    pub high_water: u32,
    pub clean: bool,
    pub sequence: u64,
}

impl Meta {
    /// State of a freshly formatted tree: an empty root leaf written in
    /// generation 1, which is stable.
    pub fn initial<L: Layout>(layout: &L, page_size: usize, root: PageId) -> Self {
        Self {
            page_size: page_size as u32,
            key_size: layout.key_size() as u32,
            value_size: layout.value_size() as u32,
            layout_id: layout.identifier(),
            root,
            stable: 1,
            unstable: 1,
            freelist_head: PageId::INVALID,
            high_water: root.0 + 1,
            clean: true,
            sequence: 1,
        }
    }

    /// The slot this state is written to.
    pub fn slot(&self) -> PageId {
        META_SLOTS[(self.sequence % 2) as usize]
    }

    /// Copy of this state to be written as the next sequence.
    pub fn next(&self) -> Self {
        Self {
            sequence: self.sequence + 1,
            ..*self
        }
    }

    pub fn encode(&self, page: &mut Page) {
        page.reset();
        page.set_header(&PageHeader::new(PageType::Meta, self.stable, 0));
        let data = page.as_mut_slice();
        put_u32(data, OFFSET_MAGIC, MAGIC);
        put_u32(data, OFFSET_VERSION, FORMAT_VERSION);
        put_u32(data, OFFSET_PAGE_SIZE, self.page_size);
        put_u32(data, OFFSET_KEY_SIZE, self.key_size);
        put_u32(data, OFFSET_VALUE_SIZE, self.value_size);
        put_u64(data, OFFSET_LAYOUT, self.layout_id);
        put_u32(data, OFFSET_ROOT, self.root.0);
        put_u64(data, OFFSET_STABLE, self.stable);
        put_u64(data, OFFSET_UNSTABLE, self.unstable);
        put_u32(data, OFFSET_FREELIST, self.freelist_head.0);
        put_u32(data, OFFSET_HIGH_WATER, self.high_water);
        data[OFFSET_CLEAN] = self.clean as u8;
        put_u64(data, OFFSET_SEQUENCE, self.sequence);
    }

    pub fn decode(page_id: PageId, page: &Page) -> Result<Self> {
        let data = page.as_slice();
        if page.page_type() != PageType::Meta {
            return Err(Error::corruption(page_id, "not a meta page"));
        }
        if read_u32(data, OFFSET_MAGIC) != MAGIC {
            return Err(Error::IncompatibleFormat("bad magic number".into()));
        }
        let version = read_u32(data, OFFSET_VERSION);
        if version != FORMAT_VERSION {
            return Err(Error::IncompatibleFormat(format!(
                "format version {}, expected {}",
                version, FORMAT_VERSION
            )));
        }

        let meta = Self {
            page_size: read_u32(data, OFFSET_PAGE_SIZE),
            key_size: read_u32(data, OFFSET_KEY_SIZE),
            value_size: read_u32(data, OFFSET_VALUE_SIZE),
            layout_id: read_u64(data, OFFSET_LAYOUT),
            root: PageId::new(read_u32(data, OFFSET_ROOT)),
            stable: read_u64(data, OFFSET_STABLE),
            unstable: read_u64(data, OFFSET_UNSTABLE),
            freelist_head: PageId::new(read_u32(data, OFFSET_FREELIST)),
            high_water: read_u32(data, OFFSET_HIGH_WATER),
            clean: data[OFFSET_CLEAN] != 0,
            sequence: read_u64(data, OFFSET_SEQUENCE),
        };

        if meta.stable == 0 || meta.unstable < meta.stable {
            return Err(Error::corruption(
                page_id,
                format!("generations stable {} unstable {}", meta.stable, meta.unstable),
            ));
        }
        if !meta.root.is_valid() || meta.root.0 < FIRST_DATA_PAGE || meta.root.0 >= meta.high_water
        {
            return Err(Error::corruption(
                page_id,
                format!("root {} outside data pages", meta.root),
            ));
        }

        Ok(meta)
    }

    /// Check that the tree was written with this layout and page size.
    pub fn validate<L: Layout>(&self, layout: &L, page_size: usize) -> Result<()> {
        if self.page_size as usize != page_size {
            return Err(Error::IncompatibleFormat(format!(
                "page size {} on disk, {} requested",
                self.page_size, page_size
            )));
        }
        if self.key_size as usize != layout.key_size()
            || self.value_size as usize != layout.value_size()
        {
            return Err(Error::IncompatibleFormat(format!(
                "entry size {}+{} on disk, layout uses {}+{}",
                self.key_size,
                self.value_size,
                layout.key_size(),
                layout.value_size()
            )));
        }
        if self.layout_id != layout.identifier() {
            return Err(Error::IncompatibleFormat(format!(
                "layout {:#x} on disk, {:#x} supplied",
                self.layout_id,
                layout.identifier()
            )));
        }
        Ok(())
    }
}

/// Read both slots and return the newest valid state.
pub fn read_newest(pool: &BufferPoolManager) -> Result<Meta> {
    let mut newest: Option<Meta> = None;
    let mut first_error = None;

    for slot in META_SLOTS {
        let decoded = pool
            .fetch_page_read(slot)
            .and_then(|guard| Meta::decode(slot, &guard));
        match decoded {
            Ok(meta) => {
                if newest.map_or(true, |current| meta.sequence > current.sequence) {
                    newest = Some(meta);
                }
            }
            Err(err @ Error::Io(_)) => return Err(err),
            Err(err) => {
                first_error.get_or_insert(err);
            }
        }
    }

    newest.ok_or_else(|| {
        first_error.unwrap_or_else(|| Error::corruption(META_SLOTS[0], "no valid meta page"))
    })
}

/// Durably write `meta` to its slot.
pub fn write(pool: &BufferPoolManager, meta: &Meta) -> Result<()> {
    let slot = meta.slot();
    {
        let mut guard = pool.create_page(slot)?;
        meta.encode(&mut guard);
    }
    pool.flush_page(slot)?;
    pool.sync()
}

fn put_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn put_u64(data: &mut [u8], offset: usize, value: u64) {
    data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}
