//! Disk Manager - file-backed [`PageStore`].
//!
//! The [`DiskManager`] handles all direct file operations:
//! - Reading and writing pages
//! - Growing the file when pages past the end are written
//! - Forcing data to disk on `sync`

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::debug;

use crate::common::{Error, PageId, Result};
use crate::storage::PageStore;

/// Manages disk I/O for a single tree file.
///
/// # File Layout
/// The tree is stored as a single file with pages laid out sequentially:
/// ```text
/// ┌─────────┬─────────┬─────────┬─────────┬─────────┐
/// │ Page 0  │ Page 1  │ Page 2  │  ...    │ Page N  │
/// │ (meta)  │         │         │         │         │
/// └─────────┴─────────┴─────────┴─────────┴─────────┘
/// Offset:  0    P       2P        ...      N×P
/// ```
///
/// Page N is located at file offset `N × page_size`.
///
/// # Durability
/// Writes go to the OS; `sync()` calls `fsync()`. The tree calls `sync` at
/// checkpoints and when it rewrites the meta page, which is where durability
/// is actually needed.
pub struct DiskManager {
    file: File,
    page_size: usize,
    /// Number of pages in the file.
    page_count: u32,
}

impl DiskManager {
    /// Create a new tree file.
    ///
    /// # Errors
    /// Returns an error if the file already exists or cannot be created.
    pub fn create<P: AsRef<Path>>(path: P, page_size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path.as_ref())?;

        debug!(path = %path.as_ref().display(), page_size, "disk.create");
        Ok(Self {
            file,
            page_size,
            page_count: 0,
        })
    }

    /// Open an existing tree file.
    ///
    /// # Errors
    /// Returns an error if the file doesn't exist, cannot be opened, or its
    /// length is not a multiple of `page_size`.
    pub fn open<P: AsRef<Path>>(path: P, page_size: usize) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;

        let file_size = file.metadata()?.len();
        if file_size % page_size as u64 != 0 {
            return Err(Error::IncompatibleFormat(format!(
                "file size {} is not a multiple of page size {}",
                file_size, page_size
            )));
        }
        let page_count = (file_size / page_size as u64) as u32;

        debug!(path = %path.as_ref().display(), page_size, page_count, "disk.open");
        Ok(Self {
            file,
            page_size,
            page_count,
        })
    }

    /// Open an existing tree file, or create if it doesn't exist.
    pub fn open_or_create<P: AsRef<Path>>(path: P, page_size: usize) -> Result<Self> {
        if path.as_ref().exists() {
            Self::open(path, page_size)
        } else {
            Self::create(path, page_size)
        }
    }

    /// Get the total size of the file in bytes.
    #[inline]
    pub fn file_size(&self) -> u64 {
        PageId::new(self.page_count).offset(self.page_size)
    }
}

impl PageStore for DiskManager {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn read_page(&mut self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        if page_id.0 >= self.page_count {
            return Err(Error::PageNotFound(page_id.0));
        }

        self.file.seek(SeekFrom::Start(page_id.offset(self.page_size)))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn write_page(&mut self, page_id: PageId, data: &[u8]) -> Result<()> {
        if !page_id.is_valid() {
            return Err(Error::InvalidPageId(page_id.0));
        }
        debug_assert_eq!(data.len(), self.page_size);

        // Writing past the end leaves a hole that reads back as zeros.
        self.file.seek(SeekFrom::Start(page_id.offset(self.page_size)))?;
        self.file.write_all(data)?;

        if page_id.0 >= self.page_count {
            self.page_count = page_id.0 + 1;
        }
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}
