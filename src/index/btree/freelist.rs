//! Freelist of reclaimed pages.
//!
//! Superseded node pages are pushed with the generation that superseded them.
//! An entry may be handed out again once that generation is durable and no
//! live reader started at or before it.
//!
//! At every checkpoint the whole list is written to a fresh chain of freelist
//! pages; the previous chain's pages are freed in the same step.
//!
//! # Page layout (after the page header)
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//! 21      4     next chain page (INVALID for the last)
//! 25      2     entry count
//! 27      12*n  entries: page id (u32), freed generation (u64)
//! ```

use std::collections::{HashSet, VecDeque};

use crate::buffer::BufferPoolManager;
use crate::common::{Error, PageId, Result};
use crate::storage::page::{read_u16, read_u64, PageHeader, PageType};

const OFFSET_NEXT: usize = PageHeader::SIZE;
const OFFSET_COUNT: usize = OFFSET_NEXT + PageId::SIZE;
const OFFSET_ENTRIES: usize = OFFSET_COUNT + 2;
const ENTRY_SIZE: usize = PageId::SIZE + 8;

/// A reclaimed page and the generation in which it was freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeEntry {
    pub page_id: PageId,
    pub freed_in: u64,
}

/// In-memory freelist, oldest entries first.
///
/// Entries are pushed with the current generation, which never decreases, so
/// the front entry is always the oldest.
#[derive(Debug, Default, Clone)]
pub struct FreeList {
    entries: VecDeque<FreeEntry>,
}

impl FreeList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, page_id: PageId, freed_in: u64) {
        self.entries.push_back(FreeEntry { page_id, freed_in });
    }

    /// Take the oldest entry if it may be reused: freed in a durable
    /// generation older than every live reader's start generation.
    pub fn pop_reusable(&mut self, stable: u64, oldest_reader: Option<u64>) -> Option<PageId> {
        let front = self.entries.front()?;
        let durable = front.freed_in <= stable;
        let unobserved = oldest_reader.map_or(true, |start| front.freed_in < start);
        if durable && unobserved {
            self.entries.pop_front().map(|entry| entry.page_id)
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FreeEntry> {
        self.entries.iter()
    }

    /// Entries one chain page holds.
    pub fn entries_per_page(page_size: usize) -> usize {
        (page_size - OFFSET_ENTRIES) / ENTRY_SIZE
    }

    /// Chain pages needed to hold `entries` entries.
    pub fn pages_needed(entries: usize, page_size: usize) -> usize {
        entries.div_ceil(Self::entries_per_page(page_size))
    }

    /// Read the chain starting at `head`. Returns the list and the chain's
    /// own pages.
    pub fn load(pool: &BufferPoolManager, head: PageId) -> Result<(Self, Vec<PageId>)> {
        let mut list = Self::new();
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = head;

        while next.is_valid() {
            if !seen.insert(next) {
                return Err(Error::corruption(next, "cycle in freelist chain"));
            }
            let guard = pool.fetch_page_read(next)?;
            if guard.page_type() != PageType::FreeList {
                return Err(Error::corruption(next, "expected a freelist page"));
            }
            let data = guard.as_slice();
            let count = read_u16(data, OFFSET_COUNT) as usize;
            if count > Self::entries_per_page(data.len()) {
                return Err(Error::corruption(
                    next,
                    format!("freelist page holds {} entries", count),
                ));
            }
            for i in 0..count {
                let at = OFFSET_ENTRIES + i * ENTRY_SIZE;
                list.push(
                    PageId::read_from(&data[at..]),
                    read_u64(data, at + PageId::SIZE),
                );
            }
            chain.push(next);
            next = PageId::read_from(&data[OFFSET_NEXT..]);
        }

        Ok((list, chain))
    }

    /// Write `entries` across the pages of `chain` in order. Returns the
    /// chain head, INVALID if the chain is empty.
    ///
    /// # Errors
    /// `Error::CorruptionDetected` if `chain` is too short for `entries`;
    /// nothing is written in that case.
    pub fn write_chain(
        pool: &BufferPoolManager,
        chain: &[PageId],
        entries: &[FreeEntry],
        generation: u64,
    ) -> Result<PageId> {
        let per_page = Self::entries_per_page(pool.page_size());
        if chain.len() * per_page < entries.len() {
            return Err(Error::corruption(
                chain.first().copied().unwrap_or(PageId::INVALID),
                format!(
                    "freelist chain of {} pages cannot hold {} entries",
                    chain.len(),
                    entries.len()
                ),
            ));
        }

        let mut chunks = entries.chunks(per_page);
        for (i, &page_id) in chain.iter().enumerate() {
            let chunk = chunks.next().unwrap_or(&[]);
            let next = chain.get(i + 1).copied().unwrap_or(PageId::INVALID);

            let mut guard = pool.create_page(page_id)?;
            guard.set_header(&PageHeader::new(PageType::FreeList, generation, 0));
            let data = guard.as_mut_slice();
            next.write_to(&mut data[OFFSET_NEXT..]);
            data[OFFSET_COUNT..OFFSET_COUNT + 2].copy_from_slice(&(chunk.len() as u16).to_le_bytes());
            for (j, entry) in chunk.iter().enumerate() {
                let at = OFFSET_ENTRIES + j * ENTRY_SIZE;
                entry.page_id.write_to(&mut data[at..]);
                data[at + PageId::SIZE..at + ENTRY_SIZE]
                    .copy_from_slice(&entry.freed_in.to_le_bytes());
            }
        }

        Ok(chain.first().copied().unwrap_or(PageId::INVALID))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    const PAGE_SIZE: usize = 128;

    #[test]
    fn test_reuse_requires_durable_generation() {
        let mut list = FreeList::new();
        list.push(PageId::new(5), 3);

        assert_eq!(list.pop_reusable(2, None), None);
        assert_eq!(list.pop_reusable(3, None), Some(PageId::new(5)));
        assert!(list.is_empty());
    }

    #[test]
    fn test_reuse_waits_for_old_readers() {
        let mut list = FreeList::new();
        list.push(PageId::new(5), 3);

        // A reader that started in generation 3 may still see the page
        assert_eq!(list.pop_reusable(4, Some(3)), None);
        assert_eq!(list.pop_reusable(4, Some(4)), Some(PageId::new(5)));
    }

    #[test]
    fn test_reuse_is_fifo() {
        let mut list = FreeList::new();
        list.push(PageId::new(9), 1);
        list.push(PageId::new(4), 2);

        assert_eq!(list.pop_reusable(5, None), Some(PageId::new(9)));
        assert_eq!(list.pop_reusable(5, None), Some(PageId::new(4)));
        assert_eq!(list.pop_reusable(5, None), None);
    }

    #[test]
    fn test_pages_needed() {
        let per_page = FreeList::entries_per_page(PAGE_SIZE);
        assert_eq!(per_page, 8);
        assert_eq!(FreeList::pages_needed(0, PAGE_SIZE), 0);
        assert_eq!(FreeList::pages_needed(8, PAGE_SIZE), 1);
        assert_eq!(FreeList::pages_needed(9, PAGE_SIZE), 2);
    }

    #[test]
    fn test_chain_write_and_load() {
        let pool = BufferPoolManager::new(8, Box::new(MemoryStore::new(PAGE_SIZE)));
        let entries: Vec<FreeEntry> = (0..11)
            .map(|i| FreeEntry {
                page_id: PageId::new(100 + i),
                freed_in: 1 + i as u64 / 4,
            })
            .collect();
        let chain = [PageId::new(7), PageId::new(3)];

        let head = FreeList::write_chain(&pool, &chain, &entries, 4).unwrap();
        assert_eq!(head, PageId::new(7));

        let (list, loaded_chain) = FreeList::load(&pool, head).unwrap();
        assert_eq!(loaded_chain, chain.to_vec());
        assert_eq!(list.iter().copied().collect::<Vec<_>>(), entries);
    }

    #[test]
    fn test_empty_chain() {
        let pool = BufferPoolManager::new(8, Box::new(MemoryStore::new(PAGE_SIZE)));
        let head = FreeList::write_chain(&pool, &[], &[], 2).unwrap();
        assert_eq!(head, PageId::INVALID);

        let (list, chain) = FreeList::load(&pool, head).unwrap();
        assert!(list.is_empty());
        assert!(chain.is_empty());
    }

    #[test]
    fn test_short_chain_rejected() {
        let pool = BufferPoolManager::new(8, Box::new(MemoryStore::new(PAGE_SIZE)));
        let entries: Vec<FreeEntry> = (0..9)
            .map(|i| FreeEntry {
                page_id: PageId::new(50 + i),
                freed_in: 1,
            })
            .collect();

        let err = FreeList::write_chain(&pool, &[PageId::new(4)], &entries, 2).unwrap_err();
        assert!(err.is_corruption());
        // Nothing was written
        assert_eq!(pool.page_count(), 0);
    }

    #[test]
    fn test_load_detects_cycle() {
        let pool = BufferPoolManager::new(8, Box::new(MemoryStore::new(PAGE_SIZE)));
        FreeList::write_chain(&pool, &[PageId::new(2), PageId::new(3)], &[], 2).unwrap();
        {
            let mut guard = pool.fetch_page_write(PageId::new(3)).unwrap();
            PageId::new(2).write_to(&mut guard.as_mut_slice()[OFFSET_NEXT..]);
        }

        let err = FreeList::load(&pool, PageId::new(2)).unwrap_err();
        assert!(err.is_corruption());
    }
}
