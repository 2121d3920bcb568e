//! Generation-tagged page pointers.
//!
//! Pointers that may be written into a page of an older generation carry the
//! generation that wrote them. A reader only trusts a pointer whose generation
//! is durable or belongs to the running session; anything in between was
//! written by a session that crashed before its checkpoint completed.

use crate::common::PageId;
use crate::storage::page::read_u64;

/// The generation window of the running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generations {
    /// Last generation made durable by a checkpoint.
    pub stable: u64,
    /// Generation the writer currently writes.
    pub unstable: u64,
}

impl Generations {
    pub fn new(stable: u64, unstable: u64) -> Self {
        Self { stable, unstable }
    }

    /// Whether content written in `generation` is trustworthy.
    ///
    /// Generation 0 marks an empty slot and is never valid.
    #[inline]
    pub fn is_valid(&self, generation: u64) -> bool {
        generation != 0 && (generation <= self.stable || generation == self.unstable)
    }

    /// Written by a session that crashed before checkpointing it.
    #[inline]
    pub fn is_crashed(&self, generation: u64) -> bool {
        generation > self.stable && generation < self.unstable
    }
}

/// A `(page id, generation)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationPointer {
    pub page_id: PageId,
    pub generation: u64,
}

impl GenerationPointer {
    /// Encoded size in bytes.
    pub const SIZE: usize = PageId::SIZE + 8;

    /// An unused slot.
    pub const EMPTY: GenerationPointer = GenerationPointer {
        page_id: PageId::INVALID,
        generation: 0,
    };

    pub fn new(page_id: PageId, generation: u64) -> Self {
        Self {
            page_id,
            generation,
        }
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.generation == 0
    }

    pub fn read_from(data: &[u8], offset: usize) -> Self {
        Self {
            page_id: PageId::read_from(&data[offset..]),
            generation: read_u64(data, offset + PageId::SIZE),
        }
    }

    pub fn write_to(&self, data: &mut [u8], offset: usize) {
        self.page_id.write_to(&mut data[offset..]);
        data[offset + PageId::SIZE..offset + Self::SIZE]
            .copy_from_slice(&self.generation.to_le_bytes());
    }
}

/// Two pointer slots for a reference that is rewritten in place on pages of
/// older generations (a leaf's right sibling).
///
/// The newest valid slot wins. A writer never overwrites the newest stable
/// slot, so whatever happens to the other slot before the next checkpoint, the
/// stable value survives a crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerPair {
    pub slots: [GenerationPointer; 2],
}

impl PointerPair {
    /// Encoded size in bytes.
    pub const SIZE: usize = GenerationPointer::SIZE * 2;

    /// A pair holding only `pointer`.
    pub fn single(pointer: GenerationPointer) -> Self {
        Self {
            slots: [pointer, GenerationPointer::EMPTY],
        }
    }

    pub fn read_from(data: &[u8], offset: usize) -> Self {
        Self {
            slots: [
                GenerationPointer::read_from(data, offset),
                GenerationPointer::read_from(data, offset + GenerationPointer::SIZE),
            ],
        }
    }

    pub fn write_to(&self, data: &mut [u8], offset: usize) {
        self.slots[0].write_to(data, offset);
        self.slots[1].write_to(data, offset + GenerationPointer::SIZE);
    }

    /// The newest valid slot, or None if neither slot is valid.
    pub fn resolve(&self, generations: &Generations) -> Option<GenerationPointer> {
        self.slots
            .iter()
            .filter(|slot| generations.is_valid(slot.generation))
            .max_by_key(|slot| slot.generation)
            .copied()
    }

    /// Index of the slot a writer of `generations.unstable` may overwrite.
    pub fn writable_slot(&self, generations: &Generations) -> usize {
        if let Some(index) = self
            .slots
            .iter()
            .position(|slot| slot.generation == generations.unstable)
        {
            return index;
        }

        let newest_stable = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.generation != 0 && slot.generation <= generations.stable)
            .max_by_key(|(_, slot)| slot.generation)
            .map(|(index, _)| index);

        match newest_stable {
            Some(index) => 1 - index,
            None => 0,
        }
    }

    /// Store `pointer` in the writable slot.
    pub fn set(&mut self, pointer: GenerationPointer, generations: &Generations) {
        let index = self.writable_slot(generations);
        self.slots[index] = pointer;
    }

    /// Empty every slot written by a crashed generation. Returns how many
    /// slots were cleared.
    pub fn clear_crashed(&mut self, generations: &Generations) -> usize {
        let mut cleared = 0;
        for slot in &mut self.slots {
            if slot.generation != 0 && generations.is_crashed(slot.generation) {
                *slot = GenerationPointer::EMPTY;
                cleared += 1;
            }
        }
        cleared
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ptr(id: u32, generation: u64) -> GenerationPointer {
        GenerationPointer::new(PageId::new(id), generation)
    }

    #[test]
    fn test_generation_validity() {
        let generations = Generations::new(5, 8);
        assert!(!generations.is_valid(0));
        assert!(generations.is_valid(3));
        assert!(generations.is_valid(5));
        assert!(!generations.is_valid(6));
        assert!(!generations.is_valid(7));
        assert!(generations.is_valid(8));
        assert!(!generations.is_valid(9));

        assert!(generations.is_crashed(6));
        assert!(!generations.is_crashed(8));
    }

    #[test]
    fn test_pointer_encoding_offsets() {
        let mut buf = [0u8; 20];
        ptr(7, 0x0102).write_to(&mut buf, 3);
        assert_eq!(buf[3], 7);
        assert_eq!(buf[7], 0x02);
        assert_eq!(buf[8], 0x01);
        assert_eq!(GenerationPointer::read_from(&buf, 3), ptr(7, 0x0102));
    }

    #[test]
    fn test_resolve_prefers_newest_valid() {
        let generations = Generations::new(4, 6);
        let pair = PointerPair {
            slots: [ptr(1, 3), ptr(2, 6)],
        };
        assert_eq!(pair.resolve(&generations), Some(ptr(2, 6)));

        // A crashed slot is ignored even though it is newer
        let pair = PointerPair {
            slots: [ptr(1, 3), ptr(2, 5)],
        };
        assert_eq!(pair.resolve(&generations), Some(ptr(1, 3)));

        let pair = PointerPair::single(GenerationPointer::EMPTY);
        assert_eq!(pair.resolve(&generations), None);
    }

    #[test]
    fn test_writer_never_overwrites_newest_stable() {
        let generations = Generations::new(4, 6);

        let mut pair = PointerPair {
            slots: [ptr(1, 2), ptr(2, 4)],
        };
        pair.set(ptr(3, 6), &generations);
        assert_eq!(pair.slots, [ptr(3, 6), ptr(2, 4)]);

        // Same generation again rewrites the unstable slot
        pair.set(ptr(4, 6), &generations);
        assert_eq!(pair.slots, [ptr(4, 6), ptr(2, 4)]);
    }

    #[test]
    fn test_writer_fills_empty_slot() {
        let generations = Generations::new(4, 6);
        let mut pair = PointerPair::single(ptr(1, 4));
        pair.set(ptr(2, 6), &generations);
        assert_eq!(pair.slots, [ptr(1, 4), ptr(2, 6)]);
    }

    #[test]
    fn test_clear_crashed() {
        let generations = Generations::new(4, 7);
        let mut pair = PointerPair {
            slots: [ptr(1, 4), ptr(2, 5)],
        };
        assert_eq!(pair.clear_crashed(&generations), 1);
        assert_eq!(pair.slots, [ptr(1, 4), GenerationPointer::EMPTY]);
        assert_eq!(pair.clear_crashed(&generations), 0);
    }
}
