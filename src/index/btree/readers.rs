//! Registry of live readers.
//!
//! A reader registers the generation it starts in before it looks at the
//! root. The writer consults the oldest registered generation before reusing
//! a freed page, so a page a reader might still reach is never rewritten
//! under it.

use std::collections::BTreeMap;

use parking_lot::Mutex;

#[derive(Debug, Default)]
pub struct ReaderRegistry {
    /// Start generation -> number of live readers.
    live: Mutex<BTreeMap<u64, usize>>,
}

impl ReaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reader. `start` runs under the registry lock and returns
    /// the generation the reader starts in along with whatever else the
    /// reader needs from the same instant.
    pub fn register<T>(&self, start: impl FnOnce() -> (u64, T)) -> (ReaderTicket<'_>, T) {
        let mut live = self.live.lock();
        let (generation, value) = start();
        *live.entry(generation).or_insert(0) += 1;
        (
            ReaderTicket {
                registry: self,
                generation,
            },
            value,
        )
    }

    /// Start generation of the oldest live reader.
    pub fn oldest(&self) -> Option<u64> {
        self.live.lock().keys().next().copied()
    }

    #[cfg(test)]
    pub fn count(&self) -> usize {
        self.live.lock().values().sum()
    }

    fn release(&self, generation: u64) {
        let mut live = self.live.lock();
        if let Some(count) = live.get_mut(&generation) {
            *count -= 1;
            if *count == 0 {
                live.remove(&generation);
            }
        }
    }
}

/// Keeps a reader registered until dropped.
#[derive(Debug)]
pub struct ReaderTicket<'r> {
    registry: &'r ReaderRegistry,
    generation: u64,
}

impl ReaderTicket<'_> {
    #[cfg(test)]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for ReaderTicket<'_> {
    fn drop(&mut self) {
        self.registry.release(self.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oldest_tracks_live_tickets() {
        let registry = ReaderRegistry::new();
        assert_eq!(registry.oldest(), None);

        let (old, _) = registry.register(|| (3, ()));
        let (young, _) = registry.register(|| (5, ()));
        let (young_too, _) = registry.register(|| (5, ()));
        assert_eq!(registry.oldest(), Some(3));
        assert_eq!(registry.count(), 3);

        drop(old);
        assert_eq!(registry.oldest(), Some(5));
        drop(young);
        assert_eq!(registry.oldest(), Some(5));
        drop(young_too);
        assert_eq!(registry.oldest(), None);
    }

    #[test]
    fn test_register_returns_captured_value() {
        let registry = ReaderRegistry::new();
        let (ticket, root) = registry.register(|| (7, "root"));
        assert_eq!(ticket.generation(), 7);
        assert_eq!(root, "root");
    }
}
