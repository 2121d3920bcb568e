//! Checkpoints.
//!
//! A checkpoint makes the writer's generation stable:
//! 1. dirty pages are flushed in bulk through the IO limiter while the
//!    writer keeps running
//! 2. with the writer paused, the freelist is written to a fresh chain and
//!    the remaining dirty pages are flushed and synced
//! 3. the meta state naming the new root, stable generation and chain is
//!    written to the other meta slot and synced
//!
//! Only after the meta write succeeds does the in-memory state move to the
//! next generation. A failed checkpoint leaves the previous durable state
//! and the current session untouched.

use tracing::{debug, info};

use crate::common::{Error, PageId, Result};
use crate::index::Layout;
use crate::storage::IoLimiter;

use super::freelist::{FreeEntry, FreeList};
use super::meta::{self, Meta};
use super::pointer::Generations;
use super::tree::BTree;

impl<L: Layout> BTree<L> {
    /// Make everything written so far durable and start a new generation.
    ///
    /// Runs concurrently with readers. The writer may keep working during
    /// the bulk flush and is paused for the final part.
    ///
    /// # Errors
    /// - `Error::RecoveryPrecondition` if the tree needs recovery
    /// - IO errors from the page store; the previous checkpoint stays the
    ///   recovery point
    pub fn checkpoint(&self, limiter: &dyn IoLimiter) -> Result<()> {
        self.checkpoint_with(limiter, false)
    }

    pub(crate) fn checkpoint_with(&self, limiter: &dyn IoLimiter, clean: bool) -> Result<()> {
        let _exclusive = self.checkpoint_lock.lock();
        if self.needs_recovery() {
            return Err(Error::RecoveryPrecondition);
        }

        let before = self.pool.stats().snapshot();
        let bulk = self
            .pool
            .flush_all_pages_limited(limiter, self.config.flush_batch)?;
        debug!(pages = bulk, "tree.checkpoint.flushed");

        let mut state = self.state.lock();
        let generation = state.generations.unstable;
        let oldest_reader = self.readers.oldest();

        // Plan the new chain on a copy so a failure commits nothing
        let mut free = state.freelist.clone();
        let mut chain = Vec::new();
        let mut high_water = state.high_water;
        loop {
            let needed =
                FreeList::pages_needed(free.len() + state.chain.len(), self.config.page_size);
            if chain.len() >= needed {
                break;
            }
            let page_id = match free.pop_reusable(state.generations.stable, oldest_reader) {
                Some(page_id) => page_id,
                None => {
                    if high_water == PageId::INVALID.0 {
                        return Err(Error::InvalidPageId(high_water));
                    }
                    high_water += 1;
                    PageId::new(high_water - 1)
                }
            };
            chain.push(page_id);
        }

        let entries: Vec<FreeEntry> = free
            .iter()
            .copied()
            .chain(state.chain.iter().map(|&page_id| FreeEntry {
                page_id,
                freed_in: generation,
            }))
            .collect();
        let head = FreeList::write_chain(&self.pool, &chain, &entries, generation)?;

        let rest = self
            .pool
            .flush_all_pages_limited(limiter, self.config.flush_batch)?;
        self.pool.sync()?;

        let durable = Meta {
            root: state.root,
            stable: generation,
            unstable: if clean { generation } else { generation + 1 },
            freelist_head: head,
            high_water,
            clean,
            ..state.meta.next()
        };
        meta::write(&self.pool, &durable)?;

        let mut committed = FreeList::new();
        for entry in &entries {
            committed.push(entry.page_id, entry.freed_in);
        }
        state.freelist = committed;
        state.chain = chain;
        state.high_water = high_water;
        state.meta = durable;
        state.generations = Generations::new(generation, generation + 1);
        self.publish(&state);
        let free_pages = state.freelist.len();
        drop(state);

        let flushed = bulk + rest;
        let activity = self.pool.stats().snapshot().since(&before);
        info!(
            stable = generation,
            flushed,
            written = activity.pages_written,
            free_pages,
            clean,
            "tree.checkpoint.complete"
        );
        self.monitor.checkpoint_completed(generation, flushed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::common::config::TreeConfig;
    use crate::index::btree::{BTree, WriterOptions};
    use crate::index::{Monitor, SimpleLongLayout};
    use crate::storage::{IoLimiter, MemoryStore, Unlimited};

    const PAGE_SIZE: usize = 256;

    #[derive(Default)]
    struct Recorder {
        stable: AtomicU64,
        checkpoints: AtomicUsize,
    }

    impl Monitor for Arc<Recorder> {
        fn checkpoint_completed(&self, stable_generation: u64, _pages_flushed: usize) {
            self.stable.store(stable_generation, Ordering::SeqCst);
            self.checkpoints.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct CountingLimiter {
        calls: AtomicUsize,
    }

    impl IoLimiter for CountingLimiter {
        fn maybe_limit(&self, previous_stamp: u64, _recently_completed_ios: usize) -> u64 {
            self.calls.fetch_add(1, Ordering::SeqCst);
            previous_stamp
        }
    }

    fn config() -> TreeConfig {
        TreeConfig::default()
            .with_page_size(PAGE_SIZE)
            .with_pool_size(64)
            .with_flush_batch(2)
    }

    fn fill(tree: &BTree<SimpleLongLayout>, keys: std::ops::Range<i64>) {
        let mut writer = tree.writer(WriterOptions::default()).unwrap();
        for key in keys {
            writer.put(key, key).unwrap();
        }
        writer.close();
    }

    #[test]
    fn test_checkpoint_advances_generation() {
        let recorder = Arc::new(Recorder::default());
        let store = MemoryStore::new(PAGE_SIZE);
        let tree =
            BTree::open_or_create(store, SimpleLongLayout::new(), config(), recorder.clone())
                .unwrap();
        fill(&tree, 0..50);

        tree.checkpoint(&Unlimited).unwrap();
        assert_eq!(tree.stable_generation(), 2);
        assert_eq!(tree.generation(), 3);
        assert_eq!(recorder.stable.load(Ordering::SeqCst), 2);
        assert_eq!(recorder.checkpoints.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_checkpoint_calls_limiter_per_batch() {
        let tree = BTree::open_or_create(
            MemoryStore::new(PAGE_SIZE),
            SimpleLongLayout::new(),
            config(),
            crate::index::NoMonitor,
        )
        .unwrap();
        fill(&tree, 0..200);

        let limiter = CountingLimiter::default();
        tree.checkpoint(&limiter).unwrap();
        assert!(limiter.calls.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn test_checkpointed_state_survives_crash() {
        let store = MemoryStore::new(PAGE_SIZE);
        let tree = BTree::open_or_create(
            store.clone(),
            SimpleLongLayout::new(),
            config(),
            crate::index::NoMonitor,
        )
        .unwrap();
        fill(&tree, 0..100);
        tree.checkpoint(&Unlimited).unwrap();
        let crashed = store.snapshot();
        drop(tree);

        let tree = BTree::open_or_create(
            crashed,
            SimpleLongLayout::new(),
            config(),
            crate::index::NoMonitor,
        )
        .unwrap();
        assert!(tree.needs_recovery());
        tree.prepare_for_recovery().unwrap();
        let keys: Vec<i64> = tree
            .seek(0, 1_000)
            .unwrap()
            .map(|hit| hit.unwrap().0)
            .collect();
        assert_eq!(keys, (0..100).collect::<Vec<_>>());
        tree.consistency_check().unwrap();
    }

    #[test]
    fn test_freelist_survives_reopen() {
        let store = MemoryStore::new(PAGE_SIZE);
        let open = |store: &MemoryStore| {
            BTree::open_or_create(
                store.clone(),
                SimpleLongLayout::new(),
                config(),
                crate::index::NoMonitor,
            )
            .unwrap()
        };

        let tree = open(&store);
        fill(&tree, 0..100);
        tree.checkpoint(&Unlimited).unwrap();
        fill(&tree, 0..100);
        let free = tree.free_pages();
        assert!(free > 0);
        tree.close().unwrap();

        // Close checkpoints once more, moving the old chain page to the list
        let tree = open(&store);
        assert!(!tree.needs_recovery());
        assert!(tree.free_pages() >= free);
        tree.consistency_check().unwrap();
    }

    #[test]
    fn test_repeated_checkpoints_do_not_leak_pages() {
        let tree = BTree::open_or_create(
            MemoryStore::new(PAGE_SIZE),
            SimpleLongLayout::new(),
            config(),
            crate::index::NoMonitor,
        )
        .unwrap();
        fill(&tree, 0..200);

        let mut high_waters = Vec::new();
        for _ in 0..10 {
            fill(&tree, 0..200);
            tree.checkpoint(&Unlimited).unwrap();
            high_waters.push(tree.state.lock().high_water);
        }
        // Once reuse kicks in the file stops growing
        assert_eq!(high_waters[8], high_waters[9]);

        let report = tree.consistency_check().unwrap();
        assert_eq!(report.entries, 200);
    }
}
