//! Recovery preparation.
//!
//! After an unclean shutdown the store holds the last checkpoint plus
//! whatever pages of the crashed session happened to be written. Those
//! pages are unreachable from the durable root, but the crashed session may
//! also have written successor pointers and right-sibling slots into
//! durable pages. Such pointers are ignored today because their generation
//! lies between stable and the current generation; once a later checkpoint
//! moves stable past them they would look valid. Recovery preparation
//! clears them before any write happens.

use std::collections::HashSet;
use std::sync::atomic::Ordering;

use tracing::info;

use crate::common::{Error, PageId, Result};
use crate::index::Layout;

use super::freelist::FreeList;
use super::meta;
use super::node::{read_right, read_successor, write_right, write_successor, LayoutNode, Node};
use super::pointer::{GenerationPointer, Generations};
use super::tree::{measure_height, BTree};

impl<L: Layout> BTree<L> {
    /// Bring a tree opened after an unclean shutdown back to its last
    /// checkpoint so the caller can replay its log.
    ///
    /// Does nothing if the tree does not need recovery, so calling it again
    /// after a crash during replay is fine.
    ///
    /// # Errors
    /// - `Error::ConcurrencyViolation` if a writer is open
    /// - `Error::CorruptionDetected` if the durable tree is malformed
    pub fn prepare_for_recovery(&self) -> Result<()> {
        if self.writer_open.load(Ordering::Acquire) {
            return Err(Error::ConcurrencyViolation(
                "prepare_for_recovery called with an open writer",
            ));
        }
        let _exclusive = self.checkpoint_lock.lock();
        if !self.needs_recovery() {
            return Ok(());
        }

        let mut state = self.state.lock();
        let durable = meta::read_newest(&self.pool)?;
        durable.validate(&self.layout, self.config.page_size)?;

        let (freelist, chain) = FreeList::load(&self.pool, durable.freelist_head)?;
        state.freelist = freelist;
        state.chain = chain;
        state.root = durable.root;
        state.high_water = durable.high_water;
        state.height = measure_height(&self.pool, &self.layout, &self.dims, durable.root)?;

        let cleaned = self.clear_crashed_pointers(durable.root, &state.generations)?;

        self.publish(&state);
        self.needs_recovery.store(false, Ordering::Release);
        drop(state);

        info!(
            cleaned,
            stable = durable.stable,
            root = %durable.root,
            "tree.recovery.prepared"
        );
        self.monitor.recovery_prepared(cleaned);
        Ok(())
    }

    /// Walk the durable tree and empty every pointer written by a crashed
    /// generation. Returns the number of pointers cleared.
    fn clear_crashed_pointers(&self, root: PageId, generations: &Generations) -> Result<usize> {
        let mut cleaned = 0;
        let mut visited = HashSet::new();
        let mut pending = vec![root];

        while let Some(page_id) = pending.pop() {
            if !visited.insert(page_id) {
                return Err(Error::corruption(page_id, "page reachable twice"));
            }

            let mut guard = self.pool.fetch_page_write(page_id)?;
            let node: LayoutNode<L> = Node::decode(&self.layout, &self.dims, page_id, &guard)?;
            if node.generation > generations.stable {
                return Err(Error::corruption(
                    page_id,
                    format!(
                        "generation {} reachable from durable root at stable {}",
                        node.generation, generations.stable
                    ),
                ));
            }

            let successor = read_successor(&guard);
            if successor.generation != 0 && generations.is_crashed(successor.generation) {
                write_successor(&mut guard, GenerationPointer::EMPTY);
                cleaned += 1;
            }

            if node.is_leaf() {
                let mut right = read_right(&guard);
                let cleared = right.clear_crashed(generations);
                if cleared > 0 {
                    write_right(&mut guard, &right);
                    cleaned += cleared;
                }
            } else {
                pending.extend(node.children.iter().rev().copied());
            }
        }

        Ok(cleaned)
    }
}
