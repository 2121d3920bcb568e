//! Reader-side navigation.
//!
//! Readers take no tree-wide lock. They decode one page at a time under its
//! read latch and detect concurrent structural change instead:
//! - a page replaced by copy-on-write carries a successor pointer, which the
//!   reader follows to the current version
//! - a node that loses keys or gains a successor gets a new change stamp; a
//!   reader re-reads the parent's stamp after reading a child and restarts
//!   from the root if it moved
//! - a root replaced since the descent started also restarts it
//!
//! Restarts are bounded by the configured retry limit for the tree's height.

use tracing::warn;

use crate::common::config::MAX_SUCCESSOR_CHAIN;
use crate::common::{Error, PageId, Result};
use crate::index::Layout;

use super::node::{LayoutNode, Node};
use super::pointer::Generations;
use super::tree::{BTree, RootSnapshot};

/// A node together with the page it was read from.
pub(crate) struct Located<L: Layout> {
    pub page_id: PageId,
    pub node: LayoutNode<L>,
}

/// Counts reader restarts against a limit.
#[derive(Debug)]
pub(crate) struct RetryBudget {
    attempts: usize,
    limit: usize,
}

impl RetryBudget {
    pub fn new(limit: usize) -> Self {
        Self { attempts: 0, limit }
    }

    /// Record a restart, failing once the limit is exceeded.
    pub fn retry(&mut self) -> Result<()> {
        self.attempts += 1;
        if self.attempts > self.limit {
            warn!(attempts = self.attempts, "tree.read.retries_exhausted");
            return Err(Error::ReadRetriesExhausted {
                attempts: self.attempts,
            });
        }
        Ok(())
    }
}

impl<L: Layout> BTree<L> {
    pub(crate) fn read_node(&self, page_id: PageId) -> Result<LayoutNode<L>> {
        let guard = self.pool.fetch_page_read(page_id)?;
        Node::decode(&self.layout, &self.dims, page_id, &guard)
    }

    pub(crate) fn read_stamp(&self, page_id: PageId) -> Result<u64> {
        let guard = self.pool.fetch_page_read(page_id)?;
        Ok(guard.header().stamp)
    }

    pub(crate) fn retry_budget(&self) -> RetryBudget {
        RetryBudget::new(self.config.read_retry_limit(self.height()))
    }

    /// Read the current version of `page_id`, following valid successor
    /// pointers. Returns None if the chain is longer than a reader is willing
    /// to follow.
    pub(crate) fn resolve(
        &self,
        page_id: PageId,
        generations: &Generations,
    ) -> Result<Option<Located<L>>> {
        let mut current = page_id;
        for _ in 0..=MAX_SUCCESSOR_CHAIN {
            let node = self.read_node(current)?;
            if generations.is_valid(node.successor.generation) {
                current = node.successor.page_id;
                continue;
            }
            return Ok(Some(Located {
                page_id: current,
                node,
            }));
        }
        Ok(None)
    }

    /// Find the leaf whose key range holds `key`.
    pub(crate) fn descend(&self, key: &L::Key, budget: &mut RetryBudget) -> Result<Located<L>> {
        loop {
            let snapshot = self.snapshot();
            if let Some(leaf) = self.try_descend(key, &snapshot)? {
                return Ok(leaf);
            }
            budget.retry()?;
        }
    }

    /// One descent attempt. None means a concurrent change was detected.
    fn try_descend(&self, key: &L::Key, snapshot: &RootSnapshot) -> Result<Option<Located<L>>> {
        let generations = &snapshot.generations;
        let Some(mut current) = self.resolve(snapshot.root, generations)? else {
            return Ok(None);
        };
        if self.published.read().root != snapshot.root {
            return Ok(None);
        }

        while !current.node.is_leaf() {
            let index = current.node.child_index(&self.layout, key);
            let child_id = current.node.children[index];
            let Some(child) = self.resolve(child_id, generations)? else {
                return Ok(None);
            };
            if self.read_stamp(current.page_id)? != current.node.stamp {
                return Ok(None);
            }
            current = child;
        }

        Ok(Some(current))
    }
}
