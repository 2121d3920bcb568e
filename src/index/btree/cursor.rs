//! Range cursor.
//!
//! A cursor holds a decoded copy of one leaf at a time and walks the sibling
//! chain. It remembers the last key it returned, so whenever it loses its
//! place (the leaf it holds was split or copied) it descends again from that
//! key and skips what it already returned.

use std::cmp::Ordering;

use crate::common::{Error, PageId, Result};
use crate::index::Layout;

use super::navigator::{Located, RetryBudget};
use super::node::read_right;
use super::readers::ReaderTicket;
use super::tree::BTree;

/// Ascending cursor over `from <= key < to`.
///
/// Created by [`BTree::seek`]. Runs concurrently with the writer and with
/// checkpoints; pages the cursor may still reach are not reused while it is
/// open.
pub struct SeekCursor<'t, L: Layout> {
    tree: &'t BTree<L>,
    ticket: Option<ReaderTicket<'t>>,
    from: L::Key,
    to: L::Key,
    /// Last key returned.
    last: Option<L::Key>,
    current: Option<(L::Key, L::Value)>,
    leaf: Option<Located<L>>,
    position: usize,
    finished: bool,
}

impl<'t, L: Layout> SeekCursor<'t, L> {
    pub(crate) fn new(tree: &'t BTree<L>, from: L::Key, to: L::Key) -> Self {
        let (ticket, ()) = tree
            .readers
            .register(|| (tree.snapshot().generations.unstable, ()));
        let mut cursor = Self {
            tree,
            ticket: Some(ticket),
            from,
            to,
            last: None,
            current: None,
            leaf: None,
            position: 0,
            finished: false,
        };
        if tree.layout.compare(&cursor.from, &cursor.to) != Ordering::Less {
            cursor.finish();
        }
        cursor
    }

    /// Move to the next entry. Returns false once the range is exhausted.
    ///
    /// # Errors
    /// - `Error::ReadRetriesExhausted` if concurrent changes kept forcing
    ///   restarts
    /// - `Error::CorruptionDetected` for a broken sibling chain
    pub fn advance(&mut self) -> Result<bool> {
        if self.finished {
            return Ok(false);
        }
        match self.step() {
            Ok(found) => Ok(found),
            Err(err) => {
                self.finish();
                Err(err)
            }
        }
    }

    /// The entry the last successful [`advance`](SeekCursor::advance) moved
    /// to.
    pub fn current(&self) -> Option<(&L::Key, &L::Value)> {
        self.current.as_ref().map(|(key, value)| (key, value))
    }

    fn step(&mut self) -> Result<bool> {
        let mut budget = self.tree.retry_budget();
        loop {
            let leaf = match self.leaf.take() {
                Some(leaf) => leaf,
                None => {
                    let start = self.last.as_ref().unwrap_or(&self.from).clone();
                    self.position = 0;
                    self.tree.descend(&start, &mut budget)?
                }
            };

            if let Some(found) = self.scan(&leaf) {
                if !found {
                    self.finish();
                    return Ok(false);
                }
                self.leaf = Some(leaf);
                return Ok(true);
            }

            match self.next_leaf(&leaf, &mut budget)? {
                NextLeaf::Found(next) => {
                    self.position = 0;
                    self.leaf = Some(next);
                }
                NextLeaf::Restart => {}
                NextLeaf::End => {
                    self.finish();
                    return Ok(false);
                }
            }
        }
    }

    /// Look for the next entry in `leaf` from the current position.
    /// Some(true) found one, Some(false) hit the end of the range, None ran
    /// off the end of the leaf.
    fn scan(&mut self, leaf: &Located<L>) -> Option<bool> {
        let tree = self.tree;
        let layout = &tree.layout;
        while self.position < leaf.node.keys.len() {
            let index = self.position;
            self.position += 1;

            let key = &leaf.node.keys[index];
            if layout.compare(key, &self.to) != Ordering::Less {
                return Some(false);
            }
            let behind = match &self.last {
                Some(last) => layout.compare(key, last) != Ordering::Greater,
                None => layout.compare(key, &self.from) == Ordering::Less,
            };
            if behind {
                continue;
            }

            self.last = Some(key.clone());
            self.current = Some((key.clone(), leaf.node.values[index].clone()));
            return Some(true);
        }
        None
    }

    fn next_leaf(&self, leaf: &Located<L>, budget: &mut RetryBudget) -> Result<NextLeaf<L>> {
        // The right slots change in place, so read them fresh together with
        // the stamp.
        let (stamp, right) = {
            let guard = self.tree.pool.fetch_page_read(leaf.page_id)?;
            (guard.header().stamp, read_right(&guard))
        };
        if stamp != leaf.node.stamp {
            budget.retry()?;
            return Ok(NextLeaf::Restart);
        }

        let generations = self.tree.snapshot().generations;
        let right = right
            .resolve(&generations)
            .ok_or_else(|| Error::corruption(leaf.page_id, "no valid right sibling slot"))?;
        if right.page_id == PageId::INVALID {
            return Ok(NextLeaf::End);
        }

        match self.tree.resolve(right.page_id, &generations)? {
            Some(next) if next.node.is_leaf() => Ok(NextLeaf::Found(next)),
            Some(next) => Err(Error::corruption(next.page_id, "right sibling is not a leaf")),
            None => {
                budget.retry()?;
                Ok(NextLeaf::Restart)
            }
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        self.leaf = None;
        self.ticket = None;
    }
}

enum NextLeaf<L: Layout> {
    Found(Located<L>),
    Restart,
    End,
}

impl<L: Layout> Iterator for SeekCursor<'_, L> {
    type Item = Result<(L::Key, L::Value)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(true) => self.current.clone().map(Ok),
            Ok(false) => None,
            Err(err) => Some(Err(err)),
        }
    }
}
