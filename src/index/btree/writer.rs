//! The exclusive writer.
//!
//! Every mutation descends from the root making each node on the path
//! current: a node written in an older generation is copied to a fresh page
//! first, the parent (or the root) is pointed at the copy, and the old page
//! gets a successor pointer for readers still holding its id. Stable pages are
//! therefore never changed in place, except for two fields readers tolerate:
//! the successor pointer and the right-sibling slot pair.
//!
//! Splits write the new right node first, then the parent's routing key,
//! then shrink the split node. A reader routed by an outdated parent notices
//! the parent's new stamp and restarts.
//!
//! Removal never rebalances. Leaves may become empty and stay linked.

use std::sync::atomic::Ordering;

use tracing::debug;

use crate::common::{Error, PageId, Result};
use crate::index::{Layout, Merger};
use crate::storage::page::PageType;

use super::node::{read_right, write_child, write_right, write_successor, LayoutNode, Node};
use super::pointer::{GenerationPointer, PointerPair};
use super::tree::{BTree, TreeState};

/// Options for [`BTree::writer`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WriterOptions {
    /// Share of entries an overflowing node keeps when it splits, in (0, 1).
    /// 0.5 splits in the middle; values near 1 keep sequential inserts dense.
    pub split_retention: f64,
}

impl WriterOptions {
    pub fn with_split_retention(mut self, split_retention: f64) -> Self {
        self.split_retention = split_retention;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !(self.split_retention > 0.0 && self.split_retention < 1.0) {
            return Err(Error::InvalidConfig(format!(
                "split retention {} outside (0, 1)",
                self.split_retention
            )));
        }
        Ok(())
    }
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            split_retention: 0.5,
        }
    }
}

/// Exclusive handle for mutating a [`BTree`].
///
/// Released by [`close`](Writer::close) or by dropping it.
pub struct Writer<'t, L: Layout> {
    tree: &'t BTree<L>,
    options: WriterOptions,
}

impl<'t, L: Layout> Writer<'t, L> {
    pub(crate) fn new(tree: &'t BTree<L>, options: WriterOptions) -> Self {
        Self { tree, options }
    }

    /// Insert `key`, or replace its value if present.
    pub fn put(&mut self, key: L::Key, value: L::Value) -> Result<()> {
        let mut state = self.tree.state.lock();
        self.tree
            .put_locked(&mut state, key, value, self.options.split_retention)
    }

    /// Remove `key`, returning its value. An absent key changes nothing.
    pub fn remove(&mut self, key: &L::Key) -> Result<Option<L::Value>> {
        let mut state = self.tree.state.lock();
        if self.tree.lookup_locked(&state, key)?.is_none() {
            return Ok(None);
        }

        let (_, leaf_id, mut leaf) = self.tree.descend_for_write(&mut state, key)?;
        match leaf.search(&self.tree.layout, key) {
            Ok(index) => {
                leaf.keys.remove(index);
                let value = leaf.values.remove(index);
                self.tree.write_node(leaf_id, &leaf)?;
                Ok(Some(value))
            }
            Err(_) => Ok(None),
        }
    }

    /// Store `merger.combine(existing, value)` if `key` is present, `value`
    /// otherwise.
    pub fn merge<M>(&mut self, key: L::Key, value: L::Value, merger: &M) -> Result<()>
    where
        M: Merger<L::Value> + ?Sized,
    {
        let mut state = self.tree.state.lock();
        let merged = match self.tree.lookup_locked(&state, &key)? {
            Some(existing) => merger.combine(&existing, &value),
            None => value,
        };
        self.tree
            .put_locked(&mut state, key, merged, self.options.split_retention)
    }

    /// Release the writer.
    pub fn close(self) {}
}

impl<L: Layout> Drop for Writer<'_, L> {
    fn drop(&mut self) {
        self.tree.writer_open.store(false, Ordering::Release);
    }
}

/// One internal node on the path to a leaf and the child taken.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PathStep {
    pub page_id: PageId,
    pub index: usize,
}

impl<L: Layout> BTree<L> {
    fn put_locked(
        &self,
        state: &mut TreeState,
        key: L::Key,
        value: L::Value,
        split_retention: f64,
    ) -> Result<()> {
        let (path, leaf_id, mut leaf) = self.descend_for_write(state, &key)?;
        match leaf.search(&self.layout, &key) {
            Ok(index) => leaf.values[index] = value,
            Err(index) => {
                leaf.keys.insert(index, key);
                leaf.values.insert(index, value);
            }
        }

        if leaf.keys.len() <= self.dims.leaf_capacity {
            return self.write_node(leaf_id, &leaf);
        }
        self.split_leaf(state, &path, leaf_id, leaf, split_retention)
    }

    /// Point lookup along the writer's own view of the tree.
    ///
    /// Only called with the state lock held, so internal child pointers are
    /// current and no successor needs following.
    fn lookup_locked(&self, state: &TreeState, key: &L::Key) -> Result<Option<L::Value>> {
        let mut node = self.read_node(state.root)?;
        while !node.is_leaf() {
            let index = node.child_index(&self.layout, key);
            node = self.read_node(node.children[index])?;
        }
        Ok(node
            .search(&self.layout, key)
            .ok()
            .map(|index| node.values[index].clone()))
    }

    /// Descend to the leaf for `key`, making every node on the way current.
    fn descend_for_write(
        &self,
        state: &mut TreeState,
        key: &L::Key,
    ) -> Result<(Vec<PathStep>, PageId, LayoutNode<L>)> {
        let mut path = Vec::with_capacity(state.height);
        let root = state.root;
        let mut page_id = self.make_current(state, root, &path)?;

        loop {
            let node = self.read_node(page_id)?;
            if node.is_leaf() {
                return Ok((path, page_id, node));
            }
            let index = node.child_index(&self.layout, key);
            path.push(PathStep { page_id, index });
            page_id = self.make_current(state, node.children[index], &path)?;
        }
    }

    /// Return a page of the current generation holding the content of
    /// `page_id`, copying it if it belongs to an older generation. `path`
    /// ends with the (already current) parent.
    fn make_current(&self, state: &mut TreeState, page_id: PageId, path: &[PathStep]) -> Result<PageId> {
        let generations = state.generations;
        let mut node = self.read_node(page_id)?;
        if node.generation == generations.unstable {
            return Ok(page_id);
        }
        if node.generation > generations.unstable {
            return Err(Error::corruption(
                page_id,
                format!(
                    "generation {} ahead of writer generation {}",
                    node.generation, generations.unstable
                ),
            ));
        }

        let copy_id = self.allocate(state)?;
        node.generation = generations.unstable;
        node.stamp = state.next_stamp();
        node.successor = GenerationPointer::EMPTY;
        if node.is_leaf() {
            let right = node
                .right
                .resolve(&generations)
                .ok_or_else(|| Error::corruption(page_id, "no valid right sibling slot"))?;
            node.right =
                PointerPair::single(GenerationPointer::new(right.page_id, generations.unstable));
        }
        self.write_new_node(copy_id, &node)?;

        match path.last() {
            Some(parent) => {
                let mut guard = self.pool.fetch_page_write(parent.page_id)?;
                write_child(&mut guard, &self.dims, parent.index, copy_id);
            }
            None => {
                state.root = copy_id;
                self.publish(state);
            }
        }

        {
            let stamp = state.next_stamp();
            let mut guard = self.pool.fetch_page_write(page_id)?;
            write_successor(
                &mut guard,
                GenerationPointer::new(copy_id, generations.unstable),
            );
            guard.set_stamp(stamp);
        }

        if node.is_leaf() {
            self.repoint_left_sibling(state, path, copy_id)?;
        }
        state.freelist.push(page_id, generations.unstable);
        Ok(copy_id)
    }

    /// Point the right-sibling slot of the leaf left of the path's leaf at
    /// `target`.
    fn repoint_left_sibling(&self, state: &TreeState, path: &[PathStep], target: PageId) -> Result<()> {
        let Some(depth) = path.iter().rposition(|step| step.index > 0) else {
            return Ok(());
        };
        let step = path[depth];
        let mut current = self.read_node(step.page_id)?.children[step.index - 1];
        for _ in depth + 1..path.len() {
            let node = self.read_node(current)?;
            current = *node
                .children
                .last()
                .ok_or_else(|| Error::corruption(current, "internal node without children"))?;
        }

        let generations = state.generations;
        let mut guard = self.pool.fetch_page_write(current)?;
        if guard.page_type() != PageType::BTreeLeaf {
            return Err(Error::corruption(current, "left sibling is not a leaf"));
        }
        let mut right = read_right(&guard);
        right.set(
            GenerationPointer::new(target, generations.unstable),
            &generations,
        );
        write_right(&mut guard, &right);
        Ok(())
    }

    fn split_leaf(
        &self,
        state: &mut TreeState,
        path: &[PathStep],
        leaf_id: PageId,
        mut leaf: LayoutNode<L>,
        split_retention: f64,
    ) -> Result<()> {
        let generation = state.generations.unstable;
        let split_at = split_point(leaf.keys.len(), split_retention);
        let right_keys = leaf.keys.split_off(split_at);
        let right_values = leaf.values.split_off(split_at);

        let old_right = leaf
            .right
            .resolve(&state.generations)
            .ok_or_else(|| Error::corruption(leaf_id, "no valid right sibling slot"))?;
        let sibling_id = self.allocate(state)?;
        let mut sibling: LayoutNode<L> = Node::new_leaf(
            generation,
            state.next_stamp(),
            PointerPair::single(GenerationPointer::new(old_right.page_id, generation)),
        );
        sibling.keys = right_keys;
        sibling.values = right_values;
        let separator = sibling.keys[0].clone();
        self.write_new_node(sibling_id, &sibling)?;

        self.insert_separator(state, path, leaf_id, separator, sibling_id)?;

        leaf.right = PointerPair::single(GenerationPointer::new(sibling_id, generation));
        leaf.stamp = state.next_stamp();
        self.write_node(leaf_id, &leaf)
    }

    /// Add the routing entry `(separator, right_id)` after `left_id` in the
    /// parent at the end of `path`, splitting upward as needed.
    fn insert_separator(
        &self,
        state: &mut TreeState,
        path: &[PathStep],
        left_id: PageId,
        separator: L::Key,
        right_id: PageId,
    ) -> Result<()> {
        let generation = state.generations.unstable;
        let Some((step, ancestors)) = path.split_last() else {
            let root_id = self.allocate(state)?;
            let root: LayoutNode<L> = Node::new_internal(
                generation,
                state.next_stamp(),
                vec![separator],
                vec![left_id, right_id],
            );
            self.write_new_node(root_id, &root)?;
            state.root = root_id;
            state.height += 1;
            self.publish(state);

            debug!(root = %root_id, height = state.height, "tree.root_split");
            self.monitor.root_split(state.height);
            return Ok(());
        };

        let mut parent = self.read_node(step.page_id)?;
        parent.keys.insert(step.index, separator);
        parent.children.insert(step.index + 1, right_id);

        if parent.keys.len() > self.dims.internal_capacity {
            let mid = parent.keys.len() / 2;
            let mut right_keys = parent.keys.split_off(mid);
            let promoted = right_keys.remove(0);
            let right_children = parent.children.split_off(mid + 1);

            let sibling_id = self.allocate(state)?;
            let sibling: LayoutNode<L> =
                Node::new_internal(generation, state.next_stamp(), right_keys, right_children);
            self.write_new_node(sibling_id, &sibling)?;
            self.insert_separator(state, ancestors, step.page_id, promoted, sibling_id)?;
        }

        parent.stamp = state.next_stamp();
        self.write_node(step.page_id, &parent)
    }

    /// Hand out a page: the oldest reusable freelist entry, else a new page.
    pub(crate) fn allocate(&self, state: &mut TreeState) -> Result<PageId> {
        if let Some(page_id) = state
            .freelist
            .pop_reusable(state.generations.stable, self.readers.oldest())
        {
            return Ok(page_id);
        }
        if state.high_water == PageId::INVALID.0 {
            return Err(Error::InvalidPageId(state.high_water));
        }
        let page_id = PageId::new(state.high_water);
        state.high_water += 1;
        Ok(page_id)
    }

    /// Write a node to a page whose previous content is irrelevant.
    fn write_new_node(&self, page_id: PageId, node: &LayoutNode<L>) -> Result<()> {
        let mut guard = self.pool.create_page(page_id)?;
        node.encode(&self.layout, &self.dims, &mut guard);
        Ok(())
    }

    fn write_node(&self, page_id: PageId, node: &LayoutNode<L>) -> Result<()> {
        let mut guard = self.pool.fetch_page_write(page_id)?;
        node.encode(&self.layout, &self.dims, &mut guard);
        Ok(())
    }
}

/// Number of entries the left node keeps when `len` entries split.
fn split_point(len: usize, retention: f64) -> usize {
    let keep = (len as f64 * retention).round() as usize;
    keep.clamp(1, len - 1)
}
