//! Node page codec.
//!
//! # Layout
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//! 0       21    PageHeader (type, checksum, generation, stamp)
//! 21      12    successor (GenerationPointer)
//! 33      2     key_count (little-endian)
//! 35      24    right sibling (PointerPair, leaves only)
//! 59      ...   payload
//! ```
//!
//! Leaf payload: `key_count` interleaved `(key, value)` records.
//!
//! Internal payload: `internal_capacity + 1` child page IDs (u32), followed by
//! `internal_capacity` key slots. Only the first `key_count + 1` children and
//! `key_count` keys are meaningful.
//!
//! Internal child IDs are plain page IDs: an internal page is only ever
//! modified in the generation that wrote it, so its children never need a
//! generation tag.

use std::cmp::Ordering;

use crate::common::{Error, PageId, Result};
use crate::index::Layout;
use crate::storage::page::{read_u16, Page, PageHeader, PageType};

use super::pointer::{GenerationPointer, PointerPair};

pub(crate) const OFFSET_SUCCESSOR: usize = PageHeader::SIZE;
pub(crate) const OFFSET_KEY_COUNT: usize = OFFSET_SUCCESSOR + GenerationPointer::SIZE;
pub(crate) const OFFSET_RIGHT: usize = OFFSET_KEY_COUNT + 2;
pub(crate) const OFFSET_PAYLOAD: usize = OFFSET_RIGHT + PointerPair::SIZE;

/// Smallest capacity either node kind may have.
const MIN_CAPACITY: usize = 3;

/// Sizes derived from the page size and the layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeDims {
    pub page_size: usize,
    pub key_size: usize,
    pub value_size: usize,
    /// Entries a leaf holds.
    pub leaf_capacity: usize,
    /// Routing keys an internal node holds.
    pub internal_capacity: usize,
}

impl NodeDims {
    pub fn new(page_size: usize, key_size: usize, value_size: usize) -> Result<Self> {
        if key_size == 0 {
            return Err(Error::InvalidConfig("key size must be > 0".into()));
        }
        let usable = page_size.saturating_sub(OFFSET_PAYLOAD);
        let leaf_capacity = usable / (key_size + value_size);
        let internal_capacity = usable.saturating_sub(PageId::SIZE) / (PageId::SIZE + key_size);

        if leaf_capacity < MIN_CAPACITY || internal_capacity < MIN_CAPACITY {
            return Err(Error::InvalidConfig(format!(
                "page size {} fits {} leaf entries and {} routing keys, need at least {}",
                page_size, leaf_capacity, internal_capacity, MIN_CAPACITY
            )));
        }
        let max_count = u16::MAX as usize;

        Ok(Self {
            page_size,
            key_size,
            value_size,
            leaf_capacity: leaf_capacity.min(max_count),
            internal_capacity: internal_capacity.min(max_count),
        })
    }

    #[inline]
    fn leaf_record(&self, index: usize) -> usize {
        OFFSET_PAYLOAD + index * (self.key_size + self.value_size)
    }

    #[inline]
    fn child_offset(&self, index: usize) -> usize {
        OFFSET_PAYLOAD + index * PageId::SIZE
    }

    #[inline]
    fn internal_key(&self, index: usize) -> usize {
        self.child_offset(self.internal_capacity + 1) + index * self.key_size
    }

    fn capacity(&self, kind: NodeKind) -> usize {
        match kind {
            NodeKind::Leaf => self.leaf_capacity,
            NodeKind::Internal => self.internal_capacity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Leaf,
    Internal,
}

impl NodeKind {
    fn page_type(self) -> PageType {
        match self {
            NodeKind::Leaf => PageType::BTreeLeaf,
            NodeKind::Internal => PageType::BTreeInternal,
        }
    }
}

/// A node decoded with layout `L`.
pub(crate) type LayoutNode<L> = Node<<L as Layout>::Key, <L as Layout>::Value>;

/// A decoded tree node.
///
/// Readers and the writer decode a node under the page latch, release the
/// latch and work on this copy.
#[derive(Debug, Clone)]
pub struct Node<K, V> {
    pub kind: NodeKind,
    pub generation: u64,
    pub stamp: u64,
    pub successor: GenerationPointer,
    pub keys: Vec<K>,
    /// Leaf values, parallel to `keys`. Empty for internal nodes.
    pub values: Vec<V>,
    /// Internal children, `keys.len() + 1` of them. Empty for leaves.
    pub children: Vec<PageId>,
    /// Right sibling slots. Unused for internal nodes.
    pub right: PointerPair,
}

impl<K: Clone, V: Clone> Node<K, V> {
    pub fn new_leaf(generation: u64, stamp: u64, right: PointerPair) -> Self {
        Self {
            kind: NodeKind::Leaf,
            generation,
            stamp,
            successor: GenerationPointer::EMPTY,
            keys: Vec::new(),
            values: Vec::new(),
            children: Vec::new(),
            right,
        }
    }

    pub fn new_internal(generation: u64, stamp: u64, keys: Vec<K>, children: Vec<PageId>) -> Self {
        Self {
            kind: NodeKind::Internal,
            generation,
            stamp,
            successor: GenerationPointer::EMPTY,
            keys,
            values: Vec::new(),
            children,
            right: PointerPair::single(GenerationPointer::EMPTY),
        }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.kind == NodeKind::Leaf
    }

    /// Decode the node stored in `page`.
    pub fn decode<L>(layout: &L, dims: &NodeDims, page_id: PageId, page: &Page) -> Result<Self>
    where
        L: Layout<Key = K, Value = V>,
    {
        let data = page.as_slice();
        let header = page.header();
        let kind = match header.page_type {
            PageType::BTreeLeaf => NodeKind::Leaf,
            PageType::BTreeInternal => NodeKind::Internal,
            other => {
                return Err(Error::corruption(
                    page_id,
                    format!("expected a node page, found {:?}", other),
                ))
            }
        };

        let count = read_u16(data, OFFSET_KEY_COUNT) as usize;
        if count > dims.capacity(kind) {
            return Err(Error::corruption(
                page_id,
                format!("key count {} exceeds capacity {}", count, dims.capacity(kind)),
            ));
        }

        let mut node = Self {
            kind,
            generation: header.generation,
            stamp: header.stamp,
            successor: GenerationPointer::read_from(data, OFFSET_SUCCESSOR),
            keys: Vec::with_capacity(count + 1),
            values: Vec::new(),
            children: Vec::new(),
            right: PointerPair::read_from(data, OFFSET_RIGHT),
        };

        match kind {
            NodeKind::Leaf => {
                node.values.reserve(count + 1);
                for i in 0..count {
                    let at = dims.leaf_record(i);
                    let value_at = at + dims.key_size;
                    node.keys.push(layout.read_key(&data[at..value_at]));
                    node.values
                        .push(layout.read_value(&data[value_at..value_at + dims.value_size]));
                }
            }
            NodeKind::Internal => {
                node.children.reserve(count + 2);
                for i in 0..=count {
                    node.children
                        .push(PageId::read_from(&data[dims.child_offset(i)..]));
                }
                for i in 0..count {
                    let at = dims.internal_key(i);
                    node.keys.push(layout.read_key(&data[at..at + dims.key_size]));
                }
            }
        }

        Ok(node)
    }

    /// Encode the whole node into `page`.
    ///
    /// # Panics
    /// Panics if the node holds more keys than its capacity.
    pub fn encode<L>(&self, layout: &L, dims: &NodeDims, page: &mut Page)
    where
        L: Layout<Key = K, Value = V>,
    {
        let count = self.keys.len();
        assert!(count <= dims.capacity(self.kind), "node overflow on encode");

        page.set_header(&PageHeader::new(
            self.kind.page_type(),
            self.generation,
            self.stamp,
        ));
        let data = page.as_mut_slice();
        self.successor.write_to(data, OFFSET_SUCCESSOR);
        data[OFFSET_KEY_COUNT..OFFSET_KEY_COUNT + 2].copy_from_slice(&(count as u16).to_le_bytes());
        self.right.write_to(data, OFFSET_RIGHT);

        match self.kind {
            NodeKind::Leaf => {
                for (i, (key, value)) in self.keys.iter().zip(&self.values).enumerate() {
                    let at = dims.leaf_record(i);
                    let value_at = at + dims.key_size;
                    layout.write_key(key, &mut data[at..value_at]);
                    layout.write_value(value, &mut data[value_at..value_at + dims.value_size]);
                }
            }
            NodeKind::Internal => {
                for (i, child) in self.children.iter().enumerate() {
                    child.write_to(&mut data[dims.child_offset(i)..]);
                }
                for (i, key) in self.keys.iter().enumerate() {
                    let at = dims.internal_key(i);
                    layout.write_key(key, &mut data[at..at + dims.key_size]);
                }
            }
        }
    }

    /// Binary search for `key` among the node's keys.
    pub fn search<L>(&self, layout: &L, key: &K) -> std::result::Result<usize, usize>
    where
        L: Layout<Key = K, Value = V>,
    {
        self.keys.binary_search_by(|probe| layout.compare(probe, key))
    }

    /// Index of the child whose subtree holds `key`: the child preceding the
    /// first routing key greater than `key`.
    pub fn child_index<L>(&self, layout: &L, key: &K) -> usize
    where
        L: Layout<Key = K, Value = V>,
    {
        self.keys
            .partition_point(|probe| layout.compare(probe, key) != Ordering::Greater)
    }
}

// ============================================================================
// In-place field access
// ============================================================================

pub(crate) fn read_successor(page: &Page) -> GenerationPointer {
    GenerationPointer::read_from(page.as_slice(), OFFSET_SUCCESSOR)
}

pub(crate) fn write_successor(page: &mut Page, successor: GenerationPointer) {
    successor.write_to(page.as_mut_slice(), OFFSET_SUCCESSOR);
}

pub(crate) fn read_right(page: &Page) -> PointerPair {
    PointerPair::read_from(page.as_slice(), OFFSET_RIGHT)
}

pub(crate) fn write_right(page: &mut Page, right: &PointerPair) {
    right.write_to(page.as_mut_slice(), OFFSET_RIGHT);
}

/// Overwrite child `index` of an internal node.
pub(crate) fn write_child(page: &mut Page, dims: &NodeDims, index: usize, child: PageId) {
    child.write_to(&mut page.as_mut_slice()[dims.child_offset(index)..]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::SimpleLongLayout;

    const PAGE_SIZE: usize = 256;

    fn dims() -> NodeDims {
        NodeDims::new(PAGE_SIZE, 8, 8).unwrap()
    }

    #[test]
    fn test_offsets() {
        assert_eq!(OFFSET_SUCCESSOR, 21);
        assert_eq!(OFFSET_KEY_COUNT, 33);
        assert_eq!(OFFSET_RIGHT, 35);
        assert_eq!(OFFSET_PAYLOAD, 59);
    }

    #[test]
    fn test_capacities() {
        let dims = dims();
        assert_eq!(dims.leaf_capacity, (256 - 59) / 16);
        assert_eq!(dims.internal_capacity, (256 - 59 - 4) / 12);

        // Internal payload fits the page
        assert!(dims.internal_key(dims.internal_capacity) <= PAGE_SIZE);
        assert!(dims.leaf_record(dims.leaf_capacity) <= PAGE_SIZE);
    }

    #[test]
    fn test_too_small_page_rejected() {
        assert!(matches!(
            NodeDims::new(128, 32, 8),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_leaf_codec() {
        let layout = SimpleLongLayout::new();
        let dims = dims();
        let right = PointerPair::single(GenerationPointer::new(PageId::new(9), 3));
        let mut node = Node::new_leaf(3, 77, right);
        node.keys = vec![-5, 1, 40];
        node.values = vec![50, 10, -400];

        let mut page = Page::new(PAGE_SIZE);
        node.encode(&layout, &dims, &mut page);
        assert_eq!(page.page_type(), PageType::BTreeLeaf);

        let decoded = Node::decode(&layout, &dims, PageId::new(4), &page).unwrap();
        assert!(decoded.is_leaf());
        assert_eq!(decoded.generation, 3);
        assert_eq!(decoded.stamp, 77);
        assert_eq!(decoded.keys, vec![-5, 1, 40]);
        assert_eq!(decoded.values, vec![50, 10, -400]);
        assert_eq!(decoded.right, right);
        assert!(decoded.successor.is_empty());
    }

    #[test]
    fn test_internal_codec() {
        let layout = SimpleLongLayout::new();
        let dims = dims();
        let node: Node<i64, i64> = Node::new_internal(
            2,
            1,
            vec![10, 20],
            vec![PageId::new(3), PageId::new(4), PageId::new(5)],
        );

        let mut page = Page::new(PAGE_SIZE);
        node.encode(&layout, &dims, &mut page);
        let decoded = Node::decode(&layout, &dims, PageId::new(2), &page).unwrap();

        assert!(!decoded.is_leaf());
        assert_eq!(decoded.keys, vec![10, 20]);
        assert_eq!(
            decoded.children,
            vec![PageId::new(3), PageId::new(4), PageId::new(5)]
        );
    }

    #[test]
    fn test_child_index_routes_equal_keys_right() {
        let layout = SimpleLongLayout::new();
        let node: Node<i64, i64> = Node::new_internal(
            1,
            1,
            vec![10, 20],
            vec![PageId::new(3), PageId::new(4), PageId::new(5)],
        );

        assert_eq!(node.child_index(&layout, &5), 0);
        assert_eq!(node.child_index(&layout, &10), 1);
        assert_eq!(node.child_index(&layout, &19), 1);
        assert_eq!(node.child_index(&layout, &20), 2);
        assert_eq!(node.child_index(&layout, &i64::MAX), 2);
    }

    #[test]
    fn test_decode_rejects_non_node() {
        let layout = SimpleLongLayout::new();
        let page = Page::new(PAGE_SIZE);
        let err = Node::<i64, i64>::decode(&layout, &dims(), PageId::new(6), &page).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_decode_rejects_oversized_count() {
        let layout = SimpleLongLayout::new();
        let mut page = Page::new(PAGE_SIZE);
        Node::<i64, i64>::new_leaf(1, 1, PointerPair::single(GenerationPointer::EMPTY))
            .encode(&layout, &dims(), &mut page);
        page.as_mut_slice()[OFFSET_KEY_COUNT] = 200;

        let err = Node::<i64, i64>::decode(&layout, &dims(), PageId::new(6), &page).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_in_place_updates_keep_payload() {
        let layout = SimpleLongLayout::new();
        let dims = dims();
        let node: Node<i64, i64> =
            Node::new_internal(1, 1, vec![10], vec![PageId::new(3), PageId::new(4)]);

        let mut page = Page::new(PAGE_SIZE);
        node.encode(&layout, &dims, &mut page);

        let successor = GenerationPointer::new(PageId::new(12), 2);
        write_successor(&mut page, successor);
        write_child(&mut page, &dims, 1, PageId::new(8));

        let decoded = Node::decode(&layout, &dims, PageId::new(2), &page).unwrap();
        assert_eq!(read_successor(&page), successor);
        assert_eq!(decoded.children, vec![PageId::new(3), PageId::new(8)]);
        assert_eq!(decoded.keys, vec![10]);
    }
}
