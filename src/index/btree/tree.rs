//! The tree handle: open, format, introspection and shutdown.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::buffer::{BufferPoolManager, StatsSnapshot};
use crate::common::config::TreeConfig;
use crate::common::{Error, PageId, Result};
use crate::index::{Layout, Monitor};
use crate::storage::{PageStore, Unlimited};

use super::cursor::SeekCursor;
use super::freelist::FreeList;
use super::meta::{self, Meta, FIRST_DATA_PAGE};
use super::node::{LayoutNode, Node, NodeDims};
use super::pointer::{GenerationPointer, Generations, PointerPair};
use super::readers::ReaderRegistry;
use super::writer::{Writer, WriterOptions};

/// Writer-side state, guarded by `BTree::state`.
pub(crate) struct TreeState {
    pub root: PageId,
    /// Levels from root to leaf; a lone root leaf is height 1.
    pub height: usize,
    pub generations: Generations,
    /// First page never handed out.
    pub high_water: u32,
    pub freelist: FreeList,
    /// Pages of the durable freelist chain.
    pub chain: Vec<PageId>,
    /// Last meta state written.
    pub meta: Meta,
    last_stamp: u64,
}

impl TreeState {
    pub fn next_stamp(&mut self) -> u64 {
        self.last_stamp += 1;
        self.last_stamp
    }
}

/// What readers need to start a descent, published by the writer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RootSnapshot {
    pub root: PageId,
    pub height: usize,
    pub generations: Generations,
}

/// A crash-consistent B+Tree over a [`PageStore`].
///
/// One [`Writer`] at a time mutates the tree; any number of
/// [`SeekCursor`]s read concurrently. Changes become durable at
/// [`checkpoint`](BTree::checkpoint). Dropping the tree without
/// [`close`](BTree::close) is a crash: the next open reports
/// [`needs_recovery`](BTree::needs_recovery) and the caller replays its log
/// after [`prepare_for_recovery`](BTree::prepare_for_recovery).
///
/// # Example
/// ```
/// use genbtree::{BTree, MemoryStore, NoMonitor, SimpleLongLayout, TreeConfig, Unlimited};
/// use genbtree::WriterOptions;
///
/// let config = TreeConfig::default().with_page_size(256).with_pool_size(32);
/// let store = MemoryStore::new(256);
/// let tree = BTree::open_or_create(store, SimpleLongLayout::new(), config, NoMonitor).unwrap();
///
/// let mut writer = tree.writer(WriterOptions::default()).unwrap();
/// for key in 0..100 {
///     writer.put(key, key * 10).unwrap();
/// }
/// writer.close();
/// tree.checkpoint(&Unlimited).unwrap();
///
/// let hits: Vec<(i64, i64)> = tree.seek(10, 13).unwrap().map(|hit| hit.unwrap()).collect();
/// assert_eq!(hits, vec![(10, 100), (11, 110), (12, 120)]);
/// tree.close().unwrap();
/// ```
pub struct BTree<L: Layout> {
    pub(crate) pool: BufferPoolManager,
    pub(crate) layout: L,
    pub(crate) dims: NodeDims,
    pub(crate) config: TreeConfig,
    pub(crate) state: Mutex<TreeState>,
    pub(crate) published: RwLock<RootSnapshot>,
    pub(crate) readers: ReaderRegistry,
    pub(crate) writer_open: AtomicBool,
    pub(crate) needs_recovery: AtomicBool,
    /// Serializes checkpoints and recovery preparation.
    pub(crate) checkpoint_lock: Mutex<()>,
    pub(crate) monitor: Box<dyn Monitor>,
}

impl<L: Layout> BTree<L> {
    /// Open the tree stored in `store`, formatting it first if the store is
    /// empty.
    ///
    /// Every open reserves a new generation durably before returning. If the
    /// previous session did not shut down cleanly the tree opens in a state
    /// that allows reads but requires
    /// [`prepare_for_recovery`](BTree::prepare_for_recovery) before writing.
    ///
    /// # Errors
    /// - `Error::InvalidConfig` if the configuration or layout cannot work
    ///   with the page size
    /// - `Error::IncompatibleFormat` if the store holds a tree written with a
    ///   different layout or page size
    /// - `Error::CorruptionDetected` if neither meta slot is readable
    pub fn open_or_create<S, M>(store: S, layout: L, config: TreeConfig, monitor: M) -> Result<Self>
    where
        S: PageStore + 'static,
        M: Monitor + 'static,
    {
        config.validate()?;
        if store.page_size() != config.page_size {
            return Err(Error::InvalidConfig(format!(
                "store page size {} differs from configured {}",
                store.page_size(),
                config.page_size
            )));
        }
        let dims = NodeDims::new(config.page_size, layout.key_size(), layout.value_size())?;
        let pool = BufferPoolManager::new(config.pool_size, Box::new(store));

        let created = pool.store_page_count() == 0;
        if created {
            Self::format(&pool, &layout, &dims, config.page_size)?;
        }

        let durable = meta::read_newest(&pool)?;
        durable.validate(&layout, config.page_size)?;

        // Reserve the session's generation before anything of it can reach
        // the store.
        let generation = durable.unstable + 1;
        let reserved = Meta {
            unstable: generation,
            clean: false,
            ..durable.next()
        };
        meta::write(&pool, &reserved)?;

        let (freelist, chain) = FreeList::load(&pool, durable.freelist_head)?;
        let height = measure_height(&pool, &layout, &dims, durable.root)?;
        let generations = Generations::new(durable.stable, generation);

        let state = TreeState {
            root: durable.root,
            height,
            generations,
            high_water: durable.high_water,
            freelist,
            chain,
            meta: reserved,
            last_stamp: generation << 32,
        };
        let snapshot = RootSnapshot {
            root: durable.root,
            height,
            generations,
        };

        if durable.clean {
            info!(
                generation,
                stable = durable.stable,
                root = %durable.root,
                height,
                created,
                "tree.open"
            );
        } else {
            warn!(
                generation,
                stable = durable.stable,
                root = %durable.root,
                "tree.open.unclean"
            );
        }
        monitor.opened(durable.clean);

        Ok(Self {
            pool,
            layout,
            dims,
            config,
            state: Mutex::new(state),
            published: RwLock::new(snapshot),
            readers: ReaderRegistry::new(),
            writer_open: AtomicBool::new(false),
            needs_recovery: AtomicBool::new(!durable.clean),
            checkpoint_lock: Mutex::new(()),
            monitor: Box::new(monitor),
        })
    }

    /// Write an empty tree: one root leaf in generation 1 and both meta
    /// slots.
    fn format(pool: &BufferPoolManager, layout: &L, dims: &NodeDims, page_size: usize) -> Result<()> {
        let root = PageId::new(FIRST_DATA_PAGE);
        let no_sibling = PointerPair::single(GenerationPointer::new(PageId::INVALID, 1));
        {
            let mut guard = pool.create_page(root)?;
            let leaf: LayoutNode<L> = Node::new_leaf(1, 1, no_sibling);
            leaf.encode(layout, dims, &mut guard);
        }
        pool.flush_all_pages()?;
        pool.sync()?;

        let initial = Meta::initial(layout, page_size, root);
        meta::write(
            pool,
            &Meta {
                sequence: 0,
                ..initial
            },
        )?;
        meta::write(pool, &initial)?;

        debug!(root = %root, page_size, "tree.format");
        Ok(())
    }

    /// Acquire the exclusive writer.
    ///
    /// # Errors
    /// - `Error::RecoveryPrecondition` if the tree needs recovery
    /// - `Error::ConcurrencyViolation` if a writer is already open
    /// - `Error::InvalidConfig` for unusable options
    pub fn writer(&self, options: WriterOptions) -> Result<Writer<'_, L>> {
        options.validate()?;
        if self.needs_recovery() {
            return Err(Error::RecoveryPrecondition);
        }
        if self
            .writer_open
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::ConcurrencyViolation("a writer is already open"));
        }
        Ok(Writer::new(self, options))
    }

    /// Cursor over entries with `from <= key < to`, in ascending order.
    pub fn seek(&self, from: L::Key, to: L::Key) -> Result<SeekCursor<'_, L>> {
        Ok(SeekCursor::new(self, from, to))
    }

    /// Checkpoint with the clean flag set and release the tree.
    ///
    /// A tree still waiting for recovery is released without a checkpoint and
    /// stays marked unclean.
    pub fn close(self) -> Result<()> {
        if self.needs_recovery() {
            warn!("tree.close.recovery_pending");
            return Ok(());
        }
        self.checkpoint_with(&Unlimited, true)?;
        info!(
            stable = self.stable_generation(),
            pool = %self.pool_stats(),
            "tree.close"
        );
        Ok(())
    }

    /// Write every dirty page to the store without establishing a recovery
    /// point.
    ///
    /// The buffer pool does this on its own for evicted pages; calling it
    /// explicitly puts the store in the state a crash right now would leave.
    pub fn flush_pages(&self) -> Result<()> {
        self.pool.flush_all_pages()?;
        self.pool.sync()
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// The previous session ended without a clean close and
    /// `prepare_for_recovery` has not run yet.
    pub fn needs_recovery(&self) -> bool {
        self.needs_recovery.load(Ordering::Acquire)
    }

    /// The generation the writer currently writes.
    pub fn generation(&self) -> u64 {
        self.published.read().generations.unstable
    }

    /// The last durable generation.
    pub fn stable_generation(&self) -> u64 {
        self.published.read().generations.stable
    }

    /// Number of levels, 1 for a tree that is a single leaf.
    pub fn height(&self) -> usize {
        self.published.read().height
    }

    /// Number of pages waiting in the freelist.
    pub fn free_pages(&self) -> usize {
        self.state.lock().freelist.len()
    }

    pub fn pool_stats(&self) -> StatsSnapshot {
        self.pool.stats().snapshot()
    }

    pub fn layout(&self) -> &L {
        &self.layout
    }

    // ========================================================================
    // Internal
    // ========================================================================

    pub(crate) fn snapshot(&self) -> RootSnapshot {
        *self.published.read()
    }

    pub(crate) fn publish(&self, state: &TreeState) {
        *self.published.write() = RootSnapshot {
            root: state.root,
            height: state.height,
            generations: state.generations,
        };
    }
}

/// No valid tree gets anywhere near this deep.
const MAX_HEIGHT: usize = 64;

/// Count levels by following leftmost children from `root`.
pub(crate) fn measure_height<L: Layout>(
    pool: &BufferPoolManager,
    layout: &L,
    dims: &NodeDims,
    root: PageId,
) -> Result<usize> {
    let mut height = 1;
    let mut page_id = root;
    loop {
        let node: LayoutNode<L> = {
            let guard = pool.fetch_page_read(page_id)?;
            Node::decode(layout, dims, page_id, &guard)?
        };
        if node.is_leaf() {
            return Ok(height);
        }
        page_id = node.children[0];
        height += 1;
        if height > MAX_HEIGHT {
            return Err(Error::corruption(page_id, "tree deeper than any valid tree"));
        }
    }
}
