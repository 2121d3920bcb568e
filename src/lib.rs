//! genbtree - a crash-consistent B+Tree index for embedded databases.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            genbtree                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │                Index Layer (index/btree/)               │   │
//! │  │   Writer (COW, splits)   SeekCursor   Checkpoint        │   │
//! │  │   Recovery preparation   Consistency check              │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │                  Buffer Pool (buffer/)                  │   │
//! │  │    BufferPoolManager + Frame + FIFO eviction + stats    │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │                 Storage Layer (storage/)                │   │
//! │  │   PageStore: DiskManager | MemoryStore   IoLimiter      │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - Shared primitives (PageId, FrameId, Error, config)
//! - [`buffer`] - Buffer pool management
//! - [`storage`] - Page stores, page formats and IO throttling
//! - [`index`] - The B+Tree and its pluggable layout, merger and monitor
//!
//! # Quick Start
//! ```no_run
//! use genbtree::{BTree, DiskManager, NoMonitor, SimpleLongLayout, TreeConfig, Unlimited};
//! use genbtree::WriterOptions;
//!
//! let config = TreeConfig::default();
//! let store = DiskManager::open_or_create("index.db", config.page_size).unwrap();
//! let tree = BTree::open_or_create(store, SimpleLongLayout::new(), config, NoMonitor).unwrap();
//! if tree.needs_recovery() {
//!     tree.prepare_for_recovery().unwrap();
//!     // replay the log here
//! }
//!
//! let mut writer = tree.writer(WriterOptions::default()).unwrap();
//! writer.put(1, 100).unwrap();
//! writer.close();
//! tree.checkpoint(&Unlimited).unwrap();
//! tree.close().unwrap();
//! ```

pub mod buffer;
pub mod common;
pub mod index;
pub mod storage;

// Re-export commonly used items at crate root for convenience
pub use common::config::TreeConfig;
pub use common::{Error, FrameId, PageId, Result};

pub use buffer::{BufferPoolManager, BufferPoolStats, StatsSnapshot};
pub use index::btree::{BTree, ConsistencyReport, SeekCursor, Writer, WriterOptions};
pub use index::{KeepExisting, Layout, Merger, Monitor, NoMonitor, Overwrite, SimpleLongLayout};
pub use storage::page::{Page, PageHeader, PageType};
pub use storage::{DiskManager, IoLimiter, MemoryStore, PageStore, RateLimiter, Unlimited};
