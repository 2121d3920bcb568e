//! Storage layer - page stores, page formats and IO throttling.
//!
//! This module handles persistent storage:
//! - [`PageStore`] - The contract the buffer pool writes through
//! - [`DiskManager`] - File-backed page store
//! - [`MemoryStore`] - In-memory page store with crash snapshots
//! - [`IoLimiter`] - Checkpoint flush throttling
//! - [`page`] - Page types and layouts

mod disk_manager;
mod limiter;
mod memory_store;
pub mod page;
mod page_store;

pub use disk_manager::DiskManager;
pub use limiter::{IoLimiter, RateLimiter, Unlimited, INITIAL_STAMP};
pub use memory_store::MemoryStore;
pub use page_store::PageStore;
