//! Eviction policy (replacer).
//!
//! - [`FifoReplacer`] - evicts unpinned frames in first-load order
//!
//! Tree pages near the root are re-pinned on every descent, so they are
//! rarely unpinned when their turn comes and get pushed to the back of the
//! queue again by the pool.

mod fifo;

pub use fifo::FifoReplacer;
