//! Crash-consistent B+Tree with generation-based copy-on-write.
//!
//! # Generations
//! Every session writes pages tagged with its own generation. A checkpoint
//! makes that generation *stable* and starts the next one. Pages of a stable
//! generation are never modified in place (apart from two pointer fields
//! readers tolerate); the writer copies them first. After a crash the store
//! therefore still holds the complete tree of the last checkpoint.
//!
//! # Concurrency
//! - one [`Writer`] at a time
//! - any number of [`SeekCursor`]s, concurrently with the writer and with
//!   checkpoints
//! - checkpoints and recovery preparation are serialized with each other
//!
//! # Modules
//! - `pointer` - generation-tagged pointers and their validity rules
//! - `node` - node page codec
//! - `meta` - the two meta slots
//! - `freelist` - reclaimed pages and their on-disk chain
//! - `readers` - live reader registry gating page reuse
//! - `tree` - open, format, close, introspection
//! - `navigator` - reader descent
//! - `writer` - put, remove, merge
//! - `cursor` - range scans
//! - `checkpoint`, `recovery`, `consistency`

mod checkpoint;
mod consistency;
mod cursor;
mod freelist;
mod meta;
mod navigator;
mod node;
mod pointer;
mod readers;
mod recovery;
mod tree;
mod writer;

pub use consistency::ConsistencyReport;
pub use cursor::SeekCursor;
pub use tree::BTree;
pub use writer::{Writer, WriterOptions};
