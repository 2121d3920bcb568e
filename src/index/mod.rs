//! Index structures.
//!
//! - [`btree`] - The crash-consistent B+Tree
//! - [`Layout`] - Key/value ordering and fixed-size encoding
//! - [`Merger`] - Value combination for `Writer::merge`
//! - [`Monitor`] - Lifecycle callbacks

pub mod btree;
mod layout;
mod merger;
mod monitor;

pub use layout::{Layout, SimpleLongLayout};
pub use merger::{KeepExisting, Merger, Overwrite};
pub use monitor::{Monitor, NoMonitor};
