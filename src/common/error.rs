//! Error types for genbtree.

use thiserror::Error;

use crate::common::PageId;

/// Convenient Result type alias.
///
/// Instead of writing `Result<T, Error>` everywhere, we can write `Result<T>`.
pub type Result<T> = std::result::Result<T, Error>;

/// All possible errors in genbtree.
///
/// Errors fall into three classes that callers treat differently:
/// - IO failures ([`Error::is_io_failure`]): the operation was aborted, the
///   durable state is unaffected, the caller may retry.
/// - Corruption ([`Error::is_corruption`]): an on-disk invariant is broken.
///   Never retried.
/// - Usage errors: concurrency violations, missing recovery, bad configuration.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the page store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested page does not exist in the page store.
    #[error("Page {0} not found")]
    PageNotFound(u32),

    /// Buffer pool has no free frames and cannot evict any pages.
    ///
    /// This happens when all frames are pinned.
    #[error("No free frames available in buffer pool")]
    NoFreeFrames,

    /// The provided page ID is invalid (e.g., the sentinel or past max pages).
    #[error("Invalid page ID: {0}")]
    InvalidPageId(u32),

    /// A reader restarted its descent more often than the retry bound allows.
    #[error("reader gave up after {attempts} restarts")]
    ReadRetriesExhausted { attempts: usize },

    /// A structural invariant of the tree is broken.
    #[error("corruption detected at {page}: {reason}")]
    CorruptionDetected { page: PageId, reason: String },

    /// Exclusive access was requested while it is already held.
    #[error("concurrency violation: {0}")]
    ConcurrencyViolation(&'static str),

    /// The tree was reopened after an unclean shutdown and
    /// `prepare_for_recovery` has not been called yet.
    #[error("tree needs recovery: call prepare_for_recovery first")]
    RecoveryPrecondition,

    /// The meta page does not match the layout or configuration supplied.
    #[error("incompatible format: {0}")]
    IncompatibleFormat(String),

    /// Unusable configuration or options.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Shorthand for building a corruption error.
    pub fn corruption(page: PageId, reason: impl Into<String>) -> Self {
        Error::CorruptionDetected {
            page,
            reason: reason.into(),
        }
    }

    /// Whether the error came from the IO path (page store, page cache, or a
    /// reader giving up on a changing tree).
    pub fn is_io_failure(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::PageNotFound(_)
                | Error::NoFreeFrames
                | Error::ReadRetriesExhausted { .. }
        )
    }

    /// Whether the error reports a broken structural invariant.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::CorruptionDetected { .. })
    }
}
