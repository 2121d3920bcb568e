//! Checkpoint IO throttling.
//!
//! A checkpoint may have to write a lot of dirty pages. The buffer pool calls
//! an [`IoLimiter`] after every batch so the embedding database can keep the
//! flush from starving foreground IO.

use std::thread;
use std::time::{Duration, Instant};

/// Stamp passed to the first `maybe_limit` call of a flush.
pub const INITIAL_STAMP: u64 = 0;

/// Regulates flush throughput.
pub trait IoLimiter: Send + Sync {
    /// Called after `recently_completed_ios` pages were written since the
    /// previous call. May block to slow the flush down. Returns a stamp that
    /// is handed back on the next call.
    fn maybe_limit(&self, previous_stamp: u64, recently_completed_ios: usize) -> u64;
}

/// Never blocks.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unlimited;

impl IoLimiter for Unlimited {
    fn maybe_limit(&self, previous_stamp: u64, _recently_completed_ios: usize) -> u64 {
        previous_stamp
    }
}

/// Caps the flush at a fixed number of pages per second.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    pages_per_second: u64,
    origin: Instant,
}

impl RateLimiter {
    /// # Panics
    /// Panics if `pages_per_second` is 0.
    pub fn pages_per_second(pages_per_second: u64) -> Self {
        assert!(pages_per_second > 0, "pages_per_second must be > 0");
        Self {
            pages_per_second,
            origin: Instant::now(),
        }
    }

    fn now_stamp(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

impl IoLimiter for RateLimiter {
    fn maybe_limit(&self, previous_stamp: u64, recently_completed_ios: usize) -> u64 {
        let now = self.now_stamp();
        if previous_stamp == INITIAL_STAMP {
            return now.max(1);
        }
        let budget_nanos = recently_completed_ios as u64 * 1_000_000_000 / self.pages_per_second;
        let spent = now.saturating_sub(previous_stamp);
        if spent < budget_nanos {
            thread::sleep(Duration::from_nanos(budget_nanos - spent));
        }
        self.now_stamp().max(1)
    }
}
