//! Lifecycle callbacks.

/// Receives notifications about tree lifecycle events.
///
/// Every method has an empty default, so implementors only override what
/// they need. Callbacks run on the thread performing the operation, some of
/// them while internal locks are held: they must not call back into the tree.
pub trait Monitor: Send + Sync {
    /// A tree was opened. `clean` is false after an unclean shutdown.
    fn opened(&self, _clean: bool) {}

    /// A checkpoint made `stable_generation` durable.
    fn checkpoint_completed(&self, _stable_generation: u64, _pages_flushed: usize) {}

    /// `prepare_for_recovery` finished and cleared `cleaned_pointers` pointers
    /// left behind by crashed generations.
    fn recovery_prepared(&self, _cleaned_pointers: usize) {}

    /// The root split and the tree grew to `height` levels.
    fn root_split(&self, _height: usize) {}
}

/// A monitor that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMonitor;

impl Monitor for NoMonitor {}
