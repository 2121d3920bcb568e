//! FIFO (First-In-First-Out) replacement policy.

use std::collections::{HashMap, VecDeque};

use crate::common::FrameId;

/// A FIFO eviction policy.
///
/// Frames are queued the first time they are accessed. Eviction takes the
/// oldest queued frame that is currently evictable; pinned frames met on the
/// way are dropped from the queue and come back on their next access.
#[derive(Debug, Default)]
pub struct FifoReplacer {
    /// Frame IDs in insertion order (front = oldest).
    queue: VecDeque<FrameId>,

    /// Queued frames and whether each is currently evictable.
    tracked: HashMap<FrameId, bool>,
}

impl FifoReplacer {
    /// Create a new FIFO replacer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a frame was accessed. Queues the frame if it is not
    /// already queued; a queued frame keeps its position.
    pub fn record_access(&mut self, frame_id: FrameId) {
        if !self.tracked.contains_key(&frame_id) {
            self.queue.push_back(frame_id);
            self.tracked.insert(frame_id, false);
        }
    }

    /// Mark a frame as evictable (pin count dropped to 0) or not.
    ///
    /// Frames that are not queued are ignored.
    pub fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) {
        if let Some(flag) = self.tracked.get_mut(&frame_id) {
            *flag = evictable;
        }
    }

    /// Select a victim frame for eviction.
    ///
    /// Returns the oldest evictable frame, or None if no queued frame is
    /// evictable.
    pub fn evict(&mut self) -> Option<FrameId> {
        while let Some(frame_id) = self.queue.pop_front() {
            if self.tracked.remove(&frame_id) == Some(true) {
                return Some(frame_id);
            }
        }
        None
    }

    /// Number of evictable frames.
    pub fn size(&self) -> usize {
        self.tracked.values().filter(|&&evictable| evictable).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replacer_with(frames: &[(usize, bool)]) -> FifoReplacer {
        let mut replacer = FifoReplacer::new();
        for &(id, evictable) in frames {
            replacer.record_access(FrameId::new(id));
            replacer.set_evictable(FrameId::new(id), evictable);
        }
        replacer
    }

    #[test]
    fn test_fifo_order() {
        let mut replacer = replacer_with(&[(0, true), (1, true), (2, true)]);
        assert_eq!(replacer.size(), 3);

        assert_eq!(replacer.evict(), Some(FrameId::new(0)));
        assert_eq!(replacer.evict(), Some(FrameId::new(1)));
        assert_eq!(replacer.evict(), Some(FrameId::new(2)));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_pinned_frames_leave_queue_until_reaccessed() {
        let mut replacer = replacer_with(&[(0, false), (1, true), (2, false)]);

        assert_eq!(replacer.evict(), Some(FrameId::new(1)));
        assert_eq!(replacer.evict(), None);

        // Frame 0 was skipped and dropped; a new access queues it again
        replacer.record_access(FrameId::new(0));
        replacer.set_evictable(FrameId::new(0), true);
        assert_eq!(replacer.evict(), Some(FrameId::new(0)));
    }

    #[test]
    fn test_reaccess_keeps_position() {
        let mut replacer = replacer_with(&[(0, true), (1, true)]);
        replacer.record_access(FrameId::new(0));

        assert_eq!(replacer.evict(), Some(FrameId::new(0)));
        assert_eq!(replacer.evict(), Some(FrameId::new(1)));
    }

    #[test]
    fn test_set_evictable_ignores_untracked() {
        let mut replacer = FifoReplacer::new();
        replacer.set_evictable(FrameId::new(7), true);
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.evict(), None);
    }
}
