use super::replacer::{FrameId, Replacer};
use std::collections::{HashSet, VecDeque};

/// Least-recently-used eviction.
///
/// The queue orders candidates oldest-first; membership lives in the set.
/// `pin` only removes from the set, leaving a stale queue entry behind;
/// `unpin` purges any stale entry for its frame before re-queueing it at
/// the MRU end, so every member appears in the queue exactly once and the
/// front entry is always the true LRU candidate.
#[derive(Debug)]
pub struct LruReplacer {
    queue: VecDeque<FrameId>,
    members: HashSet<FrameId>,
    max_size: usize,
}

impl LruReplacer {
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(max_size),
            members: HashSet::with_capacity(max_size),
            max_size,
        }
    }
}

impl Replacer for LruReplacer {
    fn evict(&mut self) -> Option<FrameId> {
        while let Some(frame_id) = self.queue.pop_front() {
            if self.members.remove(&frame_id) {
                return Some(frame_id);
            }
            // stale entry from a pin, skip
        }
        None
    }

    fn pin(&mut self, frame_id: FrameId) {
        self.members.remove(&frame_id);
    }

    fn unpin(&mut self, frame_id: FrameId) {
        if self.members.len() >= self.max_size || !self.members.insert(frame_id) {
            return;
        }
        // a pin may have left a stale entry at this frame's old position;
        // purge it so the new MRU position is the only one evict can find
        self.queue.retain(|candidate| *candidate != frame_id);
        self.queue.push_back(frame_id);
    }

    fn size(&self) -> usize {
        self.members.len()
    }
}
