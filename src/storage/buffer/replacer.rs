use std::fmt::Debug;

pub type FrameId = u32;

/// Eviction policy seam for the buffer pool. Holds only unpinned frames;
/// the pool reports pin transitions and asks for victims.
pub trait Replacer: Send + Sync + Debug {
    /// Select a frame to evict. Returns None while every frame is pinned.
    fn evict(&mut self) -> Option<FrameId>;

    /// Remove a frame from the eviction candidates.
    fn pin(&mut self, frame_id: FrameId);

    /// Add a frame to the eviction candidates, at lowest priority.
    fn unpin(&mut self, frame_id: FrameId);

    /// Number of eviction candidates.
    fn size(&self) -> usize;
}
