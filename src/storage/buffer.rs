//! The buffer pool: a fixed budget of in-memory frames fronting the page
//! store, shared by every table in the database.
//!
//! Callers address pages by [`PageKey`] and get back a pinned [`FrameGuard`].
//! A pinned frame cannot be evicted; dropping the guard releases the pin.
//! Once the budget is spent the pool evicts the least recently used unpinned
//! frame, flushing it first when it carries unwritten changes. When every
//! frame is pinned a fetch fails with `BufferExhausted` instead of blocking.

pub mod lru;
pub mod replacer;

use crate::storage::disk::PageStore;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{LogicalPage, PageKey};
use log::debug;
use lru::LruReplacer;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use replacer::{FrameId, Replacer};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct Frame {
    key: PageKey,
    pin_count: AtomicUsize,
    is_dirty: AtomicBool,
    page: RwLock<LogicalPage>,
}

impl Frame {
    /// A frame is born pinned by the fetch that created it.
    fn new(key: PageKey, page: LogicalPage) -> Self {
        Self {
            key,
            pin_count: AtomicUsize::new(1),
            is_dirty: AtomicBool::new(false),
            page: RwLock::new(page),
        }
    }
}

struct PoolState {
    frames: HashMap<FrameId, Arc<Frame>>,
    page_table: HashMap<PageKey, FrameId>,
    replacer: Box<dyn Replacer>,
    next_frame_id: FrameId,
}

struct PoolInner {
    state: Mutex<PoolState>,
    store: Arc<dyn PageStore>,
    capacity: usize,
}

/// Cheaply cloneable handle to a shared pool.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    pub fn new(store: Arc<dyn PageStore>, capacity: usize) -> Self {
        Self::with_replacer(store, Box::new(LruReplacer::new(capacity)), capacity)
    }

    pub fn with_replacer(
        store: Arc<dyn PageStore>,
        replacer: Box<dyn Replacer>,
        capacity: usize,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState {
                    frames: HashMap::with_capacity(capacity),
                    page_table: HashMap::with_capacity(capacity),
                    replacer,
                    next_frame_id: 0,
                }),
                store,
                capacity,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Number of pages currently held in frames.
    pub fn num_resident(&self) -> usize {
        self.inner.state.lock().frames.len()
    }

    /// Pins the page at `key`, reading it from the store on a miss. A key
    /// the store has never seen materializes as an empty page with
    /// `total_columns` columns.
    pub fn fetch_page(&self, key: PageKey, total_columns: usize) -> StorageResult<FrameGuard> {
        let mut state = self.inner.state.lock();
        if let Some(&frame_id) = state.page_table.get(&key) {
            if let Some(frame) = state.frames.get(&frame_id) {
                let frame = Arc::clone(frame);
                frame.pin_count.fetch_add(1, Ordering::AcqRel);
                state.replacer.pin(frame_id);
                return Ok(self.guard(frame_id, frame));
            }
        }

        let frame_id = self.admit(&mut state)?;
        let page = match self.inner.store.load_page(&key)? {
            Some(page) => page,
            None => LogicalPage::new(total_columns),
        };
        let frame = Arc::new(Frame::new(key, page));
        state.frames.insert(frame_id, Arc::clone(&frame));
        state.page_table.insert(key, frame_id);
        Ok(self.guard(frame_id, frame))
    }

    /// Writes every dirty resident page back to the store. Residency and
    /// pins are untouched.
    pub fn flush_all(&self) -> StorageResult<()> {
        let frames: Vec<Arc<Frame>> = {
            let state = self.inner.state.lock();
            state.frames.values().cloned().collect()
        };
        for frame in frames {
            if !frame.is_dirty.load(Ordering::Acquire) {
                continue;
            }
            let page = frame.page.read();
            self.inner.store.store_page(&frame.key, &page)?;
            frame.is_dirty.store(false, Ordering::Release);
        }
        Ok(())
    }

    /// Finds a frame id for a new page, evicting the least recently used
    /// unpinned frame once the pool is full.
    fn admit(&self, state: &mut PoolState) -> StorageResult<FrameId> {
        if state.frames.len() < self.inner.capacity {
            let frame_id = state.next_frame_id;
            state.next_frame_id += 1;
            return Ok(frame_id);
        }

        let (victim_id, victim) = loop {
            let frame_id = state
                .replacer
                .evict()
                .ok_or(StorageError::BufferExhausted {
                    capacity: self.inner.capacity,
                })?;
            if let Some(frame) = state.frames.get(&frame_id) {
                break (frame_id, Arc::clone(frame));
            }
        };

        if victim.is_dirty.load(Ordering::Acquire) {
            debug!("flushing dirty page {} for eviction", victim.key);
            let page = victim.page.read();
            if let Err(err) = self.inner.store.store_page(&victim.key, &page) {
                // keep the page resident and evictable rather than lose it
                drop(page);
                state.replacer.unpin(victim_id);
                return Err(err);
            }
            victim.is_dirty.store(false, Ordering::Release);
        }

        state.frames.remove(&victim_id);
        state.page_table.remove(&victim.key);
        Ok(victim_id)
    }

    fn guard(&self, frame_id: FrameId, frame: Arc<Frame>) -> FrameGuard {
        FrameGuard {
            pool: Arc::clone(&self.inner),
            frame_id,
            frame,
        }
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("capacity", &self.inner.capacity)
            .field("num_resident", &self.num_resident())
            .finish()
    }
}

/// A pinned page. The page stays in its frame at least until the guard is
/// dropped.
pub struct FrameGuard {
    pool: Arc<PoolInner>,
    frame_id: FrameId,
    frame: Arc<Frame>,
}

impl FrameGuard {
    pub fn key(&self) -> PageKey {
        self.frame.key
    }

    /// Read access to the pinned page.
    pub fn page(&self) -> RwLockReadGuard<'_, LogicalPage> {
        self.frame.page.read()
    }

    /// Write access to the pinned page. Marks the frame dirty.
    pub fn page_mut(&self) -> RwLockWriteGuard<'_, LogicalPage> {
        let page = self.frame.page.write();
        self.frame.is_dirty.store(true, Ordering::Release);
        page
    }
}

impl std::fmt::Debug for FrameGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameGuard")
            .field("key", &self.frame.key)
            .field("frame_id", &self.frame_id)
            .finish()
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        // Pin transitions happen under the pool lock; a concurrent fetch
        // cannot slip in between the decrement and the replacer update.
        let mut state = self.pool.state.lock();
        if self.frame.pin_count.fetch_sub(1, Ordering::AcqRel) == 1 {
            state.replacer.unpin(self.frame_id);
        }
    }
}
