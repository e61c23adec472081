//! The storage layer: byte-packed pages, page ranges, the buffer pool, and
//! page persistence.
//!
//! Layers, leaf to root:
//!
//! - **PhysicalPage**: one column's fixed-width slots for one page
//! - **LogicalPage**: column-parallel physical pages sharing a slot index
//! - **PageRange**: sixteen fixed base pages plus growing tail pages
//! - **BufferPool**: pinned LRU cache fronting the page store
//! - **PageStore**: the persistence seam (in-memory or file-backed)
//!
//! Everything above this module addresses records by their location within
//! a page range and never holds a page reference past the operation that
//! pinned it.

pub mod buffer;
pub mod disk;
pub mod error;
pub mod page;
pub mod page_range;

pub use buffer::{BufferPool, FrameGuard};
pub use disk::{Catalog, FileStore, MemoryStore, PageStore};
pub use error::{StorageError, StorageResult};
pub use page::{LogicalPage, PageKey, PageKind, PhysicalPage, TableId};
pub use page_range::PageRange;
