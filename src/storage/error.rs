//! Storage layer error types.

use thiserror::Error;

/// Errors that can occur in the storage layer.
///
/// `PageFull` and `RangeFull` are expected capacity conditions a caller
/// can respond to; `BufferExhausted` and the I/O variants are defects that
/// must propagate rather than be absorbed into a retry or an abort.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Page is full: {len} slots used of {capacity}")]
    PageFull { len: usize, capacity: usize },

    #[error("Page range is full: no base page has a free slot")]
    RangeFull,

    #[error("Invalid slot {slot}: page holds {len} records")]
    SlotOutOfBounds { slot: usize, len: usize },

    #[error("Invalid column {column}: page holds {num_columns} columns")]
    ColumnOutOfBounds { column: usize, num_columns: usize },

    #[error("Expected {expected} column values, got {got}")]
    ColumnCountMismatch { expected: usize, got: usize },

    #[error("Buffer pool exhausted: all {capacity} frames are pinned")]
    BufferExhausted { capacity: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
