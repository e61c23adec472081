//! Engine-wide constants: page geometry, record layout, and tuning knobs.

/// Size of a physical page in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Size of one record slot in bytes (a single `i64`).
pub const RECORD_SIZE: usize = 8;

/// Record slots per physical page, and therefore records per logical page.
pub const MAX_RECORDS_PER_PAGE: usize = PAGE_SIZE / RECORD_SIZE;

/// Base logical pages pre-allocated in every page range.
pub const NUM_BASE_PAGES: usize = 16;

/// Base-record capacity of one page range.
pub const MAX_RECORDS_PER_PAGE_RANGE: usize = NUM_BASE_PAGES * MAX_RECORDS_PER_PAGE;

/// Meta column layout. Every record row stores these ahead of its data
/// columns, in this order.
pub const INDIRECTION_COLUMN: usize = 0;
pub const RID_COLUMN: usize = 1;
pub const TIMESTAMP_COLUMN: usize = 2;
pub const SCHEMA_ENCODING_COLUMN: usize = 3;
pub const TAIL_SEQUENCE_COLUMN: usize = 4;
pub const NUM_META_COLUMNS: usize = 5;

/// Widest data-column count the schema-encoding bit vector can describe.
pub const MAX_DATA_COLUMNS: usize = 63;

/// Updates applied to a page range before it is queued for merging.
pub const MERGE_UPDATE_THRESHOLD: usize = 512;

/// Default buffer pool capacity in frames.
pub const DEFAULT_POOL_FRAMES: usize = 64;
