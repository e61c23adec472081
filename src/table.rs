//! Tables: the page directory, append-only record versioning, and the
//! background merge.
//!
//! A record is born as a base row and never mutated in place by callers.
//! Each update appends two tail rows to the record's lineage: a snapshot
//! of the state being replaced, then the new state, with the base row's
//! INDIRECTION repointed at the new head. Reading any historical version
//! is a walk backward along INDIRECTION hops. A per-table merge thread
//! periodically folds the newest committed snapshot back into the base
//! row so point reads stop paying for the walk.
//!
//! Deletes are logical: directory entries vanish and the affected rows are
//! tombstoned, but their storage is never reclaimed. Orphaned tail rows
//! (from aborted updates or deleted lineages) are likewise left in place.

use crate::concurrency::lock::{LockManager, LockMode};
use crate::concurrency::transaction::TransactionId;
use crate::config::{
    INDIRECTION_COLUMN, MAX_DATA_COLUMNS, NUM_BASE_PAGES, NUM_META_COLUMNS, RID_COLUMN,
    SCHEMA_ENCODING_COLUMN, TAIL_SEQUENCE_COLUMN,
};
use crate::index::Index;
use crate::storage::buffer::BufferPool;
use crate::storage::error::StorageError;
use crate::storage::page::{PageKind, TableId};
use crate::storage::page_range::PageRange;
use dashmap::DashMap;
use log::{debug, warn};
use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// A record identifier: monotonic per table, starting at 1 and never
/// reused. Zero is the tombstone sentinel and never names a live record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Rid(pub u64);

impl Rid {
    /// The deleted/invalid sentinel.
    pub const INVALID: Rid = Rid(0);

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }

    pub fn as_i64(&self) -> i64 {
        self.0 as i64
    }

    pub fn from_i64(value: i64) -> Self {
        Self(value as u64)
    }
}

impl std::fmt::Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a record's row is stored. The page directory maps every live RID
/// to exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordLocation {
    pub range: usize,
    pub kind: PageKind,
    pub page: u32,
    pub slot: usize,
}

/// A materialized record as handed to callers: its base RID and data
/// column values (meta columns stripped).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub rid: Rid,
    pub columns: Vec<i64>,
}

/// Errors from table operations.
///
/// Everything except wrapped storage defects is an expected condition the
/// transaction layer responds to by aborting; see [`TableError::is_recoverable`].
#[derive(Error, Debug)]
pub enum TableError {
    #[error("Record {0} not found")]
    NotFound(Rid),

    #[error("No record with key {key}")]
    KeyNotFound { key: i64 },

    #[error("Duplicate key {key} in column {column}")]
    DuplicateKey { key: i64, column: usize },

    #[error("Expected {expected} column values, got {got}")]
    ColumnCountMismatch { expected: usize, got: usize },

    #[error("Tables support 1 to {max} data columns, got {got}")]
    UnsupportedWidth { got: usize, max: usize },

    #[error("Key column {key_column} out of range for {num_columns} columns")]
    InvalidKeyColumn { key_column: usize, num_columns: usize },

    #[error("Page range {index} does not exist")]
    UnknownPageRange { index: usize },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl TableError {
    /// Whether a failed operation can be answered by aborting the
    /// surrounding transaction. Storage capacity conditions are expected;
    /// everything else wrapped from the storage layer (buffer exhaustion,
    /// I/O, codec faults, bounds violations) is a defect and must
    /// propagate.
    pub fn is_recoverable(&self) -> bool {
        match self {
            TableError::Storage(err) => {
                matches!(err, StorageError::PageFull { .. } | StorageError::RangeFull)
            }
            _ => true,
        }
    }
}

pub type TableResult<T> = Result<T, TableError>;

/// Everything captured by a delete, sufficient to undo it: directory
/// entries, the indirection values the tombstones overwrote, and the
/// insert-time values the index held.
#[derive(Debug, Clone)]
pub struct DeletedRecord {
    pub base: Rid,
    pub base_location: RecordLocation,
    pub base_indirection: Rid,
    pub tail: Option<(Rid, RecordLocation, Rid)>,
    pub index_values: Vec<i64>,
}

/// Serializable counters of one page range.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PageRangeMeta {
    pub num_base_records: usize,
    pub num_tail_records: usize,
    pub num_updates: usize,
}

/// The serializable half of a table. Runtime handles (buffer pool, lock
/// manager, merge thread) are reconstructed and injected at load time.
#[derive(Debug, Serialize, Deserialize)]
pub struct TableMeta {
    pub name: String,
    pub id: TableId,
    pub num_columns: usize,
    pub key_column: usize,
    pub next_rid: u64,
    pub page_directory: Vec<(Rid, RecordLocation)>,
    pub ranges: Vec<PageRangeMeta>,
    pub index: Index,
}

#[derive(Debug, Default)]
struct MergeQueueState {
    pending: VecDeque<usize>,
    shutdown: bool,
}

/// Work queue between foreground updates and the merge thread.
#[derive(Debug, Default)]
struct MergeQueue {
    state: Mutex<MergeQueueState>,
    signal: Condvar,
}

/// A table of fixed-width integer records with append-only versioning.
pub struct Table {
    name: String,
    id: TableId,
    num_columns: usize,
    key_column: usize,
    pool: BufferPool,
    page_directory: DashMap<Rid, RecordLocation>,
    index: RwLock<Index>,
    page_ranges: RwLock<Vec<Arc<PageRange>>>,
    next_rid: AtomicU64,
    lock_manager: LockManager,
    merge_queue: Arc<MergeQueue>,
    // Serializes merge passes: folds lock records as the shared merge
    // owner, so two passes would not exclude each other.
    merge_latch: Mutex<()>,
}

impl Table {
    /// Creates an empty table and spawns its merge thread.
    pub fn create(
        name: impl Into<String>,
        id: TableId,
        num_columns: usize,
        key_column: usize,
        pool: BufferPool,
    ) -> TableResult<Arc<Self>> {
        if num_columns == 0 || num_columns > MAX_DATA_COLUMNS {
            return Err(TableError::UnsupportedWidth {
                got: num_columns,
                max: MAX_DATA_COLUMNS,
            });
        }
        if key_column >= num_columns {
            return Err(TableError::InvalidKeyColumn {
                key_column,
                num_columns,
            });
        }
        let table = Self {
            name: name.into(),
            id,
            num_columns,
            key_column,
            pool,
            page_directory: DashMap::new(),
            index: RwLock::new(Index::new(num_columns)),
            page_ranges: RwLock::new(Vec::new()),
            next_rid: AtomicU64::new(1),
            lock_manager: LockManager::new(),
            merge_queue: Arc::new(MergeQueue::default()),
            merge_latch: Mutex::new(()),
        };
        Self::start(table)
    }

    /// Rebuilds a table from its persisted state. Page contents are
    /// faulted in through the pool on first touch.
    pub fn from_meta(meta: TableMeta, pool: BufferPool) -> TableResult<Arc<Self>> {
        let ranges = meta
            .ranges
            .iter()
            .enumerate()
            .map(|(index, counters)| {
                Arc::new(PageRange::restore(
                    meta.id,
                    index,
                    meta.num_columns + NUM_META_COLUMNS,
                    pool.clone(),
                    counters.num_base_records,
                    counters.num_tail_records,
                    counters.num_updates,
                ))
            })
            .collect();
        let table = Self {
            name: meta.name,
            id: meta.id,
            num_columns: meta.num_columns,
            key_column: meta.key_column,
            pool,
            page_directory: meta.page_directory.into_iter().collect(),
            index: RwLock::new(meta.index),
            page_ranges: RwLock::new(ranges),
            next_rid: AtomicU64::new(meta.next_rid),
            lock_manager: LockManager::new(),
            merge_queue: Arc::new(MergeQueue::default()),
            merge_latch: Mutex::new(()),
        };
        Self::start(table)
    }

    fn start(table: Table) -> TableResult<Arc<Self>> {
        let table = Arc::new(table);
        let weak = Arc::downgrade(&table);
        let queue = Arc::clone(&table.merge_queue);
        std::thread::Builder::new()
            .name(format!("merge-{}", table.name))
            .spawn(move || Self::merge_loop(weak, queue))
            .map_err(StorageError::Io)?;
        Ok(table)
    }

    /// Snapshot of the table's persistable state.
    pub fn to_meta(&self) -> TableMeta {
        let ranges = self
            .page_ranges
            .read()
            .iter()
            .map(|range| PageRangeMeta {
                num_base_records: range.num_base_records(),
                num_tail_records: range.num_tail_records(),
                num_updates: range.num_updates(),
            })
            .collect();
        TableMeta {
            name: self.name.clone(),
            id: self.id,
            num_columns: self.num_columns,
            key_column: self.key_column,
            next_rid: self.next_rid.load(Ordering::Acquire),
            page_directory: self
                .page_directory
                .iter()
                .map(|entry| (*entry.key(), *entry.value()))
                .collect(),
            ranges,
            index: self.index.read().clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn num_columns(&self) -> usize {
        self.num_columns
    }

    pub fn key_column(&self) -> usize {
        self.key_column
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    pub fn num_records(&self) -> usize {
        self.page_directory.len()
    }

    fn allocate_rid(&self) -> Rid {
        Rid(self.next_rid.fetch_add(1, Ordering::AcqRel))
    }

    fn total_columns(&self) -> usize {
        self.num_columns + NUM_META_COLUMNS
    }

    /// Inserts a base record, enforcing primary-key uniqueness, and
    /// registers it in the page directory and index.
    pub fn insert(&self, values: &[i64]) -> TableResult<Rid> {
        if values.len() != self.num_columns {
            return Err(TableError::ColumnCountMismatch {
                expected: self.num_columns,
                got: values.len(),
            });
        }
        let key = values[self.key_column];

        // The index write lock is held across the uniqueness check and the
        // registration so two inserts of the same key cannot interleave.
        let mut index = self.index.write();
        let duplicate = index
            .locate(self.key_column, key)
            .iter()
            .any(|rid| self.page_directory.contains_key(rid));
        if duplicate {
            return Err(TableError::DuplicateKey {
                key,
                column: self.key_column,
            });
        }

        let rid = self.allocate_rid();
        let row = self.build_row(rid, values);
        let (range, page, slot) = self.place_base_record(&row)?;
        self.page_directory.insert(
            rid,
            RecordLocation {
                range: range.index(),
                kind: PageKind::Base,
                page,
                slot,
            },
        );
        index.insert(rid, values);
        Ok(rid)
    }

    /// Applies an update to `base_rid`. `None` entries leave their column
    /// unchanged; an update supplying no columns is a successful no-op.
    ///
    /// The lineage grows by two tail records: a snapshot preserving the
    /// state being replaced, then the new head carrying the overlaid
    /// values. The base row's INDIRECTION repoints to the new head and its
    /// SCHEMA_ENCODING accumulates the changed-column bits.
    pub fn update(&self, base_rid: Rid, values: &[Option<i64>]) -> TableResult<()> {
        if values.len() != self.num_columns {
            return Err(TableError::ColumnCountMismatch {
                expected: self.num_columns,
                got: values.len(),
            });
        }
        let base_loc = self.location(base_rid)?;
        if values.iter().all(Option::is_none) {
            return Ok(());
        }
        if let Some(new_key) = values[self.key_column] {
            let collision = self
                .locate(self.key_column, new_key)
                .into_iter()
                .any(|rid| rid != base_rid);
            if collision {
                return Err(TableError::DuplicateKey {
                    key: new_key,
                    column: self.key_column,
                });
            }
        }

        let range = self.range_at(base_loc.range)?;
        let bits = self.schema_bits(values);
        let base_row = range.read_record(base_loc.kind, base_loc.page, base_loc.slot)?;
        let newest = Rid::from_i64(base_row[INDIRECTION_COLUMN]);
        let newest_data = self.read_data(newest)?;

        // Snapshot of the state being replaced; SCHEMA_ENCODING stays 0,
        // which is what marks it skippable during version walks.
        let snapshot_rid = self.allocate_rid();
        let mut snapshot_row = self.build_row(snapshot_rid, &newest_data);
        snapshot_row[INDIRECTION_COLUMN] = newest.as_i64();
        let (snapshot_page, snapshot_slot) = range.create_record(PageKind::Tail, &snapshot_row)?;

        // The new head: previous state with the supplied columns overlaid.
        let tail_rid = self.allocate_rid();
        let mut new_data = newest_data;
        for (column, value) in values.iter().enumerate() {
            if let Some(value) = value {
                new_data[column] = *value;
            }
        }
        let mut tail_row = self.build_row(tail_rid, &new_data);
        tail_row[INDIRECTION_COLUMN] = snapshot_rid.as_i64();
        tail_row[SCHEMA_ENCODING_COLUMN] = bits;
        let (tail_page, tail_slot) = range.create_record(PageKind::Tail, &tail_row)?;

        // Both tail rows are in place; register them before the base row
        // publishes the new head so a concurrent reader following the
        // fresh INDIRECTION always resolves it. A defect in either base
        // write unregisters the rows again, leaving them orphaned with no
        // directory or lineage trace.
        self.page_directory.insert(
            snapshot_rid,
            RecordLocation {
                range: base_loc.range,
                kind: PageKind::Tail,
                page: snapshot_page,
                slot: snapshot_slot,
            },
        );
        self.page_directory.insert(
            tail_rid,
            RecordLocation {
                range: base_loc.range,
                kind: PageKind::Tail,
                page: tail_page,
                slot: tail_slot,
            },
        );
        let published = range
            .update_value(
                base_loc.kind,
                base_loc.page,
                base_loc.slot,
                SCHEMA_ENCODING_COLUMN,
                base_row[SCHEMA_ENCODING_COLUMN] | bits,
            )
            .and_then(|_| {
                range.update_value(
                    base_loc.kind,
                    base_loc.page,
                    base_loc.slot,
                    INDIRECTION_COLUMN,
                    tail_rid.as_i64(),
                )
            });
        if let Err(err) = published {
            self.page_directory.remove(&snapshot_rid);
            self.page_directory.remove(&tail_rid);
            return Err(err.into());
        }

        if range.register_update() {
            self.queue_merge(base_loc.range);
        }
        Ok(())
    }

    /// Logically deletes a record: tombstones the base row and its newest
    /// tail row and drops their directory and index entries. Storage is
    /// not reclaimed. Returns the captured state a compensating re-insert
    /// needs.
    pub fn delete(&self, base_rid: Rid) -> TableResult<DeletedRecord> {
        let base_loc = self.location(base_rid)?;
        let range = self.range_at(base_loc.range)?;

        // Read the head pointer before tombstoning overwrites it.
        let base_indirection = Rid::from_i64(range.read_value(
            base_loc.kind,
            base_loc.page,
            base_loc.slot,
            INDIRECTION_COLUMN,
        )?);
        range.mark_deleted(base_loc.kind, base_loc.page, base_loc.slot)?;
        self.page_directory.remove(&base_rid);

        let mut tail = None;
        if base_indirection != base_rid {
            if let Some(tail_loc) = self.page_directory.get(&base_indirection).map(|e| *e) {
                let tail_range = self.range_at(tail_loc.range)?;
                let tail_indirection = Rid::from_i64(tail_range.read_value(
                    tail_loc.kind,
                    tail_loc.page,
                    tail_loc.slot,
                    INDIRECTION_COLUMN,
                )?);
                tail_range.mark_deleted(tail_loc.kind, tail_loc.page, tail_loc.slot)?;
                self.page_directory.remove(&base_indirection);
                tail = Some((base_indirection, tail_loc, tail_indirection));
            }
        }

        let index_values = self.index.write().remove(base_rid).unwrap_or_default();
        Ok(DeletedRecord {
            base: base_rid,
            base_location: base_loc,
            base_indirection,
            tail,
            index_values,
        })
    }

    /// Reverses a [`delete`](Self::delete): directory entries return, the
    /// tombstoned indirection slots get their prior values back, and the
    /// index entries are re-registered.
    pub fn undo_delete(&self, deleted: &DeletedRecord) -> TableResult<()> {
        let loc = deleted.base_location;
        let range = self.range_at(loc.range)?;
        range.update_value(
            loc.kind,
            loc.page,
            loc.slot,
            INDIRECTION_COLUMN,
            deleted.base_indirection.as_i64(),
        )?;
        self.page_directory.insert(deleted.base, loc);

        if let Some((tail_rid, tail_loc, tail_indirection)) = deleted.tail {
            let tail_range = self.range_at(tail_loc.range)?;
            tail_range.update_value(
                tail_loc.kind,
                tail_loc.page,
                tail_loc.slot,
                INDIRECTION_COLUMN,
                tail_indirection.as_i64(),
            )?;
            self.page_directory.insert(tail_rid, tail_loc);
        }

        self.index
            .write()
            .insert(deleted.base, &deleted.index_values);
        Ok(())
    }

    /// Points the base row's INDIRECTION back at `prior_newest`, orphaning
    /// any tail records appended after it. The compensating operation for
    /// an update.
    pub fn restore_indirection(&self, base_rid: Rid, prior_newest: Rid) -> TableResult<()> {
        let loc = self.location(base_rid)?;
        let range = self.range_at(loc.range)?;
        range.update_value(
            loc.kind,
            loc.page,
            loc.slot,
            INDIRECTION_COLUMN,
            prior_newest.as_i64(),
        )?;
        Ok(())
    }

    /// The full stored row, meta columns included.
    pub fn read_row(&self, rid: Rid) -> TableResult<Vec<i64>> {
        let loc = self.location(rid)?;
        let range = self.range_at(loc.range)?;
        Ok(range.read_record(loc.kind, loc.page, loc.slot)?)
    }

    /// The row's data columns.
    pub fn read_data(&self, rid: Rid) -> TableResult<Vec<i64>> {
        let mut row = self.read_row(rid)?;
        Ok(row.split_off(NUM_META_COLUMNS))
    }

    /// The RID of the newest version in `base_rid`'s lineage (the base
    /// record itself when it was never updated).
    pub fn newest_rid(&self, base_rid: Rid) -> TableResult<Rid> {
        let loc = self.location(base_rid)?;
        let range = self.range_at(loc.range)?;
        let newest =
            range.read_value(loc.kind, loc.page, loc.slot, INDIRECTION_COLUMN)?;
        Ok(Rid::from_i64(newest))
    }

    /// Follows one INDIRECTION hop from `rid`. With `skip_snapshot`, a hop
    /// landing on a tail record whose SCHEMA_ENCODING is 0 (a snapshot)
    /// takes one more hop, so the walk only counts versions that carry
    /// real edits. Base records are never treated as snapshots, even after
    /// a merge resets their encoding.
    pub fn next_lineage_rid(&self, rid: Rid, skip_snapshot: bool) -> TableResult<Rid> {
        let loc = self.location(rid)?;
        let range = self.range_at(loc.range)?;
        let next = Rid::from_i64(range.read_value(
            loc.kind,
            loc.page,
            loc.slot,
            INDIRECTION_COLUMN,
        )?);
        if !next.is_valid() {
            return Ok(rid);
        }
        if skip_snapshot && next != rid {
            if let Some(next_loc) = self.page_directory.get(&next).map(|e| *e) {
                if next_loc.kind == PageKind::Tail {
                    let next_range = self.range_at(next_loc.range)?;
                    let schema = next_range.read_value(
                        next_loc.kind,
                        next_loc.page,
                        next_loc.slot,
                        SCHEMA_ENCODING_COLUMN,
                    )?;
                    if schema == 0 {
                        let hop = next_range.read_value(
                            next_loc.kind,
                            next_loc.page,
                            next_loc.slot,
                            INDIRECTION_COLUMN,
                        )?;
                        return Ok(Rid::from_i64(hop));
                    }
                }
            }
        }
        Ok(next)
    }

    /// Data columns of the version `relative_version` steps behind the
    /// newest (0 = newest, -1 = one meaningful update earlier). Walking
    /// past the oldest version lands on the base record.
    pub fn select_version(&self, base_rid: Rid, relative_version: i64) -> TableResult<Vec<i64>> {
        let mut current = self.next_lineage_rid(base_rid, true)?;
        let mut depth = 0i64;
        while depth > relative_version && current != base_rid {
            current = self.next_lineage_rid(current, true)?;
            depth -= 1;
        }
        self.read_data(current)
    }

    /// RIDs whose insert-time value in `column` equals `value`, filtered
    /// to live records.
    pub fn locate(&self, column: usize, value: i64) -> Vec<Rid> {
        self.index
            .read()
            .locate(column, value)
            .into_iter()
            .filter(|rid| self.page_directory.contains_key(rid))
            .collect()
    }

    /// Live RIDs whose insert-time value in `column` falls in
    /// `begin..=end`, ordered by value.
    pub fn locate_range(&self, begin: i64, end: i64, column: usize) -> Vec<Rid> {
        self.index
            .read()
            .locate_range(begin, end, column)
            .into_iter()
            .filter(|rid| self.page_directory.contains_key(rid))
            .collect()
    }

    /// Resolves a primary-key value to its live record, if any.
    pub fn locate_key(&self, key: i64) -> Option<Rid> {
        self.locate(self.key_column, key).into_iter().next()
    }

    fn location(&self, rid: Rid) -> TableResult<RecordLocation> {
        self.page_directory
            .get(&rid)
            .map(|entry| *entry.value())
            .ok_or(TableError::NotFound(rid))
    }

    fn range_at(&self, index: usize) -> TableResult<Arc<PageRange>> {
        self.page_ranges
            .read()
            .get(index)
            .cloned()
            .ok_or(TableError::UnknownPageRange { index })
    }

    /// Meta columns ahead of the data columns: INDIRECTION and RID name
    /// the record itself until a caller repoints them.
    fn build_row(&self, rid: Rid, data: &[i64]) -> Vec<i64> {
        let mut row = Vec::with_capacity(self.total_columns());
        row.push(rid.as_i64());
        row.push(rid.as_i64());
        row.push(unix_timestamp());
        row.push(0);
        row.push(0);
        row.extend_from_slice(data);
        row
    }

    /// One bit per supplied column, highest-order bit for column 0.
    fn schema_bits(&self, values: &[Option<i64>]) -> i64 {
        values
            .iter()
            .enumerate()
            .filter(|(_, value)| value.is_some())
            .fold(0i64, |bits, (column, _)| {
                bits | 1 << (self.num_columns - column - 1)
            })
    }

    fn place_base_record(&self, row: &[i64]) -> TableResult<(Arc<PageRange>, u32, usize)> {
        loop {
            let range = self.range_with_base_capacity();
            match range.create_record(PageKind::Base, row) {
                Ok((page, slot)) => return Ok((range, page, slot)),
                // lost the race for the last slot; pick another range
                Err(StorageError::RangeFull) => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn range_with_base_capacity(&self) -> Arc<PageRange> {
        {
            let ranges = self.page_ranges.read();
            if let Some(range) = ranges.iter().find(|range| range.has_base_capacity()) {
                return Arc::clone(range);
            }
        }
        let mut ranges = self.page_ranges.write();
        if let Some(range) = ranges.iter().find(|range| range.has_base_capacity()) {
            return Arc::clone(range);
        }
        let range = Arc::new(PageRange::new(
            self.id,
            ranges.len(),
            self.total_columns(),
            self.pool.clone(),
        ));
        ranges.push(Arc::clone(&range));
        debug!("table {} allocated page range {}", self.name, range.index());
        range
    }

    fn queue_merge(&self, range_index: usize) {
        let mut state = self.merge_queue.state.lock();
        if !state.pending.contains(&range_index) {
            state.pending.push_back(range_index);
        }
        self.merge_queue.signal.notify_one();
        debug!(
            "table {} queued page range {} for merge",
            self.name, range_index
        );
    }

    fn merge_loop(table: Weak<Table>, queue: Arc<MergeQueue>) {
        loop {
            let range_index = {
                let mut state = queue.state.lock();
                loop {
                    if state.shutdown {
                        return;
                    }
                    if let Some(index) = state.pending.pop_front() {
                        break index;
                    }
                    queue.signal.wait(&mut state);
                }
            };
            let Some(table) = table.upgrade() else {
                return;
            };
            match table.run_merge_pass(range_index) {
                Ok(folded) => debug!(
                    "table {} merged page range {}: {} base records folded",
                    table.name, range_index, folded
                ),
                Err(err) => warn!(
                    "table {} merge of page range {} failed: {}",
                    table.name, range_index, err
                ),
            }
        }
    }

    /// One merge pass over a page range: folds each updated base record's
    /// newest committed snapshot into its data columns and resets its
    /// SCHEMA_ENCODING. Returns how many base records were folded.
    ///
    /// Each fold runs under a non-blocking exclusive lock on the record,
    /// taken as the reserved merge owner, so it can never observe a
    /// half-applied update; contended records are skipped and caught by a
    /// later pass. INDIRECTION is never retargeted here, so edits racing
    /// the pass keep a valid lineage.
    pub fn run_merge_pass(&self, range_index: usize) -> TableResult<usize> {
        let _latch = self.merge_latch.lock();
        let range = self.range_at(range_index)?;

        let mut base_rids = Vec::new();
        for page in 0..NUM_BASE_PAGES as u32 {
            let rids = range.read_column(PageKind::Base, page, RID_COLUMN)?;
            base_rids.extend(rids.into_iter().map(Rid::from_i64));
            if range.num_base_records() <= base_rids.len() {
                break;
            }
        }

        let mut folded = 0;
        for base_rid in base_rids {
            if !base_rid.is_valid() {
                continue;
            }
            let Some(loc) = self.page_directory.get(&base_rid).map(|e| *e) else {
                continue; // deleted since the scan
            };
            let newest = Rid::from_i64(range.read_value(
                loc.kind,
                loc.page,
                loc.slot,
                INDIRECTION_COLUMN,
            )?);
            if !newest.is_valid() || newest == base_rid {
                continue;
            }
            if !self
                .lock_manager
                .try_lock(base_rid, TransactionId::MERGE, LockMode::Exclusive)
            {
                debug!(
                    "table {} merge skipping contended record {}",
                    self.name, base_rid
                );
                continue;
            }
            let result = self.fold_base_record(&range, base_rid, loc);
            self.lock_manager.release(base_rid, TransactionId::MERGE);
            if result? {
                folded += 1;
            }
        }
        Ok(folded)
    }

    /// Folds the newest snapshot of `base_rid`'s lineage into its base
    /// row. Runs with the record's exclusive lock held.
    fn fold_base_record(
        &self,
        range: &PageRange,
        base_rid: Rid,
        base_loc: RecordLocation,
    ) -> TableResult<bool> {
        // Re-read the head under the lock; it is stable for the duration.
        let newest = Rid::from_i64(range.read_value(
            base_loc.kind,
            base_loc.page,
            base_loc.slot,
            INDIRECTION_COLUMN,
        )?);
        if !newest.is_valid() || newest == base_rid {
            return Ok(false);
        }

        // Walk newest-to-older for the first snapshot record: the state
        // just before the newest edit, guaranteed fully written.
        let mut current = newest;
        let snapshot = loop {
            if current == base_rid {
                return Ok(false);
            }
            let Some(loc) = self.page_directory.get(&current).map(|e| *e) else {
                return Ok(false); // lineage touched by a concurrent delete
            };
            let tail_range = self.range_at(loc.range)?;
            let schema =
                tail_range.read_value(loc.kind, loc.page, loc.slot, SCHEMA_ENCODING_COLUMN)?;
            if schema == 0 {
                break current;
            }
            current = Rid::from_i64(tail_range.read_value(
                loc.kind,
                loc.page,
                loc.slot,
                INDIRECTION_COLUMN,
            )?);
        };

        let data = self.read_data(snapshot)?;
        for (column, value) in data.iter().enumerate() {
            range.update_value(
                base_loc.kind,
                base_loc.page,
                base_loc.slot,
                NUM_META_COLUMNS + column,
                *value,
            )?;
        }
        range.update_value(
            base_loc.kind,
            base_loc.page,
            base_loc.slot,
            SCHEMA_ENCODING_COLUMN,
            0,
        )?;
        range.update_value(
            base_loc.kind,
            base_loc.page,
            base_loc.slot,
            TAIL_SEQUENCE_COLUMN,
            snapshot.as_i64(),
        )?;
        Ok(true)
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        let mut state = self.merge_queue.state.lock();
        state.shutdown = true;
        self.merge_queue.signal.notify_all();
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("num_columns", &self.num_columns)
            .field("key_column", &self.key_column)
            .field("num_records", &self.page_directory.len())
            .finish()
    }
}

fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}
