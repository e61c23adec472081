//! Transactions: ordered operation batches with no-wait locking and
//! compensating rollback.
//!
//! Each operation acquires the record locks it needs immediately before
//! executing and releases them when it finishes. A single denied
//! acquisition aborts the whole transaction; there is no waiting, so two
//! transactions can never deadlock against each other. Abort replays the
//! accumulated compensation log in order, best-effort: every entry is
//! attempted regardless of how the ones before it fared.

use super::lock::{LockManager, LockMode};
use crate::table::{DeletedRecord, Rid, Table, TableError, TableResult};
use anyhow::Result;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A unique transaction identifier. Id 0 is reserved for the merge
/// thread; allocators hand out ids from 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// The reserved owner id under which merge takes record locks.
    pub const MERGE: TransactionId = TransactionId(0);
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Txn{}", self.0)
    }
}

/// Monotonic transaction id source, owned by the database.
#[derive(Debug)]
pub struct TransactionIdAllocator {
    next: AtomicU64,
}

impl TransactionIdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn allocate(&self) -> TransactionId {
        TransactionId(self.next.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for TransactionIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// One query operation queued in a transaction. Writes name records by
/// primary key; the key resolves to a RID at execution time, so an
/// operation can see records created earlier in the same transaction.
#[derive(Debug, Clone)]
pub enum Operation {
    Insert { values: Vec<i64> },
    Update { key: i64, values: Vec<Option<i64>> },
    Delete { key: i64 },
    Select { key: i64, column: usize },
    Sum { start: i64, end: i64, column: usize },
}

/// Compensation for one applied write, replayed on abort.
#[derive(Debug)]
enum Rollback {
    /// Undo an insert by deleting the record it created.
    DeleteInserted { rid: Rid },
    /// Undo an update by repointing the base record at its prior head;
    /// the appended tail records are orphaned, not removed.
    ResetIndirection { base: Rid, prior_newest: Rid },
    /// Undo a delete by restoring the captured record state.
    RestoreDeleted(Box<DeletedRecord>),
}

impl Rollback {
    fn rid(&self) -> Rid {
        match self {
            Rollback::DeleteInserted { rid } => *rid,
            Rollback::ResetIndirection { base, .. } => *base,
            Rollback::RestoreDeleted(deleted) => deleted.base,
        }
    }
}

enum Step {
    Applied,
    /// A non-blocking lock acquisition lost; the transaction must abort.
    Denied(Rid),
}

/// An ordered batch of operations executed under no-wait two-phase
/// locking with rollback-on-failure.
pub struct Transaction {
    id: TransactionId,
    table: Arc<Table>,
    operations: Vec<Operation>,
    journal: Vec<Rollback>,
}

impl Transaction {
    pub fn new(id: TransactionId, table: Arc<Table>) -> Self {
        Self {
            id,
            table,
            operations: Vec::new(),
            journal: Vec::new(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn add(&mut self, operation: Operation) {
        self.operations.push(operation);
    }

    pub fn insert(&mut self, values: Vec<i64>) {
        self.add(Operation::Insert { values });
    }

    pub fn update(&mut self, key: i64, values: Vec<Option<i64>>) {
        self.add(Operation::Update { key, values });
    }

    pub fn delete(&mut self, key: i64) {
        self.add(Operation::Delete { key });
    }

    pub fn select(&mut self, key: i64, column: usize) {
        self.add(Operation::Select { key, column });
    }

    pub fn sum(&mut self, start: i64, end: i64, column: usize) {
        self.add(Operation::Sum { start, end, column });
    }

    /// Executes the operations strictly in the order added. Returns
    /// `Ok(true)` on commit, `Ok(false)` when the transaction aborted and
    /// its compensations were replayed; storage defects propagate as
    /// errors without compensation.
    pub fn run(&mut self) -> Result<bool> {
        for index in 0..self.operations.len() {
            match self.execute(index) {
                Ok(Step::Applied) => {}
                Ok(Step::Denied(rid)) => {
                    debug!("{} denied lock on record {}", self.id, rid);
                    self.abort(index);
                    return Ok(false);
                }
                Err(err) if err.is_recoverable() => {
                    debug!("{} operation {} failed: {}", self.id, index, err);
                    self.abort(index);
                    return Ok(false);
                }
                Err(err) => return Err(err.into()),
            }
        }
        self.commit();
        Ok(true)
    }

    fn locks(&self) -> &LockManager {
        self.table.lock_manager()
    }

    fn execute(&mut self, index: usize) -> TableResult<Step> {
        // operations are never mutated after add; clone to appease the
        // borrow on self while executing
        let operation = self.operations[index].clone();
        match operation {
            Operation::Insert { values } => {
                let rid = self.table.insert(&values)?;
                self.journal.push(Rollback::DeleteInserted { rid });
                Ok(Step::Applied)
            }
            Operation::Update { key, values } => {
                let rid = self.resolve_key(key)?;
                if !self.locks().try_lock(rid, self.id, LockMode::Exclusive) {
                    return Ok(Step::Denied(rid));
                }
                let result = self
                    .table
                    .newest_rid(rid)
                    .and_then(|prior| self.table.update(rid, &values).map(|_| prior));
                self.locks().release(rid, self.id);
                let prior_newest = result?;
                self.journal.push(Rollback::ResetIndirection {
                    base: rid,
                    prior_newest,
                });
                Ok(Step::Applied)
            }
            Operation::Delete { key } => {
                let rid = self.resolve_key(key)?;
                if !self.locks().try_lock(rid, self.id, LockMode::Exclusive) {
                    return Ok(Step::Denied(rid));
                }
                let result = self.table.delete(rid);
                self.locks().release(rid, self.id);
                let deleted = result?;
                self.journal.push(Rollback::RestoreDeleted(Box::new(deleted)));
                Ok(Step::Applied)
            }
            Operation::Select { key, column } => {
                let rids = self.table.locate(column, key);
                self.read_under_shared_locks(&rids)
            }
            Operation::Sum { start, end, column: _ } => {
                let rids = self
                    .table
                    .locate_range(start, end, self.table.key_column());
                self.read_under_shared_locks(&rids)
            }
        }
    }

    /// Takes shared locks on the whole RID set, reads every record's
    /// newest version, and releases. All-or-nothing: one denial releases
    /// what was acquired and reports `Denied`.
    fn read_under_shared_locks(&self, rids: &[Rid]) -> TableResult<Step> {
        let mut rids = rids.to_vec();
        rids.sort_unstable();
        rids.dedup();

        for (held, rid) in rids.iter().enumerate() {
            if !self.locks().try_lock(*rid, self.id, LockMode::Shared) {
                for acquired in &rids[..held] {
                    self.locks().release(*acquired, self.id);
                }
                return Ok(Step::Denied(*rid));
            }
        }
        let mut result = Ok(Step::Applied);
        for rid in &rids {
            // a record deleted between locate and read is not a failure
            match self.table.select_version(*rid, 0) {
                Ok(_) => {}
                Err(TableError::NotFound(_)) => {}
                Err(err) => {
                    result = Err(err);
                    break;
                }
            }
        }
        for rid in &rids {
            self.locks().release(*rid, self.id);
        }
        result
    }

    fn resolve_key(&self, key: i64) -> TableResult<Rid> {
        self.table
            .locate_key(key)
            .ok_or(TableError::KeyNotFound { key })
    }

    /// Replays the compensation log in accumulation order, each entry
    /// under its own exclusive lock. Best-effort: a failed entry is
    /// logged and the sweep continues.
    fn abort(&mut self, failed_at: usize) {
        warn!(
            "{} aborted at operation {}; replaying {} compensations",
            self.id,
            failed_at,
            self.journal.len()
        );
        let journal = std::mem::take(&mut self.journal);
        for entry in &journal {
            let rid = entry.rid();
            if !self.locks().try_lock(rid, self.id, LockMode::Exclusive) {
                warn!("{} could not lock record {} for rollback", self.id, rid);
                continue;
            }
            if let Err(err) = self.apply_rollback(entry) {
                warn!("{} rollback of record {} failed: {}", self.id, rid, err);
            }
            self.locks().release(rid, self.id);
        }
        self.locks().release_all(self.id);
    }

    fn apply_rollback(&self, entry: &Rollback) -> TableResult<()> {
        match entry {
            Rollback::DeleteInserted { rid } => {
                self.table.delete(*rid)?;
                Ok(())
            }
            Rollback::ResetIndirection { base, prior_newest } => {
                self.table.restore_indirection(*base, *prior_newest)
            }
            Rollback::RestoreDeleted(deleted) => self.table.undo_delete(deleted),
        }
    }

    fn commit(&mut self) {
        self.journal.clear();
        self.locks().release_all(self.id);
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("operations", &self.operations.len())
            .finish()
    }
}
