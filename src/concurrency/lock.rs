//! Per-record shared/exclusive locks.
//!
//! Acquisition is a non-blocking test-and-set; the caller decides what a
//! denial means (for transactions: abort). Lock entries are created
//! lazily on first contact and reclaimed as soon as their owner set
//! empties, so the table never grows with the history of touched RIDs.

use super::transaction::TransactionId;
use crate::table::Rid;
use parking_lot::Mutex;
use std::collections::HashMap;

/// The two record lock modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Held concurrently by any number of readers.
    Shared,
    /// Held by exactly one owner, excluding readers.
    Exclusive,
}

#[derive(Debug, Default)]
struct RecordLock {
    readers: usize,
    writer: bool,
    owners: HashMap<TransactionId, LockMode>,
}

impl RecordLock {
    fn try_acquire(&mut self, owner: TransactionId, mode: LockMode) -> bool {
        if let Some(&held) = self.owners.get(&owner) {
            return match (held, mode) {
                // already holds a mode at least as strong
                (LockMode::Exclusive, _) | (LockMode::Shared, LockMode::Shared) => true,
                // upgrade succeeds only when this owner is the sole reader
                (LockMode::Shared, LockMode::Exclusive) => {
                    if self.readers == 1 && !self.writer {
                        self.readers = 0;
                        self.writer = true;
                        self.owners.insert(owner, LockMode::Exclusive);
                        true
                    } else {
                        false
                    }
                }
            };
        }
        match mode {
            LockMode::Shared => {
                if self.writer {
                    return false;
                }
                self.readers += 1;
            }
            LockMode::Exclusive => {
                if self.writer || self.readers > 0 {
                    return false;
                }
                self.writer = true;
            }
        }
        self.owners.insert(owner, mode);
        true
    }

    fn release(&mut self, owner: TransactionId) {
        match self.owners.remove(&owner) {
            Some(LockMode::Shared) => self.readers = self.readers.saturating_sub(1),
            Some(LockMode::Exclusive) => self.writer = false,
            None => {}
        }
    }

    fn is_free(&self) -> bool {
        self.owners.is_empty()
    }
}

/// Lock table keyed by RID. One manager per table.
#[derive(Debug, Default)]
pub struct LockManager {
    locks: Mutex<HashMap<Rid, RecordLock>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to take `mode` on `rid` for `owner` without waiting.
    /// Re-acquiring a mode the owner already holds succeeds; a shared
    /// holder may upgrade to exclusive when it is the only reader.
    pub fn try_lock(&self, rid: Rid, owner: TransactionId, mode: LockMode) -> bool {
        let mut locks = self.locks.lock();
        locks.entry(rid).or_default().try_acquire(owner, mode)
    }

    /// Releases `owner`'s lock on `rid`; a no-op for non-holders.
    pub fn release(&self, rid: Rid, owner: TransactionId) {
        let mut locks = self.locks.lock();
        if let Some(lock) = locks.get_mut(&rid) {
            lock.release(owner);
            if lock.is_free() {
                locks.remove(&rid);
            }
        }
    }

    /// Releases everything `owner` still holds.
    pub fn release_all(&self, owner: TransactionId) {
        let mut locks = self.locks.lock();
        locks.retain(|_, lock| {
            lock.release(owner);
            !lock.is_free()
        });
    }

    /// Number of RIDs with live lock state.
    pub fn num_entries(&self) -> usize {
        self.locks.lock().len()
    }
}
