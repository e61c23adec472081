//! Record-level locking and transactional execution.
//!
//! Locks are strictly non-blocking: a denied acquisition never waits, it
//! aborts the requesting transaction, which replays its compensating
//! rollback log. With no waiting there is nothing to deadlock on.

pub mod lock;
pub mod transaction;
pub mod worker;

pub use lock::{LockManager, LockMode};
pub use transaction::{Operation, Transaction, TransactionId, TransactionIdAllocator};
pub use worker::{RetryPolicy, TransactionWorker, WorkerReport};
