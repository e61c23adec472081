//! tailstore: a single-node columnar storage engine for fixed-width
//! integer records.
//!
//! Records are stored column-parallel in byte-packed pages, grouped into
//! page ranges of sixteen base pages plus unbounded tail pages. Updates
//! never mutate a base row in place; they append tail records linked
//! through an INDIRECTION chain, and a per-table background thread
//! periodically merges the newest committed state back into the base
//! rows. All page access goes through a pinned LRU buffer pool backed by
//! a pluggable page store.
//!
//! Concurrency is no-wait two-phase locking at record granularity:
//! transactions batch operations, abort on the first failure or lock
//! denial, and compensate with a rollback log. Workers run transaction
//! batches on dedicated threads.
//!
//! ```no_run
//! use tailstore::{Database, Query};
//!
//! # fn main() -> anyhow::Result<()> {
//! let db = Database::open("./grades_db")?;
//! let table = db.create_table("grades", 3, 0)?;
//! let query = Query::new(table);
//!
//! query.insert(&[5, 10, 20])?;
//! query.update(5, &[None, Some(99), None])?;
//! assert_eq!(query.select(5, 0)?[0].columns, vec![5, 99, 20]);
//! assert_eq!(query.select_version(5, 0, -1)?[0].columns, vec![5, 10, 20]);
//! db.close()?;
//! # Ok(())
//! # }
//! ```

pub mod concurrency;
pub mod config;
pub mod database;
pub mod index;
pub mod query;
pub mod storage;
pub mod table;

pub use concurrency::lock::{LockManager, LockMode};
pub use concurrency::transaction::{Operation, Transaction, TransactionId};
pub use concurrency::worker::{RetryPolicy, TransactionWorker, WorkerReport};
pub use database::Database;
pub use index::Index;
pub use query::Query;
pub use storage::buffer::BufferPool;
pub use storage::disk::{FileStore, MemoryStore, PageStore};
pub use storage::error::{StorageError, StorageResult};
pub use storage::page::{PageKind, TableId};
pub use table::{Record, Rid, Table, TableError, TableResult};
