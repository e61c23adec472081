//! Transaction workers: a dedicated thread running a batch of
//! transactions sequentially.

use super::transaction::Transaction;
use anyhow::{bail, Result};
use log::{debug, warn};
use rand::Rng;
use std::thread::JoinHandle;
use std::time::Duration;

/// What a worker does with a transaction that aborted.
#[derive(Debug, Clone, Copy)]
pub enum RetryPolicy {
    /// An abort is final; the transaction is tallied as a failure.
    None,
    /// Re-run an aborted transaction after a jittered delay, up to
    /// `max_attempts` runs in total.
    Backoff {
        max_attempts: usize,
        min_delay: Duration,
        max_delay: Duration,
    },
}

impl RetryPolicy {
    /// A retry budget that rides out short lock contention without
    /// spinning on a record another worker holds for long.
    pub fn default_backoff() -> Self {
        RetryPolicy::Backoff {
            max_attempts: 10,
            min_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        }
    }
}

/// Outcome tally of one worker's batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerReport {
    pub committed: usize,
    pub aborted: usize,
}

/// Runs its transactions in order on one background thread.
pub struct TransactionWorker {
    transactions: Vec<Transaction>,
    policy: RetryPolicy,
    handle: Option<JoinHandle<Result<WorkerReport>>>,
}

impl TransactionWorker {
    pub fn new() -> Self {
        Self::with_policy(RetryPolicy::None)
    }

    pub fn with_policy(policy: RetryPolicy) -> Self {
        Self {
            transactions: Vec::new(),
            policy,
            handle: None,
        }
    }

    pub fn add_transaction(&mut self, transaction: Transaction) {
        self.transactions.push(transaction);
    }

    /// Spawns the worker thread. Transactions added afterwards are not
    /// picked up.
    pub fn run(&mut self) -> Result<()> {
        let transactions = std::mem::take(&mut self.transactions);
        let policy = self.policy;
        let handle = std::thread::Builder::new()
            .name("txn-worker".to_string())
            .spawn(move || Self::execute_all(transactions, policy))?;
        self.handle = Some(handle);
        Ok(())
    }

    /// Waits for the thread and returns the commit/abort tally. Defects
    /// raised by any transaction propagate here.
    pub fn join(&mut self) -> Result<WorkerReport> {
        let Some(handle) = self.handle.take() else {
            bail!("transaction worker was never started");
        };
        match handle.join() {
            Ok(report) => report,
            Err(_) => bail!("transaction worker panicked"),
        }
    }

    fn execute_all(transactions: Vec<Transaction>, policy: RetryPolicy) -> Result<WorkerReport> {
        let mut report = WorkerReport {
            committed: 0,
            aborted: 0,
        };
        for mut transaction in transactions {
            let mut attempts = 0;
            loop {
                attempts += 1;
                if transaction.run()? {
                    report.committed += 1;
                    break;
                }
                match policy {
                    RetryPolicy::Backoff {
                        max_attempts,
                        min_delay,
                        max_delay,
                    } if attempts < max_attempts => {
                        let delay = jittered(min_delay, max_delay);
                        debug!(
                            "{} aborted on attempt {}; retrying in {:?}",
                            transaction.id(),
                            attempts,
                            delay
                        );
                        std::thread::sleep(delay);
                    }
                    _ => {
                        warn!(
                            "{} aborted after {} attempt(s)",
                            transaction.id(),
                            attempts
                        );
                        report.aborted += 1;
                        break;
                    }
                }
            }
        }
        Ok(report)
    }
}

impl Default for TransactionWorker {
    fn default() -> Self {
        Self::new()
    }
}

fn jittered(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let span = (max - min).as_millis() as u64;
    min + Duration::from_millis(rand::thread_rng().gen_range(0..=span))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::lock::LockMode;
    use crate::concurrency::transaction::TransactionId;
    use crate::storage::buffer::BufferPool;
    use crate::storage::disk::{MemoryStore, PageStore};
    use crate::storage::page::TableId;
    use crate::table::Table;
    use std::sync::Arc;

    fn test_table() -> Arc<Table> {
        let store = Arc::new(MemoryStore::new());
        let pool = BufferPool::new(store as Arc<dyn PageStore>, 64);
        Table::create("grades", TableId(0), 2, 0, pool).unwrap()
    }

    #[test]
    fn test_worker_tallies_commits_and_aborts() -> Result<()> {
        let table = test_table();
        let mut worker = TransactionWorker::new();

        let mut good = Transaction::new(TransactionId(1), Arc::clone(&table));
        good.insert(vec![1, 10]);
        worker.add_transaction(good);

        let mut bad = Transaction::new(TransactionId(2), Arc::clone(&table));
        bad.insert(vec![1, 20]); // duplicate key
        worker.add_transaction(bad);

        worker.run()?;
        let report = worker.join()?;
        assert_eq!(
            report,
            WorkerReport {
                committed: 1,
                aborted: 1
            }
        );
        assert_eq!(table.num_records(), 1);
        Ok(())
    }

    #[test]
    fn test_join_without_run_fails() {
        let mut worker = TransactionWorker::new();
        assert!(worker.join().is_err());
    }

    #[test]
    fn test_backoff_retry_wins_after_contention_clears() -> Result<()> {
        let table = test_table();
        let rid = table.insert(&[1, 10])?;

        // hold the record so the worker's first attempts are denied
        let holder = TransactionId(99);
        assert!(table
            .lock_manager()
            .try_lock(rid, holder, LockMode::Exclusive));

        let mut worker = TransactionWorker::with_policy(RetryPolicy::Backoff {
            max_attempts: 50,
            min_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(10),
        });
        let mut txn = Transaction::new(TransactionId(1), Arc::clone(&table));
        txn.update(1, vec![None, Some(11)]);
        worker.add_transaction(txn);
        worker.run()?;

        std::thread::sleep(Duration::from_millis(40));
        table.lock_manager().release(rid, holder);

        let report = worker.join()?;
        assert_eq!(report.committed, 1);
        assert_eq!(table.select_version(rid, 0)?, vec![1, 11]);
        Ok(())
    }

    #[test]
    fn test_concurrent_workers_disjoint_keys() -> Result<()> {
        let table = test_table();
        let mut workers = Vec::new();
        for w in 0..4i64 {
            let mut worker = TransactionWorker::new();
            for key in 0..25i64 {
                let mut txn =
                    Transaction::new(TransactionId((w * 25 + key + 1) as u64), Arc::clone(&table));
                txn.insert(vec![w * 100 + key, key]);
                worker.add_transaction(txn);
            }
            worker.run()?;
            workers.push(worker);
        }

        let mut committed = 0;
        for mut worker in workers {
            committed += worker.join()?.committed;
        }
        assert_eq!(committed, 100);
        assert_eq!(table.num_records(), 100);
        Ok(())
    }
}
