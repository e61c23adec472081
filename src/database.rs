//! Database lifecycle: the table catalog, shared buffer pool, and clean
//! shutdown.
//!
//! Durability is clean-shutdown only: [`Database::close`] persists the
//! catalog and flushes every dirty frame; nothing is written ahead of
//! time, so a crash loses whatever changed since the last close.

use crate::concurrency::transaction::{Transaction, TransactionIdAllocator};
use crate::config::DEFAULT_POOL_FRAMES;
use crate::storage::buffer::BufferPool;
use crate::storage::disk::{Catalog, FileStore, PageStore};
use crate::storage::page::TableId;
use crate::table::Table;
use anyhow::{bail, Context, Result};
use log::warn;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// A database directory: its tables, the buffer pool they share, and the
/// transaction id source.
pub struct Database {
    store: Arc<FileStore>,
    pool: BufferPool,
    tables: RwLock<HashMap<String, Arc<Table>>>,
    next_table_id: AtomicU32,
    transaction_ids: TransactionIdAllocator,
}

impl Database {
    /// Opens a database rooted at `path`, creating the directory when it
    /// does not exist and reconstructing every cataloged table when it
    /// does.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_frames(path, DEFAULT_POOL_FRAMES)
    }

    /// [`open`](Self::open) with an explicit buffer pool capacity.
    pub fn open_with_frames(path: impl AsRef<Path>, num_frames: usize) -> Result<Self> {
        let store = Arc::new(FileStore::open(path.as_ref())?);
        let pool = BufferPool::new(Arc::clone(&store) as Arc<dyn PageStore>, num_frames);

        let mut tables = HashMap::new();
        let mut next_table_id = 0;
        if let Some(catalog) = store.load_catalog().context("failed to read catalog")? {
            next_table_id = catalog.next_table_id;
            for meta in catalog.tables {
                let name = meta.name.clone();
                let table = Table::from_meta(meta, pool.clone())
                    .with_context(|| format!("failed to reconstruct table {}", name))?;
                tables.insert(name, table);
            }
        }

        Ok(Self {
            store,
            pool,
            tables: RwLock::new(tables),
            next_table_id: AtomicU32::new(next_table_id),
            transaction_ids: TransactionIdAllocator::new(),
        })
    }

    /// Creates a table, or returns the existing one of the same name and
    /// shape. A name collision with a different shape is an error.
    pub fn create_table(
        &self,
        name: &str,
        num_columns: usize,
        key_column: usize,
    ) -> Result<Arc<Table>> {
        let mut tables = self.tables.write();
        if let Some(existing) = tables.get(name) {
            if existing.num_columns() != num_columns || existing.key_column() != key_column {
                bail!(
                    "table {} already exists with a different shape ({} columns, key {})",
                    name,
                    existing.num_columns(),
                    existing.key_column()
                );
            }
            return Ok(Arc::clone(existing));
        }
        let id = TableId(self.next_table_id.fetch_add(1, Ordering::SeqCst));
        let table = Table::create(name, id, num_columns, key_column, self.pool.clone())?;
        tables.insert(name.to_string(), Arc::clone(&table));
        Ok(table)
    }

    pub fn get_table(&self, name: &str) -> Option<Arc<Table>> {
        self.tables.read().get(name).cloned()
    }

    /// Drops a table from the catalog. Its page files become orphans and
    /// are never read again. Returns whether the table existed.
    pub fn drop_table(&self, name: &str) -> bool {
        self.tables.write().remove(name).is_some()
    }

    pub fn list_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Starts a transaction against `table` with a fresh id.
    pub fn begin_transaction(&self, table: &Arc<Table>) -> Transaction {
        Transaction::new(self.transaction_ids.allocate(), Arc::clone(table))
    }

    /// Persists the catalog and writes back every dirty page. The
    /// database stays usable afterwards; `close` is idempotent.
    pub fn close(&self) -> Result<()> {
        let catalog = {
            let tables = self.tables.read();
            Catalog {
                next_table_id: self.next_table_id.load(Ordering::SeqCst),
                tables: tables.values().map(|table| table.to_meta()).collect(),
            }
        };
        self.store
            .store_catalog(&catalog)
            .context("failed to persist catalog")?;
        self.pool.flush_all().context("failed to flush pages")?;
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!("database close on drop failed: {}", err);
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("root", &self.store.root())
            .field("tables", &self.list_tables())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    #[test]
    fn test_create_table_is_idempotent() -> Result<()> {
        let dir = tempdir()?;
        let db = Database::open(dir.path())?;

        let first = db.create_table("grades", 3, 0)?;
        let again = db.create_table("grades", 3, 0)?;
        assert_eq!(first.id(), again.id());

        // same name, different shape
        assert!(db.create_table("grades", 4, 0).is_err());
        Ok(())
    }

    #[test]
    fn test_reopen_restores_tables_and_data() -> Result<()> {
        let dir = tempdir()?;
        {
            let db = Database::open(dir.path())?;
            let table = db.create_table("grades", 3, 0)?;
            let rid = table.insert(&[5, 10, 20])?;
            table.update(rid, &[None, Some(99), None])?;
            db.close()?;
        }

        let db = Database::open(dir.path())?;
        let table = db.get_table("grades").expect("table should be cataloged");
        let rid = table.locate_key(5).expect("record should be indexed");
        assert_eq!(table.select_version(rid, 0)?, vec![5, 99, 20]);
        assert_eq!(table.select_version(rid, -1)?, vec![5, 10, 20]);

        // table ids keep advancing after reopen
        let other = db.create_table("enrollment", 2, 0)?;
        assert_ne!(other.id(), table.id());
        Ok(())
    }

    #[test]
    fn test_drop_table_survives_reopen() -> Result<()> {
        let dir = tempdir()?;
        {
            let db = Database::open(dir.path())?;
            let table = db.create_table("scratch", 2, 0)?;
            table.insert(&[1, 2])?;
            db.close()?;
            assert!(db.drop_table("scratch"));
            assert!(!db.drop_table("scratch"));
            db.close()?;
        }

        // the catalog, not the page files on disk, decides what exists
        let db = Database::open(dir.path())?;
        assert!(db.get_table("scratch").is_none());
        assert!(db.list_tables().is_empty());
        Ok(())
    }

    #[test]
    fn test_transaction_ids_are_unique() -> Result<()> {
        let dir = tempdir()?;
        let db = Database::open(dir.path())?;
        let table = db.create_table("grades", 2, 0)?;

        let a = db.begin_transaction(&table);
        let b = db.begin_transaction(&table);
        assert_ne!(a.id(), b.id());
        Ok(())
    }

    #[test]
    fn test_close_on_drop_persists() -> Result<()> {
        let dir = tempdir()?;
        {
            let db = Database::open(dir.path())?;
            let table = db.create_table("grades", 2, 0)?;
            table.insert(&[1, 10])?;
            // no explicit close: Drop must flush
        }
        let db = Database::open(dir.path())?;
        let table = db.get_table("grades").expect("table persisted by drop");
        let rid = table.locate_key(1).expect("record persisted by drop");
        assert_eq!(table.read_data(rid)?, vec![1, 10]);
        Ok(())
    }
}
