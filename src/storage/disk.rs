//! Page persistence.
//!
//! Pages are frozen with bincode, one file per logical page, laid out as
//! `<root>/tables/<table_id>/<range>/{base,tail}/<page>.pg`. The database
//! catalog lives beside them at `<root>/catalog.bin` and is authoritative:
//! page files without a catalog entry are orphans and never read.

use crate::storage::error::StorageResult;
use crate::storage::page::{LogicalPage, PageKey};
use crate::table::TableMeta;
use anyhow::{Context, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Persistence collaborator for the buffer pool.
///
/// A key that was never stored is not an error: tail pages materialize on
/// first touch, so `load_page` reports `Ok(None)` and the pool builds an
/// empty page instead.
pub trait PageStore: Send + Sync {
    fn load_page(&self, key: &PageKey) -> StorageResult<Option<LogicalPage>>;
    fn store_page(&self, key: &PageKey, page: &LogicalPage) -> StorageResult<()>;
}

/// Keeps evicted pages in memory. Backs standalone tables and tests that
/// should not touch the filesystem.
#[derive(Debug, Default)]
pub struct MemoryStore {
    pages: DashMap<PageKey, LogicalPage>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pages the store has absorbed.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

impl PageStore for MemoryStore {
    fn load_page(&self, key: &PageKey) -> StorageResult<Option<LogicalPage>> {
        Ok(self.pages.get(key).map(|page| page.value().clone()))
    }

    fn store_page(&self, key: &PageKey, page: &LogicalPage) -> StorageResult<()> {
        self.pages.insert(*key, page.clone());
        Ok(())
    }
}

/// Serialized root of a database directory: the next table id and every
/// table's value-typed state.
#[derive(Debug, Serialize, Deserialize)]
pub struct Catalog {
    pub next_table_id: u32,
    pub tables: Vec<TableMeta>,
}

/// File-backed page store rooted at a database directory.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Opens a store rooted at `root`, creating the directory on first use.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create database directory {:?}", root))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn page_path(&self, key: &PageKey) -> PathBuf {
        self.root
            .join("tables")
            .join(key.table.0.to_string())
            .join(key.range.to_string())
            .join(key.kind.as_str())
            .join(format!("{}.pg", key.page))
    }

    fn catalog_path(&self) -> PathBuf {
        self.root.join("catalog.bin")
    }

    /// Reads the catalog, or `None` when the store is fresh.
    pub fn load_catalog(&self) -> StorageResult<Option<Catalog>> {
        let path = self.catalog_path();
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        Ok(Some(bincode::deserialize(&bytes)?))
    }

    pub fn store_catalog(&self, catalog: &Catalog) -> StorageResult<()> {
        let bytes = bincode::serialize(catalog)?;
        fs::write(self.catalog_path(), bytes)?;
        Ok(())
    }
}

impl PageStore for FileStore {
    fn load_page(&self, key: &PageKey) -> StorageResult<Option<LogicalPage>> {
        let path = self.page_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        Ok(Some(bincode::deserialize(&bytes)?))
    }

    fn store_page(&self, key: &PageKey, page: &LogicalPage) -> StorageResult<()> {
        let path = self.page_path(key);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let bytes = bincode::serialize(page)?;
        fs::write(path, bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::{PageKind, TableId};
    use tempfile::tempdir;

    fn sample_key() -> PageKey {
        PageKey::new(TableId(1), 0, PageKind::Base, 2)
    }

    #[test]
    fn test_memory_store_round_trip() -> Result<()> {
        let store = MemoryStore::new();
        let key = sample_key();
        assert!(store.load_page(&key)?.is_none());

        let mut page = LogicalPage::new(6);
        page.create_record(&[1, 2, 3, 4, 5, 6])?;
        store.store_page(&key, &page)?;

        let loaded = store.load_page(&key)?.expect("page should be stored");
        assert_eq!(loaded.read_record(0)?, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(store.len(), 1);
        Ok(())
    }

    #[test]
    fn test_file_store_round_trip() -> Result<()> {
        let dir = tempdir()?;
        let store = FileStore::open(dir.path().join("db"))?;
        let key = sample_key();
        assert!(store.load_page(&key)?.is_none());

        let mut page = LogicalPage::new(6);
        page.create_record(&[9, 8, 7, 6, 5, 4])?;
        store.store_page(&key, &page)?;

        let loaded = store.load_page(&key)?.expect("page should be stored");
        assert_eq!(loaded.read_record(0)?, vec![9, 8, 7, 6, 5, 4]);
        Ok(())
    }

    #[test]
    fn test_file_store_separates_kinds_and_ranges() -> Result<()> {
        let dir = tempdir()?;
        let store = FileStore::open(dir.path())?;

        let base = PageKey::new(TableId(0), 0, PageKind::Base, 0);
        let tail = PageKey::new(TableId(0), 0, PageKind::Tail, 0);

        let mut base_page = LogicalPage::new(1);
        base_page.create_record(&[1])?;
        let mut tail_page = LogicalPage::new(1);
        tail_page.create_record(&[2])?;

        store.store_page(&base, &base_page)?;
        store.store_page(&tail, &tail_page)?;

        assert_eq!(store.load_page(&base)?.expect("base").read_value(0, 0)?, 1);
        assert_eq!(store.load_page(&tail)?.expect("tail").read_value(0, 0)?, 2);
        Ok(())
    }

    #[test]
    fn test_catalog_round_trip() -> Result<()> {
        let dir = tempdir()?;
        let store = FileStore::open(dir.path())?;
        assert!(store.load_catalog()?.is_none());

        store.store_catalog(&Catalog {
            next_table_id: 4,
            tables: Vec::new(),
        })?;

        let catalog = store.load_catalog()?.expect("catalog should exist");
        assert_eq!(catalog.next_table_id, 4);
        assert!(catalog.tables.is_empty());
        Ok(())
    }
}
