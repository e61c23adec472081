//! The query surface consumed by a thin caller layer: point operations by
//! primary key plus range aggregates.
//!
//! Every aggregate resolves a primary-key range through the index and
//! folds over newest-version values materialized through the lineage, so
//! results never depend on whether merge has caught up with the tail.
//! Calls here run without record locks; transactional callers go through
//! [`Transaction`](crate::concurrency::Transaction) instead.

use crate::table::{Record, Rid, Table, TableError, TableResult};
use std::sync::Arc;

/// Query handle over one table.
#[derive(Debug, Clone)]
pub struct Query {
    table: Arc<Table>,
}

impl Query {
    pub fn new(table: Arc<Table>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    /// Inserts a record, returning its new RID.
    pub fn insert(&self, values: &[i64]) -> TableResult<Rid> {
        self.table.insert(values)
    }

    /// Newest version of every live record whose insert-time value in
    /// `search_column` equals `search_key`.
    pub fn select(&self, search_key: i64, search_column: usize) -> TableResult<Vec<Record>> {
        self.select_version(search_key, search_column, 0)
    }

    /// Like [`select`](Self::select), but `relative_version` steps behind
    /// the newest (0 = newest, -1 = one update earlier).
    pub fn select_version(
        &self,
        search_key: i64,
        search_column: usize,
        relative_version: i64,
    ) -> TableResult<Vec<Record>> {
        self.table
            .locate(search_column, search_key)
            .into_iter()
            .map(|rid| {
                Ok(Record {
                    rid,
                    columns: self.table.select_version(rid, relative_version)?,
                })
            })
            .collect()
    }

    /// Updates the record with primary key `key`; `None` leaves a column
    /// unchanged.
    pub fn update(&self, key: i64, values: &[Option<i64>]) -> TableResult<()> {
        let rid = self.resolve_key(key)?;
        self.table.update(rid, values)
    }

    /// Logically deletes the record with primary key `key`.
    pub fn delete(&self, key: i64) -> TableResult<()> {
        let rid = self.resolve_key(key)?;
        self.table.delete(rid)?;
        Ok(())
    }

    /// Sum of `column` over newest versions in the primary-key range
    /// `start..=end`. `None` when the range holds no records.
    pub fn sum(&self, start: i64, end: i64, column: usize) -> TableResult<Option<i64>> {
        self.sum_version(start, end, column, 0)
    }

    pub fn sum_version(
        &self,
        start: i64,
        end: i64,
        column: usize,
        relative_version: i64,
    ) -> TableResult<Option<i64>> {
        let mut total = None;
        for value in self.column_values(start, end, column, relative_version)? {
            total = Some(total.unwrap_or(0) + value);
        }
        Ok(total)
    }

    pub fn max(&self, start: i64, end: i64, column: usize) -> TableResult<Option<i64>> {
        Ok(self.column_values(start, end, column, 0)?.into_iter().max())
    }

    pub fn min(&self, start: i64, end: i64, column: usize) -> TableResult<Option<i64>> {
        Ok(self.column_values(start, end, column, 0)?.into_iter().min())
    }

    /// Number of live records in the primary-key range.
    pub fn count(&self, start: i64, end: i64) -> TableResult<usize> {
        Ok(self
            .table
            .locate_range(start, end, self.table.key_column())
            .len())
    }

    pub fn avg(&self, start: i64, end: i64, column: usize) -> TableResult<Option<f64>> {
        let values = self.column_values(start, end, column, 0)?;
        if values.is_empty() {
            return Ok(None);
        }
        let total: i64 = values.iter().sum();
        Ok(Some(total as f64 / values.len() as f64))
    }

    /// Adds one to `column` of the record with primary key `key`.
    pub fn increment(&self, key: i64, column: usize) -> TableResult<()> {
        let rid = self.resolve_key(key)?;
        let current = self.read_column_value(rid, column, 0)?;
        let mut values = vec![None; self.table.num_columns()];
        values[column] = Some(current + 1);
        self.table.update(rid, &values)
    }

    fn resolve_key(&self, key: i64) -> TableResult<Rid> {
        self.table
            .locate_key(key)
            .ok_or(TableError::KeyNotFound { key })
    }

    fn column_values(
        &self,
        start: i64,
        end: i64,
        column: usize,
        relative_version: i64,
    ) -> TableResult<Vec<i64>> {
        self.table
            .locate_range(start, end, self.table.key_column())
            .into_iter()
            .map(|rid| self.read_column_value(rid, column, relative_version))
            .collect()
    }

    fn read_column_value(
        &self,
        rid: Rid,
        column: usize,
        relative_version: i64,
    ) -> TableResult<i64> {
        let row = self.table.select_version(rid, relative_version)?;
        row.get(column)
            .copied()
            .ok_or(TableError::Storage(
                crate::storage::error::StorageError::ColumnOutOfBounds {
                    column,
                    num_columns: row.len(),
                },
            ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::buffer::BufferPool;
    use crate::storage::disk::{MemoryStore, PageStore};
    use crate::storage::page::TableId;
    use anyhow::Result;

    fn test_query() -> Query {
        let store = Arc::new(MemoryStore::new());
        let pool = BufferPool::new(store as Arc<dyn PageStore>, 64);
        Query::new(Table::create("grades", TableId(0), 3, 0, pool).unwrap())
    }

    #[test]
    fn test_select_returns_newest_version() -> Result<()> {
        let query = test_query();
        query.insert(&[5, 10, 20])?;
        query.update(5, &[None, Some(99), None])?;

        let records = query.select(5, 0)?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].columns, vec![5, 99, 20]);

        let prior = query.select_version(5, 0, -1)?;
        assert_eq!(prior[0].columns, vec![5, 10, 20]);
        Ok(())
    }

    #[test]
    fn test_select_by_non_key_column() -> Result<()> {
        let query = test_query();
        query.insert(&[1, 7, 100])?;
        query.insert(&[2, 7, 200])?;
        query.insert(&[3, 8, 300])?;

        let records = query.select(7, 1)?;
        assert_eq!(records.len(), 2);
        Ok(())
    }

    #[test]
    fn test_select_missing_key_is_empty() -> Result<()> {
        let query = test_query();
        assert!(query.select(42, 0)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_update_and_delete_by_key() -> Result<()> {
        let query = test_query();
        query.insert(&[1, 10, 100])?;
        assert!(matches!(
            query.update(9, &[None, Some(1), None]),
            Err(TableError::KeyNotFound { key: 9 })
        ));

        query.delete(1)?;
        assert!(query.select(1, 0)?.is_empty());
        assert!(matches!(
            query.delete(1),
            Err(TableError::KeyNotFound { key: 1 })
        ));
        Ok(())
    }

    #[test]
    fn test_sum_over_key_range() -> Result<()> {
        let query = test_query();
        for key in 0..10 {
            query.insert(&[key, key * 2, 0])?;
        }
        // keys 0..=4, column 1 holds 0,2,4,6,8
        assert_eq!(query.sum(0, 4, 1)?, Some(20));
        assert_eq!(query.sum(100, 200, 1)?, None);
        Ok(())
    }

    #[test]
    fn test_sum_version_sees_history() -> Result<()> {
        let query = test_query();
        query.insert(&[1, 10, 0])?;
        query.insert(&[2, 20, 0])?;
        query.update(1, &[None, Some(100), None])?;

        assert_eq!(query.sum(1, 2, 1)?, Some(120));
        assert_eq!(query.sum_version(1, 2, 1, -1)?, Some(30));
        Ok(())
    }

    #[test]
    fn test_aggregates_use_newest_versions() -> Result<()> {
        let query = test_query();
        query.insert(&[1, 5, 0])?;
        query.insert(&[2, 50, 0])?;
        query.update(2, &[None, Some(-7), None])?;

        assert_eq!(query.max(1, 2, 1)?, Some(5));
        assert_eq!(query.min(1, 2, 1)?, Some(-7));
        assert_eq!(query.count(1, 2)?, 2);
        assert_eq!(query.avg(1, 2, 1)?, Some(-1.0));
        assert_eq!(query.avg(10, 20, 1)?, None);
        Ok(())
    }

    #[test]
    fn test_count_ignores_deleted_records() -> Result<()> {
        let query = test_query();
        query.insert(&[1, 0, 0])?;
        query.insert(&[2, 0, 0])?;
        query.delete(1)?;
        assert_eq!(query.count(1, 2)?, 1);
        Ok(())
    }

    #[test]
    fn test_increment() -> Result<()> {
        let query = test_query();
        query.insert(&[1, 10, 0])?;
        query.increment(1, 1)?;
        query.increment(1, 1)?;
        assert_eq!(query.select(1, 0)?[0].columns, vec![1, 12, 0]);
        Ok(())
    }
}
