//! Column-parallel record pages.

use crate::config::{INDIRECTION_COLUMN, MAX_RECORDS_PER_PAGE};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::physical::PhysicalPage;
use serde::{Deserialize, Serialize};

/// A group of physical pages, one per column, holding up to 512 records.
///
/// Column `c` of the record in slot `s` lives at slot `s` of physical page
/// `c`. Records span meta and data columns alike, so `total_columns` here
/// is always the meta-column count plus the table's data-column count.
/// Every column page holds exactly `num_records` slots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogicalPage {
    columns: Vec<PhysicalPage>,
    num_records: usize,
}

impl LogicalPage {
    pub fn new(total_columns: usize) -> Self {
        Self {
            columns: (0..total_columns).map(|_| PhysicalPage::new()).collect(),
            num_records: 0,
        }
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn len(&self) -> usize {
        self.num_records
    }

    pub fn is_empty(&self) -> bool {
        self.num_records == 0
    }

    pub fn has_capacity(&self) -> bool {
        self.num_records < MAX_RECORDS_PER_PAGE
    }

    /// Appends one full row across all column pages, returning its slot.
    pub fn create_record(&mut self, values: &[i64]) -> StorageResult<usize> {
        if values.len() != self.columns.len() {
            return Err(StorageError::ColumnCountMismatch {
                expected: self.columns.len(),
                got: values.len(),
            });
        }
        if !self.has_capacity() {
            return Err(StorageError::PageFull {
                len: self.num_records,
                capacity: MAX_RECORDS_PER_PAGE,
            });
        }
        let slot = self.num_records;
        for (column, &value) in self.columns.iter_mut().zip(values) {
            column.append(value)?;
        }
        self.num_records += 1;
        Ok(slot)
    }

    /// The full row (meta plus data columns) at `slot`.
    pub fn read_record(&self, slot: usize) -> StorageResult<Vec<i64>> {
        self.columns.iter().map(|column| column.read(slot)).collect()
    }

    /// One whole column, in slot order.
    pub fn read_column(&self, column: usize) -> StorageResult<Vec<i64>> {
        match self.columns.get(column) {
            Some(page) => Ok(page.read_all()),
            None => Err(StorageError::ColumnOutOfBounds {
                column,
                num_columns: self.columns.len(),
            }),
        }
    }

    pub fn read_value(&self, slot: usize, column: usize) -> StorageResult<i64> {
        match self.columns.get(column) {
            Some(page) => page.read(slot),
            None => Err(StorageError::ColumnOutOfBounds {
                column,
                num_columns: self.columns.len(),
            }),
        }
    }

    /// Overwrites one column slot of an existing record.
    pub fn update_value(&mut self, slot: usize, column: usize, value: i64) -> StorageResult<()> {
        let num_columns = self.columns.len();
        match self.columns.get_mut(column) {
            Some(page) => page.write(slot, value),
            None => Err(StorageError::ColumnOutOfBounds {
                column,
                num_columns,
            }),
        }
    }

    /// Writes the tombstone sentinel into the record's indirection slot.
    pub fn mark_deleted(&mut self, slot: usize) -> StorageResult<()> {
        self.update_value(slot, INDIRECTION_COLUMN, 0)
    }
}
