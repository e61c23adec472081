//! Page ranges: sixteen fixed base pages plus an unbounded tail side.
//!
//! A range never touches pages directly; every access pins a frame through
//! the shared buffer pool and releases it when the operation returns, so a
//! page can always be evicted between operations but never during one.

use crate::config::{MAX_RECORDS_PER_PAGE, MAX_RECORDS_PER_PAGE_RANGE, MERGE_UPDATE_THRESHOLD, NUM_BASE_PAGES};
use crate::storage::buffer::BufferPool;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{PageKey, PageKind, TableId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// One row group of a table: base records live in a fixed set of sixteen
/// logical pages, tail records in a list that grows as updates accumulate.
#[derive(Debug)]
pub struct PageRange {
    table: TableId,
    index: usize,
    total_columns: usize,
    pool: BufferPool,
    num_base_records: AtomicUsize,
    num_tail_records: AtomicUsize,
    num_updates: AtomicUsize,
    // Serializes record creation so the slot a page hands out agrees with
    // the counters that place the next record.
    append_latch: Mutex<()>,
}

impl PageRange {
    pub fn new(table: TableId, index: usize, total_columns: usize, pool: BufferPool) -> Self {
        Self::restore(table, index, total_columns, pool, 0, 0, 0)
    }

    /// Rebuilds a range from persisted counters; the pages themselves are
    /// faulted in lazily by the buffer pool.
    pub fn restore(
        table: TableId,
        index: usize,
        total_columns: usize,
        pool: BufferPool,
        num_base_records: usize,
        num_tail_records: usize,
        num_updates: usize,
    ) -> Self {
        Self {
            table,
            index,
            total_columns,
            pool,
            num_base_records: AtomicUsize::new(num_base_records),
            num_tail_records: AtomicUsize::new(num_tail_records),
            num_updates: AtomicUsize::new(num_updates),
            append_latch: Mutex::new(()),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn num_base_records(&self) -> usize {
        self.num_base_records.load(Ordering::Acquire)
    }

    pub fn num_tail_records(&self) -> usize {
        self.num_tail_records.load(Ordering::Acquire)
    }

    pub fn num_updates(&self) -> usize {
        self.num_updates.load(Ordering::Acquire)
    }

    pub fn has_base_capacity(&self) -> bool {
        self.num_base_records() < MAX_RECORDS_PER_PAGE_RANGE
    }

    fn key(&self, kind: PageKind, page: u32) -> PageKey {
        PageKey::new(self.table, self.index as u32, kind, page)
    }

    /// Appends a full row on the requested side and returns where it landed.
    ///
    /// Base records go to the first of the sixteen fixed pages with a free
    /// slot; when none has one the range is full and the caller must place
    /// the record in another range. Tail pages are appended strictly in
    /// order, a new page materializing whenever the last one fills.
    pub fn create_record(&self, kind: PageKind, values: &[i64]) -> StorageResult<(u32, usize)> {
        let _latch = self.append_latch.lock();
        match kind {
            PageKind::Base => {
                for page in 0..NUM_BASE_PAGES as u32 {
                    let frame = self.pool.fetch_page(self.key(kind, page), self.total_columns)?;
                    if !frame.page().has_capacity() {
                        continue;
                    }
                    let slot = frame.page_mut().create_record(values)?;
                    self.num_base_records.fetch_add(1, Ordering::AcqRel);
                    return Ok((page, slot));
                }
                Err(StorageError::RangeFull)
            }
            PageKind::Tail => {
                let page = (self.num_tail_records() / MAX_RECORDS_PER_PAGE) as u32;
                let frame = self.pool.fetch_page(self.key(kind, page), self.total_columns)?;
                let slot = frame.page_mut().create_record(values)?;
                self.num_tail_records.fetch_add(1, Ordering::AcqRel);
                Ok((page, slot))
            }
        }
    }

    pub fn read_record(&self, kind: PageKind, page: u32, slot: usize) -> StorageResult<Vec<i64>> {
        self.pool
            .fetch_page(self.key(kind, page), self.total_columns)?
            .page()
            .read_record(slot)
    }

    pub fn read_value(
        &self,
        kind: PageKind,
        page: u32,
        slot: usize,
        column: usize,
    ) -> StorageResult<i64> {
        self.pool
            .fetch_page(self.key(kind, page), self.total_columns)?
            .page()
            .read_value(slot, column)
    }

    /// One whole column of one page, in slot order. Used by the merge scan.
    pub fn read_column(&self, kind: PageKind, page: u32, column: usize) -> StorageResult<Vec<i64>> {
        self.pool
            .fetch_page(self.key(kind, page), self.total_columns)?
            .page()
            .read_column(column)
    }

    pub fn update_value(
        &self,
        kind: PageKind,
        page: u32,
        slot: usize,
        column: usize,
        value: i64,
    ) -> StorageResult<()> {
        self.pool
            .fetch_page(self.key(kind, page), self.total_columns)?
            .page_mut()
            .update_value(slot, column, value)
    }

    pub fn mark_deleted(&self, kind: PageKind, page: u32, slot: usize) -> StorageResult<()> {
        self.pool
            .fetch_page(self.key(kind, page), self.total_columns)?
            .page_mut()
            .mark_deleted(slot)
    }

    /// Counts one applied update. Returns true when the range has absorbed
    /// enough updates to deserve a merge pass; the counter resets so the
    /// next threshold starts from zero.
    pub fn register_update(&self) -> bool {
        let count = self.num_updates.fetch_add(1, Ordering::AcqRel) + 1;
        if count >= MERGE_UPDATE_THRESHOLD {
            self.num_updates.store(0, Ordering::Release);
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::disk::{MemoryStore, PageStore};
    use anyhow::Result;
    use std::sync::Arc;

    fn range(total_columns: usize) -> PageRange {
        let store = Arc::new(MemoryStore::new());
        let pool = BufferPool::new(store as Arc<dyn PageStore>, 32);
        PageRange::new(TableId(0), 0, total_columns, pool)
    }

    #[test]
    fn test_base_records_fill_pages_in_order() -> Result<()> {
        let range = range(2);

        let (page, slot) = range.create_record(PageKind::Base, &[1, 2])?;
        assert_eq!((page, slot), (0, 0));

        for i in 1..MAX_RECORDS_PER_PAGE {
            let (page, slot) = range.create_record(PageKind::Base, &[i as i64, 0])?;
            assert_eq!((page, slot), (0, i));
        }

        // the first page is full, the next record spills to page 1
        let (page, slot) = range.create_record(PageKind::Base, &[9, 9])?;
        assert_eq!((page, slot), (1, 0));
        assert_eq!(range.num_base_records(), MAX_RECORDS_PER_PAGE + 1);
        Ok(())
    }

    #[test]
    fn test_base_capacity_is_bounded() -> Result<()> {
        let range = range(1);
        for i in 0..MAX_RECORDS_PER_PAGE_RANGE {
            range.create_record(PageKind::Base, &[i as i64])?;
        }
        assert!(!range.has_base_capacity());
        assert!(matches!(
            range.create_record(PageKind::Base, &[0]),
            Err(StorageError::RangeFull)
        ));
        Ok(())
    }

    #[test]
    fn test_tail_pages_grow_without_bound() -> Result<()> {
        let range = range(1);
        for i in 0..MAX_RECORDS_PER_PAGE {
            let (page, _) = range.create_record(PageKind::Tail, &[i as i64])?;
            assert_eq!(page, 0);
        }
        let (page, slot) = range.create_record(PageKind::Tail, &[-1])?;
        assert_eq!((page, slot), (1, 0));
        assert_eq!(range.num_tail_records(), MAX_RECORDS_PER_PAGE + 1);
        Ok(())
    }

    #[test]
    fn test_read_and_update_round_trip() -> Result<()> {
        let range = range(3);
        let (page, slot) = range.create_record(PageKind::Base, &[1, 2, 3])?;

        assert_eq!(range.read_record(PageKind::Base, page, slot)?, vec![1, 2, 3]);
        range.update_value(PageKind::Base, page, slot, 1, 42)?;
        assert_eq!(range.read_value(PageKind::Base, page, slot, 1)?, 42);
        Ok(())
    }

    #[test]
    fn test_mark_deleted_tombstones_first_column() -> Result<()> {
        let range = range(3);
        let (page, slot) = range.create_record(PageKind::Base, &[7, 8, 9])?;
        range.mark_deleted(PageKind::Base, page, slot)?;
        assert_eq!(range.read_value(PageKind::Base, page, slot, 0)?, 0);
        assert_eq!(range.read_value(PageKind::Base, page, slot, 1)?, 8);
        Ok(())
    }

    #[test]
    fn test_register_update_reports_threshold() {
        let range = range(1);
        for _ in 0..MERGE_UPDATE_THRESHOLD - 1 {
            assert!(!range.register_update());
        }
        assert!(range.register_update());
        // counter reset: the next threshold starts over
        assert_eq!(range.num_updates(), 0);
        assert!(!range.register_update());
    }

    #[test]
    fn test_concurrent_creates_get_distinct_slots() -> Result<()> {
        use std::thread;

        let range = Arc::new(range(1));
        let mut handles = Vec::new();
        for t in 0..4 {
            let range = Arc::clone(&range);
            handles.push(thread::spawn(move || -> Result<Vec<(u32, usize)>> {
                let mut placed = Vec::new();
                for i in 0..100 {
                    placed.push(range.create_record(PageKind::Tail, &[t * 100 + i])?);
                }
                Ok(placed)
            }));
        }

        let mut all: Vec<(u32, usize)> = Vec::new();
        for handle in handles {
            all.extend(handle.join().expect("thread panicked")?);
        }
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 400);
        assert_eq!(range.num_tail_records(), 400);
        Ok(())
    }
}
