//! The byte-packed column page.

use crate::config::{MAX_RECORDS_PER_PAGE, PAGE_SIZE, RECORD_SIZE};
use crate::storage::error::{StorageError, StorageResult};
use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};

/// A fixed-size byte buffer packing `i64` values big-endian, eight bytes
/// per slot.
///
/// Slots are allocated strictly append-only; an existing slot may be
/// overwritten in place but never removed or reordered. The buffer is a
/// serde value type so the page store can freeze it as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhysicalPage {
    data: Vec<u8>,
    num_records: usize,
}

impl PhysicalPage {
    pub fn new() -> Self {
        Self {
            data: vec![0; PAGE_SIZE],
            num_records: 0,
        }
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.num_records
    }

    pub fn is_empty(&self) -> bool {
        self.num_records == 0
    }

    pub fn has_capacity(&self) -> bool {
        self.num_records < MAX_RECORDS_PER_PAGE
    }

    /// Writes `value` at the next free slot and returns the slot index.
    pub fn append(&mut self, value: i64) -> StorageResult<usize> {
        if !self.has_capacity() {
            return Err(StorageError::PageFull {
                len: self.num_records,
                capacity: MAX_RECORDS_PER_PAGE,
            });
        }
        let slot = self.num_records;
        BigEndian::write_i64(&mut self.data[slot * RECORD_SIZE..(slot + 1) * RECORD_SIZE], value);
        self.num_records += 1;
        Ok(slot)
    }

    /// Reads the value at an occupied slot.
    pub fn read(&self, slot: usize) -> StorageResult<i64> {
        if slot >= self.num_records {
            return Err(StorageError::SlotOutOfBounds {
                slot,
                len: self.num_records,
            });
        }
        Ok(BigEndian::read_i64(
            &self.data[slot * RECORD_SIZE..(slot + 1) * RECORD_SIZE],
        ))
    }

    /// Overwrites an occupied slot in place.
    pub fn write(&mut self, slot: usize, value: i64) -> StorageResult<()> {
        if slot >= self.num_records {
            return Err(StorageError::SlotOutOfBounds {
                slot,
                len: self.num_records,
            });
        }
        BigEndian::write_i64(&mut self.data[slot * RECORD_SIZE..(slot + 1) * RECORD_SIZE], value);
        Ok(())
    }

    /// Every occupied slot, in slot order.
    pub fn read_all(&self) -> Vec<i64> {
        (0..self.num_records)
            .map(|slot| BigEndian::read_i64(&self.data[slot * RECORD_SIZE..(slot + 1) * RECORD_SIZE]))
            .collect()
    }
}

impl Default for PhysicalPage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_read() -> StorageResult<()> {
        let mut page = PhysicalPage::new();
        assert_eq!(page.append(42)?, 0);
        assert_eq!(page.append(-7)?, 1);
        assert_eq!(page.read(0)?, 42);
        assert_eq!(page.read(1)?, -7);
        assert_eq!(page.len(), 2);
        Ok(())
    }

    #[test]
    fn test_write_in_place() -> StorageResult<()> {
        let mut page = PhysicalPage::new();
        page.append(1)?;
        page.append(2)?;
        page.write(0, 99)?;
        assert_eq!(page.read(0)?, 99);
        assert_eq!(page.read(1)?, 2);
        Ok(())
    }

    #[test]
    fn test_read_unoccupied_slot() {
        let mut page = PhysicalPage::new();
        page.append(1).unwrap();
        assert!(matches!(
            page.read(1),
            Err(StorageError::SlotOutOfBounds { slot: 1, len: 1 })
        ));
        assert!(matches!(
            page.write(5, 0),
            Err(StorageError::SlotOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_fills_to_capacity_then_rejects() {
        let mut page = PhysicalPage::new();
        for i in 0..MAX_RECORDS_PER_PAGE {
            assert_eq!(page.append(i as i64).unwrap(), i);
        }
        assert!(!page.has_capacity());
        assert!(matches!(page.append(0), Err(StorageError::PageFull { .. })));
    }

    #[test]
    fn test_read_all_preserves_order() {
        let mut page = PhysicalPage::new();
        let values = [i64::MIN, -1, 0, 1, i64::MAX];
        for value in values {
            page.append(value).unwrap();
        }
        assert_eq!(page.read_all(), values);
    }

    #[test]
    fn test_serde_round_trip() {
        let mut page = PhysicalPage::new();
        page.append(123456789).unwrap();
        page.append(-42).unwrap();

        let bytes = bincode::serialize(&page).unwrap();
        let restored: PhysicalPage = bincode::deserialize(&bytes).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.read(0).unwrap(), 123456789);
        assert_eq!(restored.read(1).unwrap(), -42);
    }
}
