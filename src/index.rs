//! The secondary index: column value to RID lists with point and range
//! lookup.
//!
//! Entries reflect insert-time column values and are not rewritten by
//! updates; every consumer filters located RIDs through the table's page
//! directory, which keeps entries for deleted or superseded values
//! harmless. Removal happens on delete only, through a reverse map from
//! RID back to the values it was registered under.

use crate::table::Rid;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// One ordered map per data column, plus the RID-to-values reverse map
/// that makes removal independent of what the stored record looks like by
/// the time it is deleted (merge may have rewritten its base columns).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Index {
    columns: Vec<BTreeMap<i64, Vec<Rid>>>,
    rows: HashMap<Rid, Vec<i64>>,
}

impl Index {
    pub fn new(num_columns: usize) -> Self {
        Self {
            columns: (0..num_columns).map(|_| BTreeMap::new()).collect(),
            rows: HashMap::new(),
        }
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// RIDs registered under `value` in `column`.
    pub fn locate(&self, column: usize, value: i64) -> Vec<Rid> {
        self.columns
            .get(column)
            .and_then(|index| index.get(&value))
            .cloned()
            .unwrap_or_default()
    }

    /// RIDs registered under any value in `begin..=end` of `column`,
    /// ordered by value.
    pub fn locate_range(&self, begin: i64, end: i64, column: usize) -> Vec<Rid> {
        let Some(index) = self.columns.get(column) else {
            return Vec::new();
        };
        index
            .range(begin..=end)
            .flat_map(|(_, rids)| rids.iter().copied())
            .collect()
    }

    /// Registers a record under each of its column values.
    pub fn insert(&mut self, rid: Rid, values: &[i64]) {
        for (column, &value) in self.columns.iter_mut().zip(values) {
            column.entry(value).or_default().push(rid);
        }
        self.rows.insert(rid, values.to_vec());
    }

    /// Drops every entry for `rid`, returning the values it was registered
    /// under. `None` when the RID was never indexed.
    pub fn remove(&mut self, rid: Rid) -> Option<Vec<i64>> {
        let values = self.rows.remove(&rid)?;
        for (column, &value) in self.columns.iter_mut().zip(&values) {
            if let Some(rids) = column.get_mut(&value) {
                rids.retain(|&entry| entry != rid);
                if rids.is_empty() {
                    column.remove(&value);
                }
            }
        }
        Some(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate_point() {
        let mut index = Index::new(3);
        index.insert(Rid(1), &[5, 10, 20]);
        index.insert(Rid(2), &[6, 10, 30]);

        assert_eq!(index.locate(0, 5), vec![Rid(1)]);
        assert_eq!(index.locate(1, 10), vec![Rid(1), Rid(2)]);
        assert!(index.locate(2, 99).is_empty());
        assert!(index.locate(9, 5).is_empty());
    }

    #[test]
    fn test_locate_range_is_ordered_by_value() {
        let mut index = Index::new(1);
        index.insert(Rid(3), &[30]);
        index.insert(Rid(1), &[10]);
        index.insert(Rid(2), &[20]);

        assert_eq!(index.locate_range(10, 30, 0), vec![Rid(1), Rid(2), Rid(3)]);
        assert_eq!(index.locate_range(15, 25, 0), vec![Rid(2)]);
        assert!(index.locate_range(40, 50, 0).is_empty());
    }

    #[test]
    fn test_remove_returns_registered_values() {
        let mut index = Index::new(2);
        index.insert(Rid(1), &[5, 7]);
        index.insert(Rid(2), &[5, 8]);

        assert_eq!(index.remove(Rid(1)), Some(vec![5, 7]));
        assert_eq!(index.locate(0, 5), vec![Rid(2)]);
        assert!(index.locate(1, 7).is_empty());

        // a second remove is a no-op
        assert_eq!(index.remove(Rid(1)), None);
    }

    #[test]
    fn test_reinsert_after_remove() {
        let mut index = Index::new(1);
        index.insert(Rid(1), &[5]);
        index.remove(Rid(1));
        index.insert(Rid(9), &[5]);
        assert_eq!(index.locate(0, 5), vec![Rid(9)]);
    }

    #[test]
    fn test_serde_round_trip() {
        let mut index = Index::new(2);
        index.insert(Rid(1), &[5, 7]);
        index.insert(Rid(2), &[6, 7]);

        let bytes = bincode::serialize(&index).unwrap();
        let restored: Index = bincode::deserialize(&bytes).unwrap();
        assert_eq!(restored.locate(1, 7), vec![Rid(1), Rid(2)]);
        assert_eq!(restored.locate(0, 6), vec![Rid(2)]);
    }
}
