//! Page addressing and the byte-packed page formats.

pub mod logical;
pub mod physical;

use serde::{Deserialize, Serialize};

/// A unique identifier for a table, assigned by the database catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableId(pub u32);

impl std::fmt::Display for TableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Which side of a page range a logical page belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageKind {
    /// Insert-time records; sixteen fixed pages per range.
    Base,
    /// Update lineage records; grown without bound.
    Tail,
}

impl PageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageKind::Base => "base",
            PageKind::Tail => "tail",
        }
    }
}

/// Globally unique address of a logical page: table, page range, base or
/// tail side, and page index within that side. This is the buffer pool's
/// cache key and the page store's file key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageKey {
    pub table: TableId,
    pub range: u32,
    pub kind: PageKind,
    pub page: u32,
}

impl PageKey {
    pub fn new(table: TableId, range: u32, kind: PageKind, page: u32) -> Self {
        Self {
            table,
            range,
            kind,
            page,
        }
    }
}

impl std::fmt::Display for PageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/r{}/{}/{}",
            self.table,
            self.range,
            self.kind.as_str(),
            self.page
        )
    }
}

pub use logical::LogicalPage;
pub use physical::PhysicalPage;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_key_display() {
        let key = PageKey::new(TableId(3), 1, PageKind::Tail, 7);
        assert_eq!(key.to_string(), "t3/r1/tail/7");
    }

    #[test]
    fn test_page_key_hash_distinguishes_kind() {
        let base = PageKey::new(TableId(0), 0, PageKind::Base, 0);
        let tail = PageKey::new(TableId(0), 0, PageKind::Tail, 0);
        assert_ne!(base, tail);
    }
}
