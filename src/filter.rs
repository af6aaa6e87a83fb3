//! Global candidate filters restricting which documents a search may return.
//!
//! Filtered nodes are still traversed (the graph stays navigable); they are
//! only excluded from result sets. A sparse filter lets the index skip graph
//! traversal entirely and score the admitted documents directly.

use crate::types::DocId;
use roaring::RoaringBitmap;

/// Restricts the documents a search may return.
pub trait GlobalFilter: Send + Sync {
    /// False means the filter admits everything and can be ignored.
    fn is_active(&self) -> bool;

    /// Whether `docid` may appear in results.
    fn check(&self, docid: DocId) -> bool;

    /// Number of admitted documents.
    fn count(&self) -> u64;

    /// Upper bound of the document id space the filter covers.
    fn size(&self) -> u64;

    /// Admitted document ids, used by the exact-scan fallback for sparse
    /// filters.
    fn doc_ids(&self) -> Vec<DocId>;
}

/// Roaring-bitmap backed filter over external document ids.
pub struct BitmapFilter {
    bitmap: RoaringBitmap,
    limit: u32,
}

impl BitmapFilter {
    pub fn new(bitmap: RoaringBitmap, limit: u32) -> Self {
        Self { bitmap, limit }
    }

    pub fn from_docs(docs: impl IntoIterator<Item = DocId>, limit: u32) -> Self {
        let mut bitmap = RoaringBitmap::new();
        for doc in docs {
            bitmap.insert(doc);
        }
        Self { bitmap, limit }
    }
}

impl GlobalFilter for BitmapFilter {
    fn is_active(&self) -> bool {
        true
    }

    #[inline]
    fn check(&self, docid: DocId) -> bool {
        self.bitmap.contains(docid)
    }

    fn count(&self) -> u64 {
        self.bitmap.len()
    }

    fn size(&self) -> u64 {
        self.limit as u64
    }

    fn doc_ids(&self) -> Vec<DocId> {
        self.bitmap.iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitmap_filter_membership() {
        let f = BitmapFilter::from_docs([2, 5, 9], 16);
        assert!(f.is_active());
        assert!(f.check(5));
        assert!(!f.check(4));
        assert_eq!(f.count(), 3);
        assert_eq!(f.size(), 16);
        assert_eq!(f.doc_ids(), vec![2, 5, 9]);
    }
}
