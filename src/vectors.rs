//! Vector cell access: the contract the index reads raw cells through,
//! plus an in-memory reference store.
//!
//! A document owns zero or more vector subspaces (an empty tensor has zero).
//! The index never copies cells; it reads them in place during add/search.

use crate::idmap::IdMapping;
use crate::types::{DocId, NodeId};
use parking_lot::RwLock;
use smallvec::SmallVec;

/// Read-only access to the raw vector cells of a document.
///
/// Implementations must keep a returned slice stable for the duration of the
/// index call that requested it; mutating a document's vectors while it is
/// being added or searched is a contract violation.
pub trait DocVectors: Send + Sync {
    /// Number of vector subspaces stored for `docid` (0 = empty tensor).
    fn subspace_count(&self, docid: DocId) -> usize;

    /// Raw cells of one subspace of `docid`.
    fn cells(&self, docid: DocId, subspace: usize) -> &[f32];
}

/// Heap-backed vector store indexed by document id.
///
/// Cells live in individually boxed slices, so growing the document table
/// never moves them. Readers borrow cells without holding the table lock.
pub struct DenseVectors {
    docs: RwLock<Vec<SmallVec<[Box<[f32]>; 1]>>>,
}

impl DenseVectors {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(Vec::new()),
        }
    }

    /// Install (or replace) the subspace vectors of a document.
    ///
    /// Must not be called for a document that is concurrently being added to
    /// or searched in the index; the stability contract of [`DocVectors`]
    /// belongs to the caller.
    pub fn set_document(&self, docid: DocId, subspaces: Vec<Vec<f32>>) {
        let mut docs = self.docs.write();
        if docs.len() <= docid as usize {
            docs.resize_with(docid as usize + 1, SmallVec::new);
        }
        docs[docid as usize] = subspaces
            .into_iter()
            .map(|v| v.into_boxed_slice())
            .collect();
    }

    /// Drop all subspace vectors of a document.
    pub fn clear_document(&self, docid: DocId) {
        let mut docs = self.docs.write();
        if let Some(slot) = docs.get_mut(docid as usize) {
            slot.clear();
        }
    }
}

impl Default for DenseVectors {
    fn default() -> Self {
        Self::new()
    }
}

impl DocVectors for DenseVectors {
    fn subspace_count(&self, docid: DocId) -> usize {
        self.docs
            .read()
            .get(docid as usize)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    fn cells(&self, docid: DocId, subspace: usize) -> &[f32] {
        let docs = self.docs.read();
        let cells = &docs[docid as usize][subspace];
        let (ptr, len) = (cells.as_ptr(), cells.len());
        // Safety: the cells are individually boxed, so they never move when
        // the table grows, and the DocVectors contract forbids replacing a
        // document's vectors while an index call is reading them. The slice
        // therefore stays valid for the &self borrow handed to the caller.
        unsafe { std::slice::from_raw_parts(ptr, len) }
    }
}

/// Resolves a node id to its vector cells through the id mapping.
pub(crate) struct NodeVectors<'a, V: DocVectors> {
    pub vectors: &'a V,
    pub idmap: &'a IdMapping,
}

impl<'a, V: DocVectors> NodeVectors<'a, V> {
    pub fn new(vectors: &'a V, idmap: &'a IdMapping) -> Self {
        Self { vectors, idmap }
    }

    #[inline]
    pub fn cells(&self, node: NodeId) -> &'a [f32] {
        let (docid, subspace) = self.idmap.node_to_doc(node);
        self.vectors.cells(docid, subspace as usize)
    }

    #[inline]
    pub fn docid_of(&self, node: NodeId) -> DocId {
        self.idmap.node_to_doc(node).0
    }
}
