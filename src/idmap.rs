//! Document id to node id translation.
//!
//! Two closed modes, fixed at index construction:
//! - `Identity`: one vector per document, `nodeid == docid`. Nothing to
//!   allocate or track.
//! - `Allocating`: multi-vector documents draw one node id per subspace from
//!   a managed allocator. Freed ids are parked under the generation of the
//!   commit that freed them and only rejoin the free list once no reader
//!   guard can still observe the old graph.

use crate::reclaim::Generation;
use crate::types::{DocId, NodeId};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};
use std::collections::VecDeque;

pub enum IdMapping {
    Identity,
    Allocating(AllocatingIds),
}

pub struct AllocatingIds {
    doc_to_nodes: DashMap<DocId, SmallVec<[NodeId; 2]>>,
    node_to_doc: DashMap<NodeId, (DocId, u32)>,
    alloc: Mutex<IdAllocator>,
}

struct IdAllocator {
    next: NodeId,
    free: Vec<NodeId>,
    parked: VecDeque<(Generation, NodeId)>,
}

/// Serializable snapshot of a mapping, for the persisted graph image.
/// Parked ids fold into the free list: a loaded index has no live guards.
#[derive(Serialize, Deserialize)]
pub(crate) enum MappingImage {
    Identity,
    Allocating {
        next: u32,
        free: Vec<u32>,
        docs: Vec<(u32, Vec<u32>)>,
    },
}

impl IdMapping {
    pub fn identity() -> Self {
        IdMapping::Identity
    }

    pub fn allocating() -> Self {
        IdMapping::Allocating(AllocatingIds {
            doc_to_nodes: DashMap::new(),
            node_to_doc: DashMap::new(),
            alloc: Mutex::new(IdAllocator {
                next: 0,
                free: Vec::new(),
                parked: VecDeque::new(),
            }),
        })
    }

    /// Draw node ids for a document with `subspaces` vectors.
    ///
    /// Identity mode supports at most one subspace per document; an empty
    /// tensor yields an empty sequence in both modes.
    pub fn add_document(&self, docid: DocId, subspaces: usize) -> SmallVec<[NodeId; 2]> {
        match self {
            IdMapping::Identity => {
                debug_assert!(
                    subspaces <= 1,
                    "identity mapping holds a single vector per document"
                );
                if subspaces == 0 {
                    SmallVec::new()
                } else {
                    smallvec![docid]
                }
            }
            IdMapping::Allocating(ids) => {
                debug_assert!(
                    !ids.doc_to_nodes.contains_key(&docid),
                    "document {} already mapped",
                    docid
                );
                let mut alloc = ids.alloc.lock();
                let mut nodes: SmallVec<[NodeId; 2]> = SmallVec::with_capacity(subspaces);
                for subspace in 0..subspaces {
                    let node = match alloc.free.pop() {
                        Some(node) => node,
                        None => {
                            let node = alloc.next;
                            alloc.next += 1;
                            node
                        }
                    };
                    ids.node_to_doc.insert(node, (docid, subspace as u32));
                    nodes.push(node);
                }
                drop(alloc);
                if !nodes.is_empty() {
                    ids.doc_to_nodes.insert(docid, nodes.clone());
                }
                nodes
            }
        }
    }

    /// Node ids currently mapped to a document. Identity mode always answers
    /// `[docid]`; the orchestrator filters on graph liveness.
    pub fn get_ids(&self, docid: DocId) -> SmallVec<[NodeId; 2]> {
        match self {
            IdMapping::Identity => smallvec![docid],
            IdMapping::Allocating(ids) => ids
                .doc_to_nodes
                .get(&docid)
                .map(|nodes| nodes.clone())
                .unwrap_or_default(),
        }
    }

    /// Unmap a document, parking its node ids under `park_generation`.
    /// Unknown documents are a no-op.
    ///
    /// The reverse node-to-doc entries stay in place until the ids are
    /// recycled: a guarded reader may still score the node through a stale
    /// link array and needs the mapping to resolve.
    pub fn remove_document(&self, docid: DocId, park_generation: Generation) {
        match self {
            IdMapping::Identity => {}
            IdMapping::Allocating(ids) => {
                if let Some((_, nodes)) = ids.doc_to_nodes.remove(&docid) {
                    let mut alloc = ids.alloc.lock();
                    for node in nodes {
                        alloc.parked.push_back((park_generation, node));
                    }
                }
            }
        }
    }

    /// `(docid, subspace)` owning a node id.
    #[inline]
    pub fn node_to_doc(&self, node: NodeId) -> (DocId, u32) {
        match self {
            IdMapping::Identity => (node, 0),
            IdMapping::Allocating(ids) => match ids.node_to_doc.get(&node) {
                Some(entry) => *entry,
                None => {
                    debug_assert!(false, "node {} has no document mapping", node);
                    (node, 0)
                }
            },
        }
    }

    /// Move parked ids older than `oldest_used` onto the free list.
    pub fn reclaim(&self, oldest_used: Generation) {
        if let IdMapping::Allocating(ids) = self {
            let mut alloc = ids.alloc.lock();
            while let Some(&(tag, node)) = alloc.parked.front() {
                if tag >= oldest_used {
                    break;
                }
                alloc.parked.pop_front();
                alloc.free.push(node);
            }
        }
    }

    pub(crate) fn to_image(&self) -> MappingImage {
        match self {
            IdMapping::Identity => MappingImage::Identity,
            IdMapping::Allocating(ids) => {
                let alloc = ids.alloc.lock();
                let mut free = alloc.free.clone();
                free.extend(alloc.parked.iter().map(|&(_, node)| node));
                let mut docs: Vec<(u32, Vec<u32>)> = ids
                    .doc_to_nodes
                    .iter()
                    .map(|entry| (*entry.key(), entry.value().to_vec()))
                    .collect();
                docs.sort_by_key(|(docid, _)| *docid);
                MappingImage::Allocating {
                    next: alloc.next,
                    free,
                    docs,
                }
            }
        }
    }

    pub(crate) fn from_image(image: MappingImage) -> Self {
        match image {
            MappingImage::Identity => IdMapping::Identity,
            MappingImage::Allocating { next, free, docs } => {
                let mapping = AllocatingIds {
                    doc_to_nodes: DashMap::new(),
                    node_to_doc: DashMap::new(),
                    alloc: Mutex::new(IdAllocator {
                        next,
                        free,
                        parked: VecDeque::new(),
                    }),
                };
                for (docid, nodes) in docs {
                    for (subspace, &node) in nodes.iter().enumerate() {
                        mapping.node_to_doc.insert(node, (docid, subspace as u32));
                    }
                    mapping.doc_to_nodes.insert(docid, SmallVec::from_vec(nodes));
                }
                IdMapping::Allocating(mapping)
            }
        }
    }
}
