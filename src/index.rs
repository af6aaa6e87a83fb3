//! Mutation orchestration and search entry points.
//!
//! The index coordinates id mapping, graph storage, neighbor selection and
//! search. All methods take `&self`: internals are concurrency-safe, and the
//! mutation path is serialized by an internal writer lock. Readers run
//! against epoch-pinned snapshots and never block the writer.
//!
//! Insertion is also available split in two: `prepare_add_document` runs the
//! expensive candidate search against a point-in-time view without touching
//! the write path; `complete_add_document` re-validates the proposal against
//! the live graph and installs links under the writer lock. The prepared
//! value carries a generation guard so node ids freed in between cannot be
//! recycled under it.

use crate::distance::Distance;
use crate::filter::GlobalFilter;
use crate::graph::{CompactStrategy, GraphStore};
use crate::idmap::IdMapping;
use crate::levelgen::{GeometricLevelGenerator, LevelGenerator};
use crate::persist;
use crate::reclaim::{GenerationGuard, GenerationHandler};
use crate::search::{greedy_search, search_layer, Candidate, NodeScorer, SearchHit};
use crate::select::{connect_new_node, remove_node_links, select_neighbors};
use crate::types::{DocId, EntryPoint, HnswConfig, IndexStats, NodeId};
use crate::vectors::{DocVectors, NodeVectors};
use ahash::AHashMap;
use crossbeam_epoch::{self as epoch, Guard};
use parking_lot::Mutex;
use rayon::prelude::*;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, trace};

/// Per-subspace insertion proposal: chosen level plus candidate neighbors
/// per layer, computed without mutating the graph.
struct PlannedEntry {
    subspace: u32,
    level: usize,
    /// `layers[l]` = candidates at level `l`; empty when planned against an
    /// empty graph.
    layers: Vec<Vec<Candidate>>,
}

/// Not-yet-committed insertion returned by
/// [`HnswIndex::prepare_add_document`]. Consumed exactly once by
/// [`HnswIndex::complete_add_document`].
pub struct PreparedAdd<'a> {
    docid: DocId,
    entries: Vec<PlannedEntry>,
    _guard: GenerationGuard<'a>,
}

pub struct HnswIndex<D: Distance, V: DocVectors> {
    cfg: HnswConfig,
    vectors: Arc<V>,
    graph: GraphStore,
    idmap: IdMapping,
    generations: GenerationHandler,
    level_generator: Box<dyn LevelGenerator>,
    write_lock: Mutex<()>,
    _metric: PhantomData<D>,
}

impl<D: Distance, V: DocVectors> HnswIndex<D, V> {
    /// Identity id mapping (one vector per document) and the default
    /// geometric level generator.
    pub fn new(cfg: HnswConfig, vectors: Arc<V>) -> Self {
        let level_generator = Box::new(GeometricLevelGenerator::new(cfg.max_links_on_inserts));
        Self::with_parts(cfg, vectors, IdMapping::identity(), level_generator)
    }

    pub fn with_parts(
        cfg: HnswConfig,
        vectors: Arc<V>,
        idmap: IdMapping,
        level_generator: Box<dyn LevelGenerator>,
    ) -> Self {
        Self {
            cfg,
            vectors,
            graph: GraphStore::new(),
            idmap,
            generations: GenerationHandler::new(),
            level_generator,
            write_lock: Mutex::new(()),
            _metric: PhantomData,
        }
    }

    pub fn config(&self) -> &HnswConfig {
        &self.cfg
    }

    fn node_vectors(&self) -> NodeVectors<'_, V> {
        NodeVectors::new(self.vectors.as_ref(), &self.idmap)
    }

    // ---- insertion ----

    /// Index every vector subspace of a document. A document with no vectors
    /// contributes nothing.
    pub fn add_document(&self, docid: DocId) {
        let _writer = self.write_lock.lock();
        let guard = epoch::pin();
        let subspaces = self.vectors.subspace_count(docid);
        let ids = self.idmap.add_document(docid, subspaces);
        if ids.is_empty() {
            return;
        }
        for (subspace, &id) in ids.iter().enumerate() {
            let level = self.level_generator.max_level();
            let query = self.vectors.cells(docid, subspace);
            let layers = self.plan_layers(query, level, &guard);
            let planned = PlannedEntry {
                subspace: subspace as u32,
                level,
                layers,
            };
            self.apply_entry(id, docid, planned, &guard);
        }
        self.commit(&guard);
    }

    /// Phase one of a two-phase insert: pick levels and candidate neighbors
    /// against the current snapshot, without mutating anything. May run
    /// concurrently with other mutations.
    pub fn prepare_add_document(&self, docid: DocId) -> PreparedAdd<'_> {
        let gen_guard = self.generations.take_guard();
        let guard = epoch::pin();
        let subspaces = self.vectors.subspace_count(docid);
        let mut entries = Vec::with_capacity(subspaces);
        for subspace in 0..subspaces {
            let level = self.level_generator.max_level();
            let query = self.vectors.cells(docid, subspace);
            let layers = self.plan_layers(query, level, &guard);
            entries.push(PlannedEntry {
                subspace: subspace as u32,
                level,
                layers,
            });
        }
        PreparedAdd {
            docid,
            entries,
            _guard: gen_guard,
        }
    }

    /// Phase two: re-validate the proposal against the live graph (nodes
    /// removed or restructured since the prepare are dropped) and install
    /// the links.
    pub fn complete_add_document(&self, prepared: PreparedAdd<'_>) {
        let PreparedAdd {
            docid,
            entries,
            _guard: gen_guard,
        } = prepared;
        let _writer = self.write_lock.lock();
        let guard = epoch::pin();
        let ids = self.idmap.add_document(docid, entries.len());
        for (planned, &id) in entries.into_iter().zip(ids.iter()) {
            self.apply_entry(id, docid, planned, &guard);
        }
        // Release the generation pin before reclaiming, or the commit could
        // never recycle ids freed while this insert was in flight.
        drop(gen_guard);
        if !ids.is_empty() {
            self.commit(&guard);
        }
    }

    /// Greedy-descend from the entry point, then collect candidate neighbor
    /// sets per level from `min(level, entry.level)` down to 0.
    fn plan_layers(&self, query: &[f32], level: usize, guard: &Guard) -> Vec<Vec<Candidate>> {
        let entry = self.graph.entry_point(guard);
        if !entry.is_valid() {
            return Vec::new();
        }
        let scorer = NodeScorer::<D, V>::new(query, self.node_vectors());
        let mut current = Candidate {
            id: entry.node,
            dist: scorer.dist_to(entry.node),
        };
        let target = level.min(entry.level as usize);
        for l in ((target + 1)..=(entry.level as usize)).rev() {
            current = greedy_search(&self.graph, &scorer, current, l, guard);
        }
        let mut layers: Vec<Vec<Candidate>> = Vec::with_capacity(target + 1);
        for l in (0..=target).rev() {
            let found = search_layer(
                &self.graph,
                &scorer,
                current,
                self.cfg.neighbors_to_explore,
                l,
                None,
                None,
                guard,
            );
            if let Some(best) = found.first() {
                current = *best;
            }
            layers.push(found);
        }
        layers.reverse();
        layers
    }

    fn apply_entry(&self, id: NodeId, docid: DocId, planned: PlannedEntry, guard: &Guard) {
        self.graph.make_node(id, planned.level + 1);
        let entry = self.graph.entry_point(guard);
        if !entry.is_valid() {
            self.graph.set_entry_point(
                EntryPoint {
                    node: id,
                    level: planned.level as i32,
                },
                guard,
            );
            debug!(node = id, level = planned.level, "installed first entry point");
            return;
        }

        let mut layers = planned.layers;
        if layers.is_empty() {
            // Planned against an empty graph that has since gained nodes.
            let query = self.vectors.cells(docid, planned.subspace as usize);
            layers = self.plan_layers(query, planned.level, guard);
        }

        let nodes = self.node_vectors();
        let target = planned.level.min(entry.level as usize);
        for level in (0..=target).rev() {
            let Some(candidates) = layers.get(level) else {
                continue;
            };
            let mut valid: Vec<Candidate> = candidates
                .iter()
                .filter(|c| c.id != id && self.graph.level_count(c.id) > level)
                .copied()
                .collect();
            let selected = select_neighbors::<D, V>(
                &nodes,
                &mut valid,
                self.cfg.max_links_on_inserts,
                self.cfg.heuristic_select,
            );
            connect_new_node::<D, V>(&self.graph, &nodes, &self.cfg, id, level, &selected, guard);
        }

        if planned.level as i32 > entry.level {
            self.graph.set_entry_point(
                EntryPoint {
                    node: id,
                    level: planned.level as i32,
                },
                guard,
            );
            debug!(node = id, level = planned.level, "entry point promoted");
        }
    }

    // ---- removal ----

    /// Remove every node of a document, repairing links around each. Removing
    /// an absent document is a no-op.
    pub fn remove_document(&self, docid: DocId) {
        let _writer = self.write_lock.lock();
        let guard = epoch::pin();
        let ids = self.idmap.get_ids(docid);
        let mut removed = false;
        for &id in ids.iter() {
            if self.graph.level_count(id) == 0 {
                continue;
            }
            let nodes = self.node_vectors();
            remove_node_links::<D, V>(&self.graph, &nodes, &self.cfg, id, &guard);
            let entry = self.graph.entry_point(&guard);
            self.graph.remove_node(id, &guard);
            if entry.node == id {
                let next = self.graph.highest_node(id);
                self.graph.set_entry_point(next, &guard);
                debug!(
                    removed = id,
                    new_entry = next.node,
                    new_level = next.level,
                    "entry point replaced after removal"
                );
            }
            removed = true;
        }
        self.idmap
            .remove_document(docid, self.generations.current_generation());
        if removed {
            self.commit(&guard);
        }
    }

    // ---- search ----

    /// Approximate k nearest neighbors of a query vector, ascending by
    /// distance, one hit per document.
    pub fn find_top_k(&self, query: &[f32], k: usize, explore_k: usize) -> Vec<SearchHit> {
        let _gen = self.generations.take_guard();
        let guard = epoch::pin();
        self.search_internal(query, k, explore_k, None, &guard)
    }

    /// Filtered variant. Sparse filters are answered by scoring the admitted
    /// documents directly; otherwise the graph is traversed with filtered
    /// result admission.
    pub fn find_top_k_with_filter(
        &self,
        query: &[f32],
        k: usize,
        explore_k: usize,
        filter: &dyn GlobalFilter,
    ) -> Vec<SearchHit> {
        let _gen = self.generations.take_guard();
        let guard = epoch::pin();
        if !filter.is_active() {
            return self.search_internal(query, k, explore_k, None, &guard);
        }
        let valid = self.graph.valid_node_count() as u64;
        if filter.count().saturating_mul(10) < valid {
            return self.exact_filtered_scan(query, k, filter);
        }
        self.search_internal(query, k, explore_k, Some(filter), &guard)
    }

    /// Top-k around an already-indexed document's vectors.
    pub fn find_top_k_for_document(
        &self,
        docid: DocId,
        k: usize,
        explore_k: usize,
    ) -> Vec<SearchHit> {
        let _gen = self.generations.take_guard();
        let guard = epoch::pin();
        let mut best: AHashMap<DocId, f32> = AHashMap::new();
        for subspace in 0..self.vectors.subspace_count(docid) {
            let query = self.vectors.cells(docid, subspace);
            for hit in self.search_internal(query, k, explore_k, None, &guard) {
                best.entry(hit.docid)
                    .and_modify(|d| {
                        if hit.dist < *d {
                            *d = hit.dist;
                        }
                    })
                    .or_insert(hit.dist);
            }
        }
        let mut hits: Vec<SearchHit> = best
            .into_iter()
            .map(|(docid, dist)| SearchHit { docid, dist })
            .collect();
        hits.sort_unstable_by(|a, b| a.dist.total_cmp(&b.dist).then_with(|| a.docid.cmp(&b.docid)));
        hits.truncate(k);
        hits
    }

    fn search_internal(
        &self,
        query: &[f32],
        k: usize,
        explore_k: usize,
        filter: Option<&dyn GlobalFilter>,
        guard: &Guard,
    ) -> Vec<SearchHit> {
        let entry = self.graph.entry_point(guard);
        if !entry.is_valid() || k == 0 {
            return Vec::new();
        }
        let scorer = NodeScorer::<D, V>::new(query, self.node_vectors());
        let mut current = Candidate {
            id: entry.node,
            dist: scorer.dist_to(entry.node),
        };
        for level in (1..=entry.level as usize).rev() {
            current = greedy_search(&self.graph, &scorer, current, level, guard);
        }
        let found = search_layer(
            &self.graph,
            &scorer,
            current,
            explore_k.max(k),
            0,
            filter,
            self.cfg.distance_threshold,
            guard,
        );
        self.collapse_to_docs(found, k)
    }

    /// Exact scan over a sparse filter's documents; cheaper than graph
    /// traversal when few documents pass.
    fn exact_filtered_scan(&self, query: &[f32], k: usize, filter: &dyn GlobalFilter) -> Vec<SearchHit> {
        let docs = filter.doc_ids();
        let mut hits: Vec<SearchHit> = docs
            .par_iter()
            .filter_map(|&docid| {
                let mut best: Option<f32> = None;
                for &id in self.idmap.get_ids(docid).iter() {
                    if self.graph.level_count(id) == 0 {
                        continue;
                    }
                    let (doc, subspace) = self.idmap.node_to_doc(id);
                    let dist = D::eval(query, self.vectors.cells(doc, subspace as usize));
                    if best.map_or(true, |b| dist < b) {
                        best = Some(dist);
                    }
                }
                let dist = best?;
                if let Some(limit) = self.cfg.distance_threshold {
                    if dist > limit {
                        return None;
                    }
                }
                Some(SearchHit { docid, dist })
            })
            .collect();
        hits.sort_unstable_by(|a, b| a.dist.total_cmp(&b.dist).then_with(|| a.docid.cmp(&b.docid)));
        hits.truncate(k);
        hits
    }

    /// Collapse node-level hits to one per document, keeping the closest.
    fn collapse_to_docs(&self, found: Vec<Candidate>, k: usize) -> Vec<SearchHit> {
        let mut best: AHashMap<DocId, f32> = AHashMap::new();
        for candidate in found {
            let docid = self.idmap.node_to_doc(candidate.id).0;
            best.entry(docid)
                .and_modify(|d| {
                    if candidate.dist < *d {
                        *d = candidate.dist;
                    }
                })
                .or_insert(candidate.dist);
        }
        let mut hits: Vec<SearchHit> = best
            .into_iter()
            .map(|(docid, dist)| SearchHit { docid, dist })
            .collect();
        hits.sort_unstable_by(|a, b| a.dist.total_cmp(&b.dist).then_with(|| a.docid.cmp(&b.docid)));
        hits.truncate(k);
        hits
    }

    // ---- maintenance, observability, persistence ----

    /// Bump the generation, recycle ids no guard can still observe, and prod
    /// the epoch collector. Runs after every mutation batch.
    fn commit(&self, guard: &Guard) {
        let generation = self.generations.bump();
        let oldest = self.generations.oldest_used_generation();
        self.idmap.reclaim(oldest);
        guard.flush();
        trace!(generation, oldest, "committed mutation batch");
    }

    /// Compact link arrays when fragmentation crosses the strategy's
    /// thresholds. Returns whether compaction ran.
    pub fn consider_compact(&self, strategy: &CompactStrategy) -> bool {
        let _writer = self.write_lock.lock();
        let guard = epoch::pin();
        let compacted = self.graph.consider_compact(strategy, &guard);
        if compacted {
            self.commit(&guard);
        }
        compacted
    }

    /// True when every link is reciprocated at the same level.
    pub fn check_link_symmetry(&self) -> bool {
        let guard = epoch::pin();
        self.graph.check_link_symmetry(&guard)
    }

    /// Snapshot of one level's links of a node (empty if absent).
    pub fn links_at(&self, node: NodeId, level: usize) -> Vec<NodeId> {
        let guard = epoch::pin();
        self.graph
            .get_link_array(node, level, &guard)
            .map(|links| links.to_vec())
            .unwrap_or_default()
    }

    /// Number of levels a node participates in; 0 means not present.
    pub fn level_count(&self, node: NodeId) -> usize {
        self.graph.level_count(node)
    }

    pub fn entry_point(&self) -> EntryPoint {
        let guard = epoch::pin();
        self.graph.entry_point(&guard)
    }

    pub fn stats(&self) -> IndexStats {
        let guard = epoch::pin();
        let entry = self.graph.entry_point(&guard);
        let graph = self.graph.collect_stats(&guard);
        IndexStats {
            node_limit: graph.node_limit,
            valid_nodes: graph.valid_nodes,
            entry_node: entry.node,
            entry_level: entry.level,
            level_histogram: graph.level_histogram,
            link_histogram: graph.link_histogram,
            unreachable_nodes: graph.unreachable_nodes,
            memory_on_hold: graph.memory_on_hold,
        }
    }

    /// Serialize the raw graph (levels, links, entry point, id mapping) to an
    /// opaque image. Loading it reproduces the identical link structure.
    pub fn save(&self) -> Vec<u8> {
        let _writer = self.write_lock.lock();
        let guard = epoch::pin();
        persist::save(&self.graph, &self.idmap, &guard)
    }

    /// Reconstruct an index from a saved image.
    pub fn load(
        cfg: HnswConfig,
        vectors: Arc<V>,
        level_generator: Box<dyn LevelGenerator>,
        bytes: &[u8],
    ) -> std::io::Result<Self> {
        let image = persist::decode(bytes)?;
        let idmap = IdMapping::from_image(image.mapping);
        let index = Self::with_parts(cfg, vectors, idmap, level_generator);
        let guard = epoch::pin();
        persist::restore_graph(&index.graph, &image.graph, &guard);
        Ok(index)
    }
}
