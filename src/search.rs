//! Greedy descent and bounded best-first layer search.

use crate::distance::Distance;
use crate::filter::GlobalFilter;
use crate::graph::GraphStore;
use crate::types::{DocId, NodeId};
use crate::vectors::{DocVectors, NodeVectors};
use ahash::AHashSet;
use crossbeam_epoch::Guard;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::marker::PhantomData;

/// Neighbor candidate for priority queues.
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    pub id: NodeId,
    pub dist: f32,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap<Candidate> pops the closest first
        other
            .dist
            .total_cmp(&self.dist)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Max-heap wrapper: BinaryHeap<ReverseCandidate> pops the farthest first.
#[derive(PartialEq, Eq)]
struct ReverseCandidate(Candidate);

impl PartialOrd for ReverseCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReverseCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .dist
            .total_cmp(&other.0.dist)
            .then_with(|| self.0.id.cmp(&other.0.id))
    }
}

/// A single search hit, ascending distance, one per document.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub docid: DocId,
    pub dist: f32,
}

/// Distance evaluator for one query vector, shared by search and selection.
pub(crate) struct NodeScorer<'a, D: Distance, V: DocVectors> {
    pub query: &'a [f32],
    pub nodes: NodeVectors<'a, V>,
    _metric: PhantomData<D>,
}

impl<'a, D: Distance, V: DocVectors> NodeScorer<'a, D, V> {
    pub fn new(query: &'a [f32], nodes: NodeVectors<'a, V>) -> Self {
        Self {
            query,
            nodes,
            _metric: PhantomData,
        }
    }

    #[inline]
    pub fn dist_to(&self, node: NodeId) -> f32 {
        D::eval(self.query, self.nodes.cells(node))
    }

    #[inline]
    pub fn docid_of(&self, node: NodeId) -> DocId {
        self.nodes.docid_of(node)
    }
}

/// Admission test for the result set; traversal itself is never filtered.
#[inline]
fn admit<D: Distance, V: DocVectors>(
    scorer: &NodeScorer<'_, D, V>,
    filter: Option<&dyn GlobalFilter>,
    threshold: Option<f32>,
    candidate: Candidate,
) -> bool {
    if let Some(limit) = threshold {
        if candidate.dist > limit {
            return false;
        }
    }
    match filter {
        Some(filter) => filter.check(scorer.docid_of(candidate.id)),
        None => true,
    }
}

/// Walk to the locally closest node at `level`. One closest-so-far pointer,
/// no backtracking.
pub(crate) fn greedy_search<D: Distance, V: DocVectors>(
    graph: &GraphStore,
    scorer: &NodeScorer<'_, D, V>,
    mut best: Candidate,
    level: usize,
    guard: &Guard,
) -> Candidate {
    loop {
        let mut improved = false;
        if let Some(links) = graph.get_link_array(best.id, level, guard) {
            for &neighbor in links {
                let dist = scorer.dist_to(neighbor);
                if dist < best.dist {
                    best = Candidate { id: neighbor, dist };
                    improved = true;
                }
            }
        }
        if !improved {
            return best;
        }
    }
}

/// Bounded best-first search at one level.
///
/// Keeps at most `ef` results; stops once the closest unexplored candidate is
/// farther than the worst kept result. Filtered nodes are traversed but not
/// kept, so a sparse filter cannot strand the search in a disconnected
/// pocket of admitted nodes.
pub(crate) fn search_layer<D: Distance, V: DocVectors>(
    graph: &GraphStore,
    scorer: &NodeScorer<'_, D, V>,
    entry: Candidate,
    ef: usize,
    level: usize,
    filter: Option<&dyn GlobalFilter>,
    threshold: Option<f32>,
    guard: &Guard,
) -> Vec<Candidate> {
    let mut visited: AHashSet<NodeId> = AHashSet::new();
    visited.insert(entry.id);

    let mut candidates: BinaryHeap<Candidate> = BinaryHeap::new();
    candidates.push(entry);

    let mut results: BinaryHeap<ReverseCandidate> = BinaryHeap::new();
    if admit(scorer, filter, threshold, entry) {
        results.push(ReverseCandidate(entry));
    }

    while let Some(current) = candidates.pop() {
        if results.len() >= ef {
            if let Some(worst) = results.peek() {
                if current.dist > worst.0.dist {
                    break;
                }
            }
        }

        if let Some(links) = graph.get_link_array(current.id, level, guard) {
            for &neighbor in links {
                if !visited.insert(neighbor) {
                    continue;
                }
                let dist = scorer.dist_to(neighbor);
                let within_bound = results.len() < ef
                    || results.peek().map_or(true, |worst| dist < worst.0.dist);
                if !within_bound {
                    continue;
                }
                let candidate = Candidate { id: neighbor, dist };
                candidates.push(candidate);
                if admit(scorer, filter, threshold, candidate) {
                    results.push(ReverseCandidate(candidate));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }
    }

    let mut out: Vec<Candidate> = results.into_iter().map(|r| r.0).collect();
    out.sort_unstable_by(|a, b| a.dist.total_cmp(&b.dist).then_with(|| a.id.cmp(&b.id)));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::L2Distance;
    use crate::idmap::IdMapping;
    use crate::vectors::DenseVectors;
    use crossbeam_epoch as epoch;
    use smallvec::smallvec;

    fn line_graph() -> (GraphStore, DenseVectors, IdMapping) {
        // Nodes 0..5 on a line at x = id; each linked to its neighbors.
        let graph = GraphStore::new();
        let vectors = DenseVectors::new();
        let guard = epoch::pin();
        for id in 0..5u32 {
            vectors.set_document(id, vec![vec![id as f32, 0.0]]);
            graph.make_node(id, 1);
        }
        for id in 0..5u32 {
            let mut links = smallvec![];
            if id > 0 {
                links.push(id - 1);
            }
            if id < 4 {
                links.push(id + 1);
            }
            graph.set_link_array(id, 0, links, &guard);
        }
        (graph, vectors, IdMapping::identity())
    }

    #[test]
    fn test_greedy_walks_to_local_minimum() {
        let (graph, vectors, idmap) = line_graph();
        let guard = epoch::pin();
        let query = [3.2f32, 0.0];
        let scorer =
            NodeScorer::<L2Distance, _>::new(&query, NodeVectors::new(&vectors, &idmap));
        let start = Candidate {
            id: 0,
            dist: scorer.dist_to(0),
        };
        let best = greedy_search(&graph, &scorer, start, 0, &guard);
        assert_eq!(best.id, 3);
    }

    #[test]
    fn test_search_layer_orders_by_distance() {
        let (graph, vectors, idmap) = line_graph();
        let guard = epoch::pin();
        let query = [2.1f32, 0.0];
        let scorer =
            NodeScorer::<L2Distance, _>::new(&query, NodeVectors::new(&vectors, &idmap));
        let entry = Candidate {
            id: 0,
            dist: scorer.dist_to(0),
        };
        let found = search_layer(&graph, &scorer, entry, 3, 0, None, None, &guard);
        let ids: Vec<u32> = found.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[test]
    fn test_filtered_nodes_are_traversed_not_returned() {
        let (graph, vectors, idmap) = line_graph();
        let guard = epoch::pin();
        let query = [4.0f32, 0.0];
        let scorer =
            NodeScorer::<L2Distance, _>::new(&query, NodeVectors::new(&vectors, &idmap));
        let entry = Candidate {
            id: 0,
            dist: scorer.dist_to(0),
        };
        // Only doc 4 passes; the walk still has to cross 1..3 to reach it.
        let filter = crate::filter::BitmapFilter::from_docs([4], 5);
        let found = search_layer(&graph, &scorer, entry, 10, 0, Some(&filter), None, &guard);
        let ids: Vec<u32> = found.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![4]);
    }

    #[test]
    fn test_distance_threshold_prunes_results() {
        let (graph, vectors, idmap) = line_graph();
        let guard = epoch::pin();
        let query = [0.0f32, 0.0];
        let scorer =
            NodeScorer::<L2Distance, _>::new(&query, NodeVectors::new(&vectors, &idmap));
        let entry = Candidate {
            id: 0,
            dist: scorer.dist_to(0),
        };
        let found = search_layer(&graph, &scorer, entry, 10, 0, None, Some(1.5), &guard);
        let ids: Vec<u32> = found.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![0, 1]);
    }
}
