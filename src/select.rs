//! Neighbor selection and link maintenance.
//!
//! Selection decides which candidates become bidirectional links at a level;
//! maintenance keeps every link reciprocated when arrays overflow or a node
//! is removed. Two policies:
//! - simple: take the closest candidates, capacity permitting;
//! - heuristic: admit a candidate only if it is closer to the target than to
//!   every already-admitted neighbor, which spreads links out and keeps the
//!   graph navigable with fewer edges.

use crate::distance::Distance;
use crate::graph::GraphStore;
use crate::search::Candidate;
use crate::types::{HnswConfig, NodeId};
use crate::vectors::{DocVectors, NodeVectors};
use crossbeam_epoch::Guard;
use smallvec::SmallVec;
use tracing::trace;

/// Pick at most `m` neighbors out of `candidates` (sorted in place).
pub(crate) fn select_neighbors<D: Distance, V: DocVectors>(
    nodes: &NodeVectors<'_, V>,
    candidates: &mut Vec<Candidate>,
    m: usize,
    heuristic: bool,
) -> Vec<Candidate> {
    candidates.sort_unstable_by(|a, b| a.dist.total_cmp(&b.dist).then_with(|| a.id.cmp(&b.id)));
    if !heuristic || candidates.len() <= m {
        return candidates.iter().take(m).copied().collect();
    }

    let mut kept: Vec<Candidate> = Vec::with_capacity(m);
    for &candidate in candidates.iter() {
        if kept.len() >= m {
            break;
        }
        let cells = nodes.cells(candidate.id);
        let diverse = kept
            .iter()
            .all(|k| D::eval(cells, nodes.cells(k.id)) >= candidate.dist);
        if diverse {
            kept.push(candidate);
        }
    }
    kept
}

/// Install bidirectional links between a freshly created node and its
/// selected neighbors at one level. Overflowing neighbors are re-selected
/// and evicted links removed symmetrically.
pub(crate) fn connect_new_node<D: Distance, V: DocVectors>(
    graph: &GraphStore,
    nodes: &NodeVectors<'_, V>,
    cfg: &HnswConfig,
    new_id: NodeId,
    level: usize,
    selected: &[Candidate],
    guard: &Guard,
) {
    let links: SmallVec<[NodeId; 8]> = selected.iter().map(|c| c.id).collect();
    graph.set_link_array(new_id, level, links, guard);

    let cap = cfg.max_links_for_level(level);
    for neighbor in selected {
        let mut updated: SmallVec<[NodeId; 8]> = graph
            .get_link_array(neighbor.id, level, guard)
            .map(SmallVec::from_slice)
            .unwrap_or_default();
        if updated.contains(&new_id) {
            continue;
        }
        updated.push(new_id);
        if updated.len() > cap {
            shrink_links::<D, V>(graph, nodes, cfg, neighbor.id, level, updated, guard);
        } else {
            graph.set_link_array(neighbor.id, level, updated, guard);
        }
    }
}

/// Re-run the selection policy over an overflowing link set and keep the
/// winners; evicted links lose their reciprocal edge too.
pub(crate) fn shrink_links<D: Distance, V: DocVectors>(
    graph: &GraphStore,
    nodes: &NodeVectors<'_, V>,
    cfg: &HnswConfig,
    id: NodeId,
    level: usize,
    links: SmallVec<[NodeId; 8]>,
    guard: &Guard,
) {
    let cap = cfg.max_links_for_level(level);
    let own = nodes.cells(id);
    let mut candidates: Vec<Candidate> = links
        .iter()
        .map(|&link| Candidate {
            id: link,
            dist: D::eval(own, nodes.cells(link)),
        })
        .collect();
    let kept = select_neighbors::<D, V>(nodes, &mut candidates, cap, cfg.heuristic_select);
    let kept_ids: SmallVec<[NodeId; 8]> = kept.iter().map(|c| c.id).collect();
    for &link in links.iter() {
        if !kept_ids.contains(&link) {
            remove_link_from(graph, link, level, id, guard);
        }
    }
    graph.set_link_array(id, level, kept_ids, guard);
}

/// Drop `target` from `id`'s link array at `level`, if present.
pub(crate) fn remove_link_from(
    graph: &GraphStore,
    id: NodeId,
    level: usize,
    target: NodeId,
    guard: &Guard,
) {
    if let Some(current) = graph.get_link_array(id, level, guard) {
        if current.contains(&target) {
            let updated: SmallVec<[NodeId; 8]> = current
                .iter()
                .copied()
                .filter(|&link| link != target)
                .collect();
            graph.set_link_array(id, level, updated, guard);
        }
    }
}

fn add_link(graph: &GraphStore, id: NodeId, level: usize, target: NodeId, guard: &Guard) {
    let mut updated: SmallVec<[NodeId; 8]> = graph
        .get_link_array(id, level, guard)
        .map(SmallVec::from_slice)
        .unwrap_or_default();
    if !updated.contains(&target) {
        updated.push(target);
        graph.set_link_array(id, level, updated, guard);
    }
}

/// Unlink a node everywhere before removal, then reconnect its former
/// neighbors to each other, best effort: closest pairs first, capacity
/// (and diversity, when configured) permitting.
pub(crate) fn remove_node_links<D: Distance, V: DocVectors>(
    graph: &GraphStore,
    nodes: &NodeVectors<'_, V>,
    cfg: &HnswConfig,
    id: NodeId,
    guard: &Guard,
) {
    let height = graph.level_count(id);
    for level in 0..height {
        let former: Vec<NodeId> = graph
            .get_link_array(id, level, guard)
            .map(|links| links.to_vec())
            .unwrap_or_default();
        for &neighbor in &former {
            remove_link_from(graph, neighbor, level, id, guard);
        }

        let cap = cfg.max_links_for_level(level);
        for &neighbor in &former {
            let existing: SmallVec<[NodeId; 8]> = graph
                .get_link_array(neighbor, level, guard)
                .map(SmallVec::from_slice)
                .unwrap_or_default();
            if existing.len() >= cap {
                continue;
            }
            let own = nodes.cells(neighbor);
            let mut candidates: Vec<Candidate> = former
                .iter()
                .filter(|&&other| other != neighbor && !existing.contains(&other))
                .map(|&other| Candidate {
                    id: other,
                    dist: D::eval(own, nodes.cells(other)),
                })
                .collect();
            candidates.sort_unstable_by(|a, b| {
                a.dist.total_cmp(&b.dist).then_with(|| a.id.cmp(&b.id))
            });

            for candidate in candidates {
                let current: SmallVec<[NodeId; 8]> = graph
                    .get_link_array(neighbor, level, guard)
                    .map(SmallVec::from_slice)
                    .unwrap_or_default();
                if current.len() >= cap {
                    break;
                }
                if current.contains(&candidate.id) {
                    continue;
                }
                let other_len = graph
                    .get_link_array(candidate.id, level, guard)
                    .map(|links| links.len())
                    .unwrap_or(cap);
                if other_len >= cap {
                    continue;
                }
                if cfg.heuristic_select {
                    let cells = nodes.cells(candidate.id);
                    let diverse = current
                        .iter()
                        .all(|&link| D::eval(cells, nodes.cells(link)) >= candidate.dist);
                    if !diverse {
                        continue;
                    }
                }
                add_link(graph, neighbor, level, candidate.id, guard);
                add_link(graph, candidate.id, level, neighbor, guard);
            }
        }
        trace!(node = id, level, neighbors = former.len(), "repaired links after removal");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::L2Distance;
    use crate::idmap::IdMapping;
    use crate::vectors::DenseVectors;
    use crossbeam_epoch as epoch;

    fn store_with(points: &[(u32, [f32; 2])]) -> (DenseVectors, IdMapping) {
        let vectors = DenseVectors::new();
        for &(doc, coords) in points {
            vectors.set_document(doc, vec![coords.to_vec()]);
        }
        (vectors, IdMapping::identity())
    }

    #[test]
    fn test_simple_selection_takes_closest() {
        let (vectors, idmap) = store_with(&[
            (0, [0.0, 0.0]),
            (1, [1.0, 0.0]),
            (2, [2.0, 0.0]),
            (3, [3.0, 0.0]),
        ]);
        let nodes = NodeVectors::new(&vectors, &idmap);
        let mut candidates = vec![
            Candidate { id: 3, dist: 9.0 },
            Candidate { id: 1, dist: 1.0 },
            Candidate { id: 2, dist: 4.0 },
        ];
        let kept = select_neighbors::<L2Distance, _>(&nodes, &mut candidates, 2, false);
        let ids: Vec<u32> = kept.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_heuristic_prefers_spread() {
        // 1 and 2 sit together; 3 is on the far side of the target 0.
        let (vectors, idmap) = store_with(&[
            (0, [0.0, 0.0]),
            (1, [1.0, 0.0]),
            (2, [1.2, 0.0]),
            (3, [-2.0, 0.0]),
        ]);
        let nodes = NodeVectors::new(&vectors, &idmap);
        let mut candidates = vec![
            Candidate { id: 1, dist: 1.0 },
            Candidate { id: 2, dist: 1.44 },
            Candidate { id: 3, dist: 4.0 },
        ];
        let kept = select_neighbors::<L2Distance, _>(&nodes, &mut candidates, 2, true);
        let ids: Vec<u32> = kept.iter().map(|c| c.id).collect();
        // 2 is closer to 1 (0.04) than to the target (1.44): rejected.
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_shrink_evicts_symmetrically() {
        let (vectors, idmap) = store_with(&[
            (0, [0.0, 0.0]),
            (1, [1.0, 0.0]),
            (2, [2.0, 0.0]),
            (3, [3.0, 0.0]),
        ]);
        let nodes = NodeVectors::new(&vectors, &idmap);
        let graph = GraphStore::new();
        let guard = epoch::pin();
        for id in 0..4u32 {
            graph.make_node(id, 1);
        }
        // 0 linked to everyone; everyone linked back.
        graph.set_link_array(0, 0, SmallVec::from_slice(&[1, 2, 3]), &guard);
        for id in 1..4u32 {
            graph.set_link_array(id, 0, SmallVec::from_slice(&[0]), &guard);
        }

        let cfg = HnswConfig {
            max_links_at_level_0: 2,
            max_links_on_inserts: 2,
            neighbors_to_explore: 10,
            distance_threshold: None,
            heuristic_select: false,
        };
        let links = SmallVec::from_slice(&[1, 2, 3]);
        shrink_links::<L2Distance, _>(&graph, &nodes, &cfg, 0, 0, links, &guard);

        assert_eq!(graph.get_link_array(0, 0, &guard).unwrap(), &[1, 2]);
        // Evicted node 3 lost its reciprocal link.
        assert_eq!(graph.get_link_array(3, 0, &guard).unwrap(), &[] as &[u32]);
        assert!(graph.check_link_symmetry(&guard));
    }
}
