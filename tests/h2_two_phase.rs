//! Two-phase insertion: prepare runs the candidate search read-only,
//! complete re-validates against the live graph and installs links.
//!
//! Run with:
//! cargo test --test h2_two_phase -- --nocapture

use dekat::{
    DenseVectors, FixedLevelGenerator, HnswConfig, HnswIndex, IdMapping, L2Distance,
};
use std::sync::Arc;

fn reference_config() -> HnswConfig {
    HnswConfig {
        max_links_at_level_0: 5,
        max_links_on_inserts: 2,
        neighbors_to_explore: 10,
        distance_threshold: None,
        heuristic_select: false,
    }
}

fn setup_identity(points: &[(u32, [f32; 2])]) -> HnswIndex<L2Distance, DenseVectors> {
    let vectors = Arc::new(DenseVectors::new());
    for &(doc, point) in points {
        vectors.set_document(doc, vec![point.to_vec()]);
    }
    HnswIndex::with_parts(
        reference_config(),
        vectors,
        IdMapping::identity(),
        Box::new(FixedLevelGenerator(0)),
    )
}

const BASE: [(u32, [f32; 2]); 6] = [
    (1, [2.0, 2.0]),
    (2, [3.0, 2.0]),
    (3, [2.0, 3.0]),
    (4, [1.0, 2.0]),
    (5, [8.0, 3.0]),
    (6, [7.0, 2.0]),
];

mod tc_prepared_neighbor_removed {
    use super::*;

    #[test]
    fn test_completed_add_drops_concurrently_removed_neighbor() {
        let mut points = BASE.to_vec();
        points.push((7, [8.0, 4.0])); // right next to node 5
        let index = setup_identity(&points);
        for &(doc, _) in BASE.iter() {
            index.add_document(doc);
        }

        let prepared = index.prepare_add_document(7);
        // Node 5 goes away between the two phases.
        index.remove_document(5);
        index.complete_add_document(prepared);

        let links = index.links_at(7, 0);
        assert!(
            !links.contains(&5),
            "removed node 5 leaked into the completed add: {:?}",
            links
        );
        assert!(links.contains(&6), "surviving nearest neighbor missing");
        assert!(index.check_link_symmetry());
        assert_eq!(index.level_count(5), 0);
    }
}

mod tc_two_phase_equivalence {
    use super::*;

    #[test]
    fn test_prepare_complete_matches_single_phase() {
        let mut points = BASE.to_vec();
        points.push((7, [3.0, 5.0]));

        let single = setup_identity(&points);
        let split = setup_identity(&points);
        for &(doc, _) in BASE.iter() {
            single.add_document(doc);
            split.add_document(doc);
        }

        single.add_document(7);
        let prepared = split.prepare_add_document(7);
        split.complete_add_document(prepared);

        let mut a = single.links_at(7, 0);
        let mut b = split.links_at(7, 0);
        a.sort_unstable();
        b.sort_unstable();
        assert_eq!(a, b);
        assert!(split.check_link_symmetry());
    }

    #[test]
    fn test_prepare_against_empty_graph_still_links() {
        let points = [(1, [0.0, 0.0]), (2, [1.0, 0.0])];
        let index = setup_identity(&points);

        // Planned against nothing; by completion the graph has a node.
        let prepared = index.prepare_add_document(2);
        index.add_document(1);
        index.complete_add_document(prepared);

        assert_eq!(index.links_at(2, 0), vec![1]);
        assert_eq!(index.links_at(1, 0), vec![2]);
        assert!(index.check_link_symmetry());
    }
}

mod tc_generation_gating {
    use super::*;

    fn setup_allocating(points: &[(u32, [f32; 2])]) -> HnswIndex<L2Distance, DenseVectors> {
        let vectors = Arc::new(DenseVectors::new());
        for &(doc, point) in points {
            vectors.set_document(doc, vec![point.to_vec()]);
        }
        HnswIndex::with_parts(
            reference_config(),
            vectors,
            IdMapping::allocating(),
            Box::new(FixedLevelGenerator(0)),
        )
    }

    #[test]
    fn test_freed_id_not_recycled_under_prepared_guard() {
        let index = setup_allocating(&[
            (10, [0.0, 0.0]),
            (11, [1.0, 0.0]),
            (12, [2.0, 0.0]),
            (13, [3.0, 0.0]),
            (15, [4.0, 0.0]),
        ]);
        index.add_document(10); // node 0
        index.add_document(11); // node 1
        assert_eq!(index.stats().node_limit, 2);

        let prepared = index.prepare_add_document(15);
        index.remove_document(10); // parks node 0 under the live guard

        index.add_document(12);
        // The parked id must not come back while the prepared guard lives.
        assert_eq!(index.stats().node_limit, 3);

        index.complete_add_document(prepared); // drops the guard, commits
        assert_eq!(index.stats().node_limit, 4);

        // Guard gone and a commit has passed: node id 0 is reusable now.
        index.add_document(13);
        let stats = index.stats();
        assert_eq!(stats.node_limit, 4, "expected reuse of the freed node id");
        assert_eq!(stats.valid_nodes, 4);
        assert!(index.check_link_symmetry());
    }
}
