//! Top-k search quality, filtered search and degenerate inputs.
//!
//! Run with:
//! cargo test --test h5_search -- --nocapture

use dekat::{
    BitmapFilter, DenseVectors, FixedLevelGenerator, HnswConfig, HnswIndex, IdMapping,
    L2Distance,
};
use std::sync::Arc;

const POINTS: [(u32, [f32; 2]); 7] = [
    (1, [2.0, 2.0]),
    (2, [3.0, 2.0]),
    (3, [2.0, 3.0]),
    (4, [1.0, 2.0]),
    (5, [8.0, 3.0]),
    (6, [7.0, 2.0]),
    (7, [3.0, 5.0]),
];

fn config() -> HnswConfig {
    HnswConfig {
        max_links_at_level_0: 5,
        max_links_on_inserts: 2,
        neighbors_to_explore: 10,
        distance_threshold: None,
        heuristic_select: false,
    }
}

fn setup_2d() -> HnswIndex<L2Distance, DenseVectors> {
    let vectors = Arc::new(DenseVectors::new());
    for (doc, point) in POINTS {
        vectors.set_document(doc, vec![point.to_vec()]);
    }
    let index = HnswIndex::with_parts(
        config(),
        vectors,
        IdMapping::identity(),
        Box::new(FixedLevelGenerator(0)),
    );
    for (doc, _) in POINTS {
        index.add_document(doc);
    }
    index
}

fn brute_force(query: [f32; 2], k: usize) -> Vec<(u32, f32)> {
    let mut all: Vec<(u32, f32)> = POINTS
        .iter()
        .map(|&(doc, p)| {
            let dist = (p[0] - query[0]).powi(2) + (p[1] - query[1]).powi(2);
            (doc, dist)
        })
        .collect();
    all.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    all.truncate(k);
    all
}

mod tc_top_k {
    use super::*;

    #[test]
    fn test_matches_brute_force_on_worked_example() {
        let index = setup_2d();
        for query in [[2.2, 2.2], [7.5, 2.5], [0.0, 0.0], [3.0, 4.0]] {
            let expected = brute_force(query, 3);
            let hits = index.find_top_k(&query, 3, 10);
            let got: Vec<(u32, f32)> = hits.iter().map(|h| (h.docid, h.dist)).collect();
            assert_eq!(got, expected, "query {:?}", query);
        }
    }

    #[test]
    fn test_kth_distance_within_slack() {
        let index = setup_2d();
        let query = [4.0, 3.0];
        let k = 4;
        let exact_kth = brute_force(query, k)[k - 1].1;
        let hits = index.find_top_k(&query, k, 10);
        assert_eq!(hits.len(), k);
        assert!(
            hits[k - 1].dist <= exact_kth * 1.05,
            "approximate kth {} vs exact kth {}",
            hits[k - 1].dist,
            exact_kth
        );
    }

    #[test]
    fn test_empty_graph_returns_nothing() {
        let vectors = Arc::new(DenseVectors::new());
        let index: HnswIndex<L2Distance, _> = HnswIndex::with_parts(
            config(),
            vectors,
            IdMapping::identity(),
            Box::new(FixedLevelGenerator(0)),
        );
        assert!(index.find_top_k(&[0.0, 0.0], 5, 10).is_empty());
    }

    #[test]
    fn test_distance_threshold_bounds_results() {
        let vectors = Arc::new(DenseVectors::new());
        for (doc, point) in POINTS {
            vectors.set_document(doc, vec![point.to_vec()]);
        }
        let mut cfg = config();
        cfg.distance_threshold = Some(3.0);
        let index: HnswIndex<L2Distance, _> = HnswIndex::with_parts(
            cfg,
            vectors,
            IdMapping::identity(),
            Box::new(FixedLevelGenerator(0)),
        );
        for (doc, _) in POINTS {
            index.add_document(doc);
        }

        // Around (2,2): only 1, 2, 3, 4 are within squared distance 3.
        let hits = index.find_top_k(&[2.0, 2.0], 10, 10);
        let docids: Vec<u32> = hits.iter().map(|h| h.docid).collect();
        assert_eq!(docids, vec![1, 2, 3, 4]);
        assert!(hits.iter().all(|h| h.dist <= 3.0));
    }
}

mod tc_filtered {
    use super::*;

    #[test]
    fn test_graph_traversal_with_filter() {
        let index = setup_2d();
        // Dense enough that the graph path is taken (7 valid nodes,
        // 3 admitted: 30 >= 7).
        let filter = BitmapFilter::from_docs([4, 6, 7], 8);
        let hits = index.find_top_k_with_filter(&[2.0, 2.0], 10, 10, &filter);
        let docids: Vec<u32> = hits.iter().map(|h| h.docid).collect();
        assert_eq!(docids, vec![4, 7, 6]);
        assert!(hits.windows(2).all(|w| w[0].dist <= w[1].dist));
    }

    #[test]
    fn test_sparse_filter_takes_exact_scan() {
        // 30 documents on a line; a 2-document filter is sparse enough for
        // the direct scan fallback.
        let vectors = Arc::new(DenseVectors::new());
        for doc in 0..30u32 {
            vectors.set_document(doc, vec![vec![doc as f32, 0.0]]);
        }
        let index: HnswIndex<L2Distance, _> = HnswIndex::with_parts(
            HnswConfig::new(4),
            vectors,
            IdMapping::identity(),
            Box::new(FixedLevelGenerator(0)),
        );
        for doc in 0..30u32 {
            index.add_document(doc);
        }

        let filter = BitmapFilter::from_docs([3, 17], 30);
        let hits = index.find_top_k_with_filter(&[5.0, 0.0], 5, 10, &filter);
        let got: Vec<(u32, f32)> = hits.iter().map(|h| (h.docid, h.dist)).collect();
        assert_eq!(got, vec![(3, 4.0), (17, 144.0)]);
    }

    #[test]
    fn test_filter_admitting_nothing_yields_empty() {
        let index = setup_2d();
        let filter = BitmapFilter::from_docs([], 8);
        assert!(index
            .find_top_k_with_filter(&[2.0, 2.0], 5, 10, &filter)
            .is_empty());
    }

    #[test]
    fn test_filtered_docs_absent_from_results_only() {
        let index = setup_2d();
        // 5 and 6 are the far cluster; filtering to them forces traversal
        // across the near cluster without returning it.
        let filter = BitmapFilter::from_docs([1, 2, 3, 5, 6], 8);
        let hits = index.find_top_k_with_filter(&[8.0, 3.0], 2, 10, &filter);
        let docids: Vec<u32> = hits.iter().map(|h| h.docid).collect();
        assert_eq!(docids, vec![5, 6]);
    }
}
