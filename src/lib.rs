// Dekat v0.2.0 - Concurrent HNSW Vector Index
// Epoch-reclaimed link arrays, two-phase inserts, filtered top-k search

pub mod distance;
pub mod filter;
pub mod graph;
pub mod idmap;
pub mod index;
pub mod levelgen;
pub mod persist;
pub mod reclaim;
pub mod search;
pub mod select;
pub mod types;
pub mod vectors;

// Re-export main types
pub use distance::{CosineDistance, Distance, DotProduct, L2Distance};
pub use filter::{BitmapFilter, GlobalFilter};
pub use graph::CompactStrategy;
pub use idmap::IdMapping;
pub use index::{HnswIndex, PreparedAdd};
pub use levelgen::{FixedLevelGenerator, GeometricLevelGenerator, LevelGenerator, SequenceLevelGenerator};
pub use reclaim::{Generation, GenerationGuard, GenerationHandler};
pub use search::SearchHit;
pub use types::{DocId, EntryPoint, HnswConfig, IndexStats, NodeId, INVALID_NODEID};
pub use vectors::{DenseVectors, DocVectors};
