/// External document identifier.
pub type DocId = u32;

/// Internal dense node identifier (one per indexed vector subspace).
pub type NodeId = u32;

/// Sentinel node id used when the graph has no entry point.
pub const INVALID_NODEID: NodeId = u32::MAX;

/// The single highest-level node of the hierarchy, where every search starts.
///
/// `(INVALID_NODEID, -1)` means the graph is empty.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EntryPoint {
    pub node: NodeId,
    pub level: i32,
}

impl EntryPoint {
    pub fn none() -> Self {
        Self {
            node: INVALID_NODEID,
            level: -1,
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.node != INVALID_NODEID
    }
}

/// Tuning knobs for graph construction and search.
#[derive(Clone, Debug)]
pub struct HnswConfig {
    /// Capacity of a level-0 link array. Conventionally `2 * max_links_on_inserts`.
    pub max_links_at_level_0: usize,
    /// Links handed to a new node per level at insert time; also the capacity
    /// of link arrays on levels above 0.
    pub max_links_on_inserts: usize,
    /// Beam width while searching for candidate neighbors during construction.
    pub neighbors_to_explore: usize,
    /// Candidates farther than this never enter a result set.
    pub distance_threshold: Option<f32>,
    /// Diversity-aware neighbor selection instead of closest-first.
    pub heuristic_select: bool,
}

impl HnswConfig {
    pub fn new(max_links: usize) -> Self {
        Self {
            max_links_at_level_0: 2 * max_links,
            max_links_on_inserts: max_links,
            neighbors_to_explore: 200,
            distance_threshold: None,
            heuristic_select: true,
        }
    }

    /// Link capacity of an array at `level`.
    #[inline]
    pub fn max_links_for_level(&self, level: usize) -> usize {
        if level == 0 {
            self.max_links_at_level_0
        } else {
            self.max_links_on_inserts
        }
    }
}

/// Structured dump of index state.
#[derive(Clone, Debug)]
pub struct IndexStats {
    /// Size of the node-id address space (highest allocated id + 1).
    pub node_limit: u32,
    /// Nodes currently live (at least one level).
    pub valid_nodes: usize,
    pub entry_node: NodeId,
    pub entry_level: i32,
    /// `level_histogram[h]` = live nodes whose top level is `h`.
    pub level_histogram: Vec<usize>,
    /// `link_histogram[n]` = live nodes with `n` level-0 links.
    pub link_histogram: Vec<usize>,
    /// Live nodes with an empty level-0 link array, excluding a sole entry point.
    pub unreachable_nodes: usize,
    /// Bytes retired from the graph but not yet reclaimed.
    pub memory_on_hold: usize,
}

impl IndexStats {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "node_limit": self.node_limit,
            "valid_nodes": self.valid_nodes,
            "entry_node": self.entry_node,
            "entry_level": self.entry_level,
            "level_histogram": self.level_histogram,
            "link_histogram": self.link_histogram,
            "unreachable_nodes": self.unreachable_nodes,
            "memory_on_hold": self.memory_on_hold,
        })
    }
}
