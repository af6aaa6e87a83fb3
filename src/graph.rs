//! Multi-layer graph storage.
//!
//! Structure per node: a fixed-height stack of link arrays, one per level.
//! Link arrays are immutable once published; every mutation builds a new
//! array and swaps the atomic pointer, retiring the old array through the
//! epoch collector so concurrent readers never observe a torn update.
//! Readers pin an epoch guard and load through `Ordering::Acquire`.

use crate::types::{EntryPoint, NodeId};
use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use dashmap::DashMap;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// One level's neighbor list.
pub struct LinkArray {
    pub links: SmallVec<[NodeId; 8]>,
}

impl LinkArray {
    fn new(links: SmallVec<[NodeId; 8]>) -> Self {
        Self { links }
    }

    /// Heap bytes owned by a spilled array; inline arrays cost nothing extra.
    fn heap_bytes(&self) -> usize {
        if self.links.spilled() {
            self.links.capacity() * std::mem::size_of::<NodeId>()
        } else {
            0
        }
    }
}

/// A node's per-level link cells. Height is fixed at creation.
struct GraphNode {
    levels: Vec<Atomic<LinkArray>>,
}

impl GraphNode {
    fn new(num_levels: usize) -> Self {
        let mut levels = Vec::with_capacity(num_levels);
        for _ in 0..num_levels {
            levels.push(Atomic::new(LinkArray::new(SmallVec::new())));
        }
        Self { levels }
    }
}

impl Drop for GraphNode {
    fn drop(&mut self) {
        // Cells cleared through remove_node are already null; anything left
        // is only dropped when no reader can reach it (owner teardown).
        let guard = unsafe { epoch::unprotected() };
        for cell in &self.levels {
            let shared = cell.load(Ordering::Relaxed, guard);
            if !shared.is_null() {
                drop(unsafe { shared.into_owned() });
            }
        }
    }
}

/// Thresholds for deciding whether slack in link arrays is worth compacting.
#[derive(Clone, Copy, Debug)]
pub struct CompactStrategy {
    /// Compact when dead bytes exceed this share of total link-array bytes.
    pub dead_ratio: f64,
    /// Never compact below this many dead bytes.
    pub min_dead_bytes: usize,
}

impl Default for CompactStrategy {
    fn default() -> Self {
        Self {
            dead_ratio: 0.2,
            min_dead_bytes: 4096,
        }
    }
}

/// Aggregate graph statistics for the observability dump.
pub struct GraphStats {
    pub node_limit: u32,
    pub valid_nodes: usize,
    pub level_histogram: Vec<usize>,
    pub link_histogram: Vec<usize>,
    pub unreachable_nodes: usize,
    pub memory_on_hold: usize,
}

pub struct GraphStore {
    nodes: DashMap<NodeId, GraphNode, ahash::RandomState>,
    entry: Atomic<EntryPoint>,
    /// Highest allocated node id + 1.
    node_limit: AtomicU32,
    /// Bytes retired but not yet collected by the epoch.
    held_bytes: Arc<AtomicUsize>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self {
            nodes: DashMap::with_hasher(ahash::RandomState::new()),
            entry: Atomic::null(),
            node_limit: AtomicU32::new(0),
            held_bytes: Arc::new(AtomicUsize::new(0)),
        }
    }

    // ---- node lifecycle ----

    /// Allocate a node with `num_levels` empty levels (level 0 always present).
    pub fn make_node(&self, id: NodeId, num_levels: usize) {
        debug_assert!(num_levels >= 1, "a live node needs at least level 0");
        debug_assert!(
            !self.nodes.contains_key(&id),
            "node {} already exists",
            id
        );
        self.nodes.insert(id, GraphNode::new(num_levels));
        self.node_limit.fetch_max(id + 1, Ordering::AcqRel);
    }

    /// Clear a node's levels and drop its slot. The id becomes free; reuse is
    /// gated by the caller's generation scheme.
    pub fn remove_node(&self, id: NodeId, guard: &Guard) {
        if let Some(node) = self.nodes.get(&id) {
            for cell in &node.levels {
                let old = cell.swap(Shared::null(), Ordering::AcqRel, guard);
                self.retire(old, guard);
            }
        }
        self.nodes.remove(&id);
    }

    /// Number of levels a node participates in; 0 means not present.
    #[inline]
    pub fn level_count(&self, id: NodeId) -> usize {
        self.nodes.get(&id).map(|n| n.levels.len()).unwrap_or(0)
    }

    #[inline]
    pub fn valid_node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Size of the node-id address space.
    pub fn node_limit(&self) -> u32 {
        self.node_limit.load(Ordering::Acquire)
    }

    /// Widen the address space to at least `limit` (image restore).
    pub(crate) fn restore_node_limit(&self, limit: u32) {
        self.node_limit.fetch_max(limit, Ordering::AcqRel);
    }

    /// Truncate the node-id address space. Only legal when every id at or
    /// above `new_size` is free.
    pub fn shrink_lid_space(&self, new_size: u32) {
        debug_assert!(
            self.nodes.iter().all(|entry| *entry.key() < new_size),
            "shrink below a live node id"
        );
        self.node_limit.store(new_size, Ordering::Release);
    }

    /// Live node ids in ascending order.
    pub fn live_node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    // ---- link arrays ----

    /// Read-only view of one level's links, valid while `guard` is pinned.
    pub fn get_link_array<'g>(
        &self,
        id: NodeId,
        level: usize,
        guard: &'g Guard,
    ) -> Option<&'g [NodeId]> {
        let node = self.nodes.get(&id)?;
        let cell = node.levels.get(level)?;
        let shared = cell.load(Ordering::Acquire, guard);
        unsafe { shared.as_ref().map(|arr| arr.links.as_slice()) }
    }

    /// Read-only view of all levels of a node (empty if not present).
    pub fn get_levels<'g>(&self, id: NodeId, guard: &'g Guard) -> SmallVec<[&'g [NodeId]; 4]> {
        let mut out = SmallVec::new();
        if let Some(node) = self.nodes.get(&id) {
            for cell in &node.levels {
                let shared = cell.load(Ordering::Acquire, guard);
                match unsafe { shared.as_ref() } {
                    Some(arr) => out.push(arr.links.as_slice()),
                    None => out.push(&[][..]),
                }
            }
        }
        out
    }

    /// Publish a new link array for `(id, level)`, retiring the old one.
    pub fn set_link_array(
        &self,
        id: NodeId,
        level: usize,
        links: SmallVec<[NodeId; 8]>,
        guard: &Guard,
    ) {
        debug_assert!(!links.contains(&id), "node {} linking to itself", id);
        debug_assert!(
            (1..links.len()).all(|i| !links[..i].contains(&links[i])),
            "duplicate links on node {}",
            id
        );
        let node = match self.nodes.get(&id) {
            Some(node) => node,
            None => {
                debug_assert!(false, "set_link_array on missing node {}", id);
                return;
            }
        };
        let cell = match node.levels.get(level) {
            Some(cell) => cell,
            None => {
                debug_assert!(false, "set_link_array on missing level {} of node {}", level, id);
                return;
            }
        };
        let old = cell.swap(Owned::new(LinkArray::new(links)), Ordering::AcqRel, guard);
        self.retire(old, guard);
    }

    fn retire(&self, old: Shared<'_, LinkArray>, guard: &Guard) {
        if old.is_null() {
            return;
        }
        let bytes = std::mem::size_of::<LinkArray>() + unsafe { old.deref() }.heap_bytes();
        self.held_bytes.fetch_add(bytes, Ordering::Relaxed);
        let held = Arc::clone(&self.held_bytes);
        guard.defer(move || {
            held.fetch_sub(bytes, Ordering::Relaxed);
        });
        unsafe { guard.defer_destroy(old) };
    }

    // ---- entry point ----

    pub fn entry_point(&self, guard: &Guard) -> EntryPoint {
        let shared = self.entry.load(Ordering::Acquire, guard);
        unsafe { shared.as_ref() }
            .copied()
            .unwrap_or_else(EntryPoint::none)
    }

    pub fn set_entry_point(&self, entry: EntryPoint, guard: &Guard) {
        let old = if entry.is_valid() {
            self.entry.swap(Owned::new(entry), Ordering::AcqRel, guard)
        } else {
            self.entry.swap(Shared::null(), Ordering::AcqRel, guard)
        };
        if !old.is_null() {
            unsafe { guard.defer_destroy(old) };
        }
    }

    /// Highest remaining node, for entry-point repair after a removal.
    /// Ties break on the lower id.
    pub fn highest_node(&self, exclude: NodeId) -> EntryPoint {
        let mut best = EntryPoint::none();
        for entry in self.nodes.iter() {
            let id = *entry.key();
            if id == exclude {
                continue;
            }
            let level = entry.value().levels.len() as i32 - 1;
            if level > best.level || (level == best.level && id < best.node) {
                best = EntryPoint { node: id, level };
            }
        }
        best
    }

    // ---- compaction ----

    /// Heuristically compact link arrays when slack capacity is worth
    /// reclaiming. Returns whether compaction ran.
    pub fn consider_compact(&self, strategy: &CompactStrategy, guard: &Guard) -> bool {
        let (live, dead) = self.fragmentation(guard);
        if dead < strategy.min_dead_bytes
            || (dead as f64) <= strategy.dead_ratio * ((live + dead) as f64)
        {
            return false;
        }
        let reclaimed = self.compact_link_arrays(guard);
        debug!(reclaimed_bytes = reclaimed, "compacted link arrays");
        true
    }

    /// (live, dead) heap bytes across all spilled link arrays.
    fn fragmentation(&self, guard: &Guard) -> (usize, usize) {
        let mut live = 0usize;
        let mut dead = 0usize;
        for entry in self.nodes.iter() {
            for cell in &entry.value().levels {
                let shared = cell.load(Ordering::Acquire, guard);
                if let Some(arr) = unsafe { shared.as_ref() } {
                    if arr.links.spilled() {
                        let cell_size = std::mem::size_of::<NodeId>();
                        live += arr.links.len() * cell_size;
                        dead += (arr.links.capacity() - arr.links.len()) * cell_size;
                    }
                }
            }
        }
        (live, dead)
    }

    /// Rebuild every slack-capacity link array exact-fit. Returns reclaimed
    /// bytes (approximate: slack at scan time).
    pub fn compact_link_arrays(&self, guard: &Guard) -> usize {
        let mut reclaimed = 0usize;
        let mut rebuilds: Vec<(NodeId, usize, SmallVec<[NodeId; 8]>)> = Vec::new();
        for entry in self.nodes.iter() {
            let id = *entry.key();
            for (level, cell) in entry.value().levels.iter().enumerate() {
                let shared = cell.load(Ordering::Acquire, guard);
                if let Some(arr) = unsafe { shared.as_ref() } {
                    if arr.links.spilled() && arr.links.capacity() > arr.links.len() {
                        reclaimed += (arr.links.capacity() - arr.links.len())
                            * std::mem::size_of::<NodeId>();
                        rebuilds.push((id, level, SmallVec::from_slice(&arr.links)));
                    }
                }
            }
        }
        for (id, level, links) in rebuilds {
            self.set_link_array(id, level, links, guard);
        }
        reclaimed
    }

    /// Bytes retired from the graph but not yet collected.
    pub fn memory_on_hold(&self) -> usize {
        self.held_bytes.load(Ordering::Relaxed)
    }

    // ---- invariants & stats ----

    /// True when every link is reciprocated at the same level.
    pub fn check_link_symmetry(&self, guard: &Guard) -> bool {
        for id in self.live_node_ids() {
            let levels = self.get_levels(id, guard);
            for (level, links) in levels.iter().enumerate() {
                for &neighbor in links.iter() {
                    let back = self.get_link_array(neighbor, level, guard);
                    match back {
                        Some(back) if back.contains(&id) => {}
                        _ => return false,
                    }
                }
            }
        }
        true
    }

    pub fn collect_stats(&self, guard: &Guard) -> GraphStats {
        let entry = self.entry_point(guard);
        let valid_nodes = self.nodes.len();
        let mut level_histogram = Vec::new();
        let mut link_histogram = Vec::new();
        let mut unreachable = 0usize;
        for id in self.live_node_ids() {
            let levels = self.get_levels(id, guard);
            if levels.is_empty() {
                continue;
            }
            let top = levels.len() - 1;
            if level_histogram.len() <= top {
                level_histogram.resize(top + 1, 0);
            }
            level_histogram[top] += 1;

            let links0 = levels[0].len();
            if link_histogram.len() <= links0 {
                link_histogram.resize(links0 + 1, 0);
            }
            link_histogram[links0] += 1;

            if links0 == 0 && !(id == entry.node && valid_nodes == 1) {
                unreachable += 1;
            }
        }
        GraphStats {
            node_limit: self.node_limit(),
            valid_nodes,
            level_histogram,
            link_histogram,
            unreachable_nodes: unreachable,
            memory_on_hold: self.memory_on_hold(),
        }
    }
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for GraphStore {
    fn drop(&mut self) {
        let guard = unsafe { epoch::unprotected() };
        let shared = self.entry.load(Ordering::Relaxed, guard);
        if !shared.is_null() {
            drop(unsafe { shared.into_owned() });
        }
    }
}
