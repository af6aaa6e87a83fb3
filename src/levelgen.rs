//! Level assignment for new nodes.
//!
//! The generator is injected so tests can force exact graph shapes; the
//! default draws from the geometric distribution that gives HNSW its
//! exponentially thinning upper levels.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Picks the max level of the next inserted node.
pub trait LevelGenerator: Send + Sync {
    fn max_level(&self) -> usize;
}

/// Geometric level distribution with multiplier `1 / ln(m)`.
pub struct GeometricLevelGenerator {
    level_mult: f64,
    rng: Mutex<StdRng>,
}

impl GeometricLevelGenerator {
    pub fn new(max_links: usize) -> Self {
        Self::with_seed(max_links, rand::random())
    }

    pub fn with_seed(max_links: usize, seed: u64) -> Self {
        Self {
            level_mult: 1.0 / (max_links.max(2) as f64).ln(),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl LevelGenerator for GeometricLevelGenerator {
    fn max_level(&self) -> usize {
        let r: f64 = self.rng.lock().gen();
        // gen() may return exactly 0.0; ln(0) would blow the level up
        let r = r.max(f64::MIN_POSITIVE);
        (-r.ln() * self.level_mult) as usize
    }
}

/// Always returns the same level. Used to build deterministic graphs in tests.
pub struct FixedLevelGenerator(pub usize);

impl LevelGenerator for FixedLevelGenerator {
    fn max_level(&self) -> usize {
        self.0
    }
}

/// Cycles through a fixed sequence of levels, one per insert.
pub struct SequenceLevelGenerator {
    levels: Vec<usize>,
    next: Mutex<usize>,
}

impl SequenceLevelGenerator {
    pub fn new(levels: Vec<usize>) -> Self {
        Self {
            levels,
            next: Mutex::new(0),
        }
    }
}

impl LevelGenerator for SequenceLevelGenerator {
    fn max_level(&self) -> usize {
        let mut next = self.next.lock();
        let level = self.levels[*next % self.levels.len()];
        *next += 1;
        level
    }
}
