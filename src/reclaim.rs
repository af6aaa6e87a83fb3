//! Generation tracking for safe reuse of freed resources.
//!
//! Every committed mutation batch bumps the generation. Readers hold a
//! [`GenerationGuard`] pinning the generation they entered at; resources
//! freed by a mutation are parked with the generation of that commit and
//! only become reusable once the oldest guarded generation has passed them.
//!
//! Retired link arrays ride the epoch collector instead (see `graph.rs`);
//! this handler gates node-id reuse and numbers commits.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

pub type Generation = u64;

pub struct GenerationHandler {
    /// Current committed generation.
    current: AtomicU64,
    /// Active guard count per generation; the oldest key gates id reuse.
    active: Mutex<BTreeMap<Generation, u32>>,
}

impl GenerationHandler {
    pub fn new() -> Self {
        Self {
            current: AtomicU64::new(1),
            active: Mutex::new(BTreeMap::new()),
        }
    }

    #[inline]
    pub fn current_generation(&self) -> Generation {
        self.current.load(Ordering::Acquire)
    }

    /// Advance to the next generation; called once per committed batch.
    pub fn bump(&self) -> Generation {
        self.current.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Pin the current generation until the guard drops.
    pub fn take_guard(&self) -> GenerationGuard<'_> {
        let mut active = self.active.lock();
        let generation = self.current_generation();
        *active.entry(generation).or_insert(0) += 1;
        GenerationGuard {
            handler: self,
            generation,
        }
    }

    /// Oldest generation any live guard still observes; `current` when idle.
    pub fn oldest_used_generation(&self) -> Generation {
        self.active
            .lock()
            .keys()
            .next()
            .copied()
            .unwrap_or_else(|| self.current_generation())
    }

    fn release(&self, generation: Generation) {
        let mut active = self.active.lock();
        if let Some(count) = active.get_mut(&generation) {
            *count -= 1;
            if *count == 0 {
                active.remove(&generation);
            }
        }
    }
}

impl Default for GenerationHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII pin on a generation. Freed ids tagged at or after it stay parked
/// while the guard lives.
pub struct GenerationGuard<'a> {
    handler: &'a GenerationHandler,
    generation: Generation,
}

impl GenerationGuard<'_> {
    #[inline]
    pub fn generation(&self) -> Generation {
        self.generation
    }
}

impl Drop for GenerationGuard<'_> {
    fn drop(&mut self) {
        self.handler.release(self.generation);
    }
}
