//! Retention ring
//!
//! The cache map only holds weak references, so without help an artifact
//! would die as soon as the caller that asked for it let go. The retention
//! ring keeps strong references to recently rendered artifacts, bounded by a
//! [`MemoryBudget`]. Once the budget comes under pressure the ring releases
//! references in clock (second-chance) order; released artifacts that nobody
//! else holds are dropped and show up on the reclamation queue.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::artifact::{ArtifactId, CachedArtifact};
use crate::memory_budget::{MemoryBudget, MemoryBudgetConfig, MemoryPressure};

/// Pinned artifacts plus their clock order
///
/// `order` may hold ids already released by id; the sweep skips them and
/// `prune_order` drops them once they outnumber the live ones.
#[derive(Debug, Default)]
struct Ring {
    pinned: HashMap<ArtifactId, Arc<CachedArtifact>>,
    /// Oldest at front, newest at back
    order: VecDeque<ArtifactId>,
}

impl Ring {
    fn push(&mut self, artifact: Arc<CachedArtifact>) {
        self.order.push_back(artifact.id());
        self.pinned.insert(artifact.id(), artifact);
    }

    fn remove(&mut self, id: ArtifactId) -> Option<Arc<CachedArtifact>> {
        let removed = self.pinned.remove(&id)?;
        self.prune_order();
        Some(removed)
    }

    fn prune_order(&mut self) {
        if self.order.len() > 2 * self.pinned.len() + 16 {
            let pinned = &self.pinned;
            self.order.retain(|id| pinned.contains_key(id));
        }
    }

    /// Clock sweep: skip (and clear) referenced artifacts once, take the
    /// first unreferenced one
    fn next_victim(&mut self) -> Option<Arc<CachedArtifact>> {
        for _ in 0..self.order.len() {
            let id = self.order.pop_front()?;
            let Some(candidate) = self.pinned.get(&id) else {
                continue;
            };
            if candidate.take_referenced() {
                self.order.push_back(id);
            } else {
                return self.pinned.remove(&id);
            }
        }
        while let Some(id) = self.order.pop_front() {
            if let Some(victim) = self.pinned.remove(&id) {
                return Some(victim);
            }
        }
        None
    }
}

#[derive(Debug)]
pub(crate) struct Retention {
    ring: Mutex<Ring>,
    budget: MemoryBudget,
}

impl Retention {
    pub(crate) fn new(config: MemoryBudgetConfig) -> Self {
        Self {
            ring: Mutex::new(Ring::default()),
            budget: MemoryBudget::new(config),
        }
    }

    /// Pin an artifact, releasing older ones if the budget is under pressure
    ///
    /// Returns the number of references released.
    pub(crate) fn retain(&self, artifact: Arc<CachedArtifact>) -> usize {
        let mut released = Vec::new();
        {
            let mut ring = self.ring.lock();
            self.budget.record_allocation(artifact.byte_size());
            ring.push(artifact);

            if self.budget.under_pressure() {
                let mut excess = self.budget.bytes_to_release();
                while excess > 0 {
                    let Some(victim) = ring.next_victim() else {
                        break;
                    };
                    self.budget.record_deallocation(victim.byte_size());
                    excess = excess.saturating_sub(victim.byte_size().max(1));
                    released.push(victim);
                }
            }
        }

        if !released.is_empty() {
            debug!(
                released = released.len(),
                retained_bytes = self.budget.current_usage(),
                "retention budget under pressure"
            );
        }
        // Dropped outside the lock; the last reference posts to the reclaim queue
        released.len()
    }

    /// Release the reference to one artifact, if pinned
    pub(crate) fn release(&self, id: ArtifactId) -> bool {
        let released = self.ring.lock().remove(id);
        match released {
            Some(artifact) => {
                self.budget.record_deallocation(artifact.byte_size());
                true
            }
            None => false,
        }
    }

    /// Hand out the clock victim, unpinning it
    pub(crate) fn evict_victim(&self) -> Option<Arc<CachedArtifact>> {
        let victim = self.ring.lock().next_victim()?;
        self.budget.record_deallocation(victim.byte_size());
        Some(victim)
    }

    /// Release every reference; returns how many were held
    pub(crate) fn clear(&self) -> usize {
        let drained: Vec<_> = {
            let mut ring = self.ring.lock();
            self.budget.reset();
            ring.order.clear();
            ring.pinned.drain().map(|(_, artifact)| artifact).collect()
        };
        drained.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.ring.lock().pinned.len()
    }

    pub(crate) fn bytes(&self) -> usize {
        self.budget.current_usage()
    }

    pub(crate) fn budget(&self) -> usize {
        self.budget.total_budget()
    }

    pub(crate) fn pressure(&self) -> MemoryPressure {
        self.budget.pressure()
    }
}
