//! Optional metrics sinks.
//!
//! Sinks observe cache and simulation activity. They are fire-and-forget:
//! every hook returns `()` and the engine behaves identically with
//! [`NoopMetrics`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::node::NodeId;
use crate::tree::TreeId;

/// Receives cache and simulation events.
pub trait SimulationMetrics: Send + Sync {
    /// A resolve found `node` already cached.
    fn on_cache_hit(&self, _tree: TreeId, _node: &NodeId) {}

    /// A resolve had to compute `node`.
    fn on_cache_miss(&self, _tree: TreeId, _node: &NodeId) {}

    /// A leaf sampled `n_trials` trials.
    fn on_simulation(&self, _node: &NodeId, _n_trials: u64, _duration: Duration) {}

    /// A portfolio combined the outcomes of `children` children.
    fn on_aggregation(&self, _node: &NodeId, _children: usize, _duration: Duration) {}

    /// Entries on an ancestor path were removed from a tree's cache.
    fn on_invalidation(&self, _tree: TreeId, _cleared: &[NodeId]) {}

    /// A tree's cache was emptied wholesale, dropping `count` entries.
    fn on_tree_cleared(&self, _tree: TreeId, _count: usize) {}
}

/// Sink that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl SimulationMetrics for NoopMetrics {}

/// Sink that keeps running totals.
#[derive(Debug, Default)]
pub struct CountingMetrics {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    simulations: AtomicU64,
    aggregations: AtomicU64,
    trials_simulated: AtomicU64,
    simulation_nanos: AtomicU64,
    invalidations: AtomicU64,
    entries_invalidated: AtomicU64,
}

impl CountingMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves answered from the cache.
    #[must_use]
    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    /// Leaf simulations run.
    #[must_use]
    pub fn simulations(&self) -> u64 {
        self.simulations.load(Ordering::Relaxed)
    }

    /// Portfolio aggregations.
    #[must_use]
    pub fn aggregations(&self) -> u64 {
        self.aggregations.load(Ordering::Relaxed)
    }

    /// Trials sampled by leaves; aggregation adds none.
    #[must_use]
    pub fn trials_simulated(&self) -> u64 {
        self.trials_simulated.load(Ordering::Relaxed)
    }

    /// Total wall time leaves spent sampling.
    #[must_use]
    pub fn simulation_time(&self) -> Duration {
        Duration::from_nanos(self.simulation_nanos.load(Ordering::Relaxed))
    }

    #[must_use]
    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }

    /// Entries removed by path invalidations and whole-tree clears.
    #[must_use]
    pub fn entries_invalidated(&self) -> u64 {
        self.entries_invalidated.load(Ordering::Relaxed)
    }
}

impl SimulationMetrics for CountingMetrics {
    fn on_cache_hit(&self, _tree: TreeId, _node: &NodeId) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    fn on_cache_miss(&self, _tree: TreeId, _node: &NodeId) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    fn on_simulation(&self, _node: &NodeId, n_trials: u64, duration: Duration) {
        self.simulations.fetch_add(1, Ordering::Relaxed);
        self.trials_simulated.fetch_add(n_trials, Ordering::Relaxed);
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.simulation_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    fn on_aggregation(&self, _node: &NodeId, _children: usize, _duration: Duration) {
        self.aggregations.fetch_add(1, Ordering::Relaxed);
    }

    fn on_invalidation(&self, _tree: TreeId, cleared: &[NodeId]) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        self.entries_invalidated.fetch_add(cleared.len() as u64, Ordering::Relaxed);
    }

    fn on_tree_cleared(&self, _tree: TreeId, count: usize) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        self.entries_invalidated.fetch_add(count as u64, Ordering::Relaxed);
    }
}
