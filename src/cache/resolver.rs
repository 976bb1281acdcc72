//! Cache-aside resolution of node outcomes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info_span, warn};

use crate::error::{RiskError, RiskResult, StructuralError};
use crate::metrics::SimulationMetrics;
use crate::node::{NodeId, RiskNode};
use crate::outcome::Outcome;
use crate::simulation::{aggregate, CancellationToken, SimulationPermits, Simulator};
use crate::tree::RiskTree;

use super::{RiskResultCache, TreeCacheManager};

/// The read path for outcomes: cache first, simulate and store on a miss.
///
/// Portfolios resolve their children through the same path, so every node
/// in a subtree is cached independently and a partially finished resolve
/// leaves only correct entries behind.
pub struct RiskResultResolver {
    manager: Arc<TreeCacheManager>,
    simulator: Arc<Simulator>,
    permits: SimulationPermits,
    metrics: Arc<dyn SimulationMetrics>,
}

impl std::fmt::Debug for RiskResultResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskResultResolver")
            .field("simulator", &self.simulator)
            .field("permits", &self.permits)
            .finish_non_exhaustive()
    }
}

impl RiskResultResolver {
    /// Creates a resolver whose permit count comes from the simulator's config.
    #[must_use]
    pub fn new(manager: Arc<TreeCacheManager>, simulator: Arc<Simulator>, metrics: Arc<dyn SimulationMetrics>) -> Self {
        let permits = SimulationPermits::new(simulator.config().max_concurrent_simulations);
        Self {
            manager,
            simulator,
            permits,
            metrics,
        }
    }

    /// Cache manager shared with the owning engine.
    #[must_use]
    pub fn manager(&self) -> &Arc<TreeCacheManager> {
        &self.manager
    }

    #[must_use]
    pub fn simulator(&self) -> &Arc<Simulator> {
        &self.simulator
    }

    #[must_use]
    pub const fn permits(&self) -> &SimulationPermits {
        &self.permits
    }

    /// Returns the outcome of `node_id`, simulating it on a miss.
    ///
    /// # Errors
    ///
    /// `NodeNotFound` for ids absent from the tree, `TreeTooDeep` when the
    /// tree exceeds the configured depth, plus any validation or fit failure
    /// of a leaf in the subtree.
    pub fn ensure_cached(&self, tree: &RiskTree, node_id: &NodeId) -> RiskResult<Arc<Outcome>> {
        self.ensure_cached_with(tree, node_id, &CancellationToken::new())
    }

    /// [`ensure_cached`](Self::ensure_cached) with caller-controlled cancellation.
    ///
    /// A cancelled resolve keeps the children it finished; the node that was
    /// in progress is left uncached.
    pub fn ensure_cached_with(
        &self,
        tree: &RiskTree,
        node_id: &NodeId,
        token: &CancellationToken,
    ) -> RiskResult<Arc<Outcome>> {
        let _span = info_span!("resolve", tree_id = %tree.id, node_id = %node_id).entered();
        self.check_depth(tree)?;
        let cache = self.manager.cache_for(tree.id);
        if let Some(hit) = self.cached(tree, &cache, node_id)? {
            return Ok(hit);
        }
        // Acquired outside the pool; workers never wait on a permit.
        let result = self
            .permits
            .acquire(token, node_id)
            .map_err(RiskError::from)
            .and_then(|_permit| self.simulator.install(|| self.resolve(tree, &cache, node_id, token)));
        if let Err(RiskError::Execution(crate::error::ExecutionError::Cancelled { node_id: at })) = &result {
            warn!(tree_id = %tree.id, node_id = %node_id, cancelled_at = %at, "resolve cancelled");
        }
        result
    }

    /// Resolves several nodes of one tree in parallel.
    ///
    /// Cached and uncached ids may be mixed. Duplicates resolve once.
    pub fn ensure_cached_all(&self, tree: &RiskTree, node_ids: &[NodeId]) -> RiskResult<HashMap<NodeId, Arc<Outcome>>> {
        self.ensure_cached_all_with(tree, node_ids, &CancellationToken::new())
    }

    /// [`ensure_cached_all`](Self::ensure_cached_all) with caller-controlled
    /// cancellation. The batch holds a single permit.
    pub fn ensure_cached_all_with(
        &self,
        tree: &RiskTree,
        node_ids: &[NodeId],
        token: &CancellationToken,
    ) -> RiskResult<HashMap<NodeId, Arc<Outcome>>> {
        let _span = info_span!("resolve_all", tree_id = %tree.id, nodes = node_ids.len()).entered();
        self.check_depth(tree)?;
        let Some(first) = node_ids.first() else {
            return Ok(HashMap::new());
        };
        let cache = self.manager.cache_for(tree.id);
        let _permit = self.permits.acquire(token, first)?;
        self.simulator.install(|| {
            node_ids
                .par_iter()
                .map(|id| self.resolve(tree, &cache, id, token).map(|outcome| (id.clone(), outcome)))
                .collect()
        })
    }

    fn check_depth(&self, tree: &RiskTree) -> Result<(), StructuralError> {
        let max_depth = self.simulator.config().max_tree_depth;
        let depth = tree.index.depth();
        if depth > max_depth {
            return Err(StructuralError::TreeTooDeep { depth, max_depth });
        }
        Ok(())
    }

    fn cached(&self, tree: &RiskTree, cache: &RiskResultCache, node_id: &NodeId) -> RiskResult<Option<Arc<Outcome>>> {
        let hit = cache.get(node_id)?;
        if hit.is_some() {
            debug!(tree_id = %tree.id, node_id = %node_id, "cache hit");
            self.metrics.on_cache_hit(tree.id, node_id);
        }
        Ok(hit)
    }

    fn resolve(
        &self,
        tree: &RiskTree,
        cache: &RiskResultCache,
        node_id: &NodeId,
        token: &CancellationToken,
    ) -> RiskResult<Arc<Outcome>> {
        if let Some(hit) = self.cached(tree, cache, node_id)? {
            return Ok(hit);
        }
        debug!(tree_id = %tree.id, node_id = %node_id, "cache miss");
        self.metrics.on_cache_miss(tree.id, node_id);

        token.check(node_id)?;
        let node = tree.index.node(node_id)?;
        let epoch = cache.epoch()?;
        let started = Instant::now();

        let outcome = match node {
            RiskNode::Leaf(leaf) => {
                let outcome = self.simulator.simulate_leaf(leaf, token)?;
                self.metrics
                    .on_simulation(node_id, outcome.n_trials(), started.elapsed());
                outcome
            }
            RiskNode::Portfolio(portfolio) => {
                let children = portfolio
                    .children
                    .par_iter()
                    .map(|child| self.resolve(tree, cache, child, token))
                    .collect::<RiskResult<Vec<_>>>()?;
                token.check(node_id)?;
                let combined = aggregate(node_id, children.iter().map(AsRef::as_ref))?;
                self.metrics
                    .on_aggregation(node_id, children.len(), started.elapsed());
                combined
            }
        };

        let outcome = Arc::new(outcome);
        if !cache.put_if_current(node_id.clone(), Arc::clone(&outcome), epoch)? {
            debug!(tree_id = %tree.id, node_id = %node_id, "invalidated during simulation; not cached");
        }
        Ok(outcome)
    }
}
