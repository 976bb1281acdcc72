//! `RiskEngine`: the entry point that ties configuration, caching and
//! simulation together.

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::Receiver;

use crate::cache::{InvalidationEvent, RiskResultResolver, TreeCacheManager};
use crate::config::SimulationConfig;
use crate::error::RiskResult;
use crate::lec::{calculate_quantiles, CurveBundle, Quantiles};
use crate::metrics::{NoopMetrics, SimulationMetrics};
use crate::mitigation::Mitigation;
use crate::node::NodeId;
use crate::outcome::{Outcome, TreeOutcome};
use crate::simulation::{CancellationToken, Simulator};
use crate::tree::{RiskTree, TreeId};

/// Serves cached outcomes, curves and quantiles for risk trees.
///
/// Trees are owned by the caller. After changing a node's parameters call
/// [`invalidate`](Self::invalidate) with the updated tree; after adding,
/// removing or moving nodes call
/// [`on_tree_structure_changed`](Self::on_tree_structure_changed).
///
/// # Examples
///
/// ```
/// use riskcurve::{NodeId, RiskEngine, RiskLeaf, RiskPortfolio, RiskTree, SimulationConfig};
///
/// let id = |s: &str| NodeId::new(s).unwrap();
/// let tree = RiskTree::new(
///     "Enterprise",
///     vec![
///         RiskPortfolio::new(id("root"), "Root", vec![id("cyber")]).unwrap().into(),
///         RiskLeaf::lognormal(id("cyber"), "Cyber", 0.2, 1_000.0, 50_000.0).unwrap().into(),
///     ],
/// )
/// .unwrap();
///
/// let config = SimulationConfig { n_trials: 1_000, ..SimulationConfig::default() };
/// let engine = RiskEngine::new(config).unwrap();
/// let outcome = engine.ensure_cached(&tree, &id("root")).unwrap();
/// assert_eq!(outcome.n_trials(), 1_000);
/// ```
#[derive(Debug)]
pub struct RiskEngine {
    config: SimulationConfig,
    manager: Arc<TreeCacheManager>,
    resolver: RiskResultResolver,
}

impl RiskEngine {
    /// Creates an engine without a metrics sink.
    pub fn new(config: SimulationConfig) -> RiskResult<Self> {
        Self::with_metrics(config, Arc::new(NoopMetrics))
    }

    /// Creates an engine reporting to `metrics`.
    pub fn with_metrics(config: SimulationConfig, metrics: Arc<dyn SimulationMetrics>) -> RiskResult<Self> {
        let simulator = Arc::new(Simulator::new(&config)?);
        let manager = Arc::new(TreeCacheManager::with_metrics(Arc::clone(&metrics)));
        let resolver = RiskResultResolver::new(Arc::clone(&manager), simulator, metrics);
        Ok(Self {
            config,
            manager,
            resolver,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &SimulationConfig {
        &self.config
    }

    #[must_use]
    pub fn cache_manager(&self) -> &TreeCacheManager {
        &self.manager
    }

    #[must_use]
    pub const fn resolver(&self) -> &RiskResultResolver {
        &self.resolver
    }

    pub fn ensure_cached(&self, tree: &RiskTree, node_id: &NodeId) -> RiskResult<Arc<Outcome>> {
        self.resolver.ensure_cached(tree, node_id)
    }

    pub fn ensure_cached_with(
        &self,
        tree: &RiskTree,
        node_id: &NodeId,
        token: &CancellationToken,
    ) -> RiskResult<Arc<Outcome>> {
        self.resolver.ensure_cached_with(tree, node_id, token)
    }

    pub fn ensure_cached_all(&self, tree: &RiskTree, node_ids: &[NodeId]) -> RiskResult<HashMap<NodeId, Arc<Outcome>>> {
        self.resolver.ensure_cached_all(tree, node_ids)
    }

    /// Simulates a subtree from scratch, bypassing the cache.
    pub fn simulate(&self, tree: &RiskTree, node_id: &NodeId) -> RiskResult<TreeOutcome> {
        self.resolver
            .simulator()
            .simulate_tree(&tree.index, node_id, &CancellationToken::new())
    }

    /// Clears the ancestor path of a changed node. Returns the cleared ids.
    pub fn invalidate(&self, tree: &RiskTree, node_id: &NodeId) -> RiskResult<Vec<NodeId>> {
        self.manager.invalidate(tree, node_id)
    }

    /// Clears a tree whose structure changed. Returns the number of entries removed.
    pub fn on_tree_structure_changed(&self, tree_id: TreeId) -> RiskResult<usize> {
        self.manager.on_tree_structure_changed(tree_id)
    }

    pub fn delete_tree(&self, tree_id: TreeId) -> RiskResult<usize> {
        self.manager.delete_tree(tree_id)
    }

    pub fn clear_all(&self) -> RiskResult<usize> {
        self.manager.clear_all()
    }

    #[must_use]
    pub fn subscribe(&self, capacity: usize) -> Receiver<InvalidationEvent> {
        self.manager.subscribe(capacity)
    }

    /// Curves for several nodes of one tree on shared ticks.
    ///
    /// `tick_count` defaults to the configured value.
    pub fn lec_curves(&self, tree: &RiskTree, node_ids: &[NodeId], tick_count: Option<usize>) -> RiskResult<CurveBundle> {
        let outcomes = self.ensure_cached_all(tree, node_ids)?;
        let ticks = tick_count.unwrap_or(self.config.default_tick_count);
        Ok(CurveBundle::from_outcomes(
            outcomes.iter().map(|(id, outcome)| (id.clone(), outcome.as_ref())),
            ticks,
        )?)
    }

    /// Curve of one node after applying `mitigation` to its cached outcome.
    ///
    /// The cached outcome itself is not modified.
    pub fn mitigated_curve(
        &self,
        tree: &RiskTree,
        node_id: &NodeId,
        mitigation: &Mitigation,
        tick_count: Option<usize>,
    ) -> RiskResult<CurveBundle> {
        let outcome = self.ensure_cached(tree, node_id)?;
        let mitigated = mitigation.apply(&outcome);
        let ticks = tick_count.unwrap_or(self.config.default_tick_count);
        Ok(CurveBundle::from_outcomes([(node_id.clone(), &mitigated)], ticks)?)
    }

    pub fn quantiles(&self, tree: &RiskTree, node_id: &NodeId) -> RiskResult<Quantiles> {
        Ok(calculate_quantiles(&*self.ensure_cached(tree, node_id)?))
    }
}
