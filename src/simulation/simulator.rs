//! Trial execution for leaves and bottom-up aggregation for portfolios.

use std::collections::BTreeMap;
use std::sync::Arc;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug_span;

use crate::config::SimulationConfig;
use crate::error::{ExecutionError, RiskResult, StructuralError};
use crate::node::{NodeId, RiskLeaf, RiskNode};
use crate::outcome::{combine_all, Loss, Outcome, TrialId, TreeOutcome};
use crate::sampling::RiskSampler;
use crate::tree::TreeIndex;

use super::CancellationToken;

/// Trials evaluated per parallel task; cancellation is checked between chunks.
pub const TRIAL_CHUNK: u64 = 4_096;

/// Runs simulations on a dedicated thread pool.
///
/// Every trial is a pure function of its inputs, so outcomes do not depend
/// on the pool size or on scheduling.
#[derive(Debug)]
pub struct Simulator {
    config: SimulationConfig,
    pool: Arc<ThreadPool>,
}

impl Simulator {
    /// Validates `config` and starts a pool of `config.parallelism` threads.
    pub fn new(config: &SimulationConfig) -> RiskResult<Self> {
        config.validate()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.parallelism)
            .thread_name(|idx| format!("riskcurve-sim-{idx}"))
            .build()
            .map_err(|e| ExecutionError::ThreadPool { message: e.to_string() })?;
        Ok(Self {
            config: *config,
            pool: Arc::new(pool),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Runs `f` inside this simulator's pool.
    pub fn install<R: Send>(&self, f: impl FnOnce() -> R + Send) -> R {
        self.pool.install(f)
    }

    /// Fits the leaf's distribution and binds it to the configured seeds.
    pub fn sampler_for(&self, leaf: &RiskLeaf) -> RiskResult<RiskSampler> {
        RiskSampler::from_leaf(leaf, self.config.generator(), self.config.lognormal_interval)
    }

    /// Simulates `config.n_trials` trials of one leaf.
    pub fn simulate_leaf(&self, leaf: &RiskLeaf, token: &CancellationToken) -> RiskResult<Outcome> {
        let sampler = self.sampler_for(leaf)?;
        self.run_trials(&sampler, self.config.n_trials, token)
    }

    /// Runs trials `0..n_trials`, keeping only trials with a loss.
    pub fn run_trials(&self, sampler: &RiskSampler, n_trials: u64, token: &CancellationToken) -> RiskResult<Outcome> {
        let _span = debug_span!("simulate_leaf", node_id = %sampler.node_id(), n_trials).entered();
        let chunks = n_trials.div_ceil(TRIAL_CHUNK);
        let parts: Vec<Vec<(TrialId, Loss)>> = self.install(|| {
            (0..chunks)
                .into_par_iter()
                .map(|chunk| {
                    token.check(sampler.node_id())?;
                    let start = chunk * TRIAL_CHUNK;
                    let end = (start + TRIAL_CHUNK).min(n_trials);
                    let hits: Vec<(TrialId, Loss)> = (start..end)
                        .filter_map(|trial| sampler.sample_trial(trial).map(|loss| (trial, loss)))
                        .collect();
                    Ok(hits)
                })
                .collect::<Result<Vec<_>, ExecutionError>>()
        })?;

        let losses: BTreeMap<TrialId, Loss> = parts.into_iter().flatten().collect();
        Ok(Outcome::from_sparse(n_trials, losses))
    }

    /// Simulates the subtree under `id` without any caching.
    ///
    /// Children of a portfolio are simulated in parallel.
    pub fn simulate_tree(&self, index: &TreeIndex, id: &NodeId, token: &CancellationToken) -> RiskResult<TreeOutcome> {
        self.install(|| self.simulate_subtree(index, id, token))
    }

    fn simulate_subtree(&self, index: &TreeIndex, id: &NodeId, token: &CancellationToken) -> RiskResult<TreeOutcome> {
        token.check(id)?;
        match index.node(id)? {
            RiskNode::Leaf(leaf) => Ok(TreeOutcome {
                node_id: id.clone(),
                outcome: Arc::new(self.simulate_leaf(leaf, token)?),
                children: Vec::new(),
            }),
            RiskNode::Portfolio(portfolio) => {
                let children = portfolio
                    .children
                    .par_iter()
                    .map(|child| self.simulate_subtree(index, child, token))
                    .collect::<RiskResult<Vec<_>>>()?;
                let outcome = aggregate(id, children.iter().map(|c| c.outcome.as_ref()))?;
                Ok(TreeOutcome {
                    node_id: id.clone(),
                    outcome: Arc::new(outcome),
                    children,
                })
            }
        }
    }
}

/// Combines a portfolio's child outcomes.
///
/// # Errors
///
/// `EmptyPortfolio` when there are no children, `TrialCountMismatch` when
/// children ran different trial counts.
pub fn aggregate<'a>(portfolio: &NodeId, children: impl IntoIterator<Item = &'a Outcome>) -> RiskResult<Outcome> {
    let mut children = children.into_iter().peekable();
    if children.peek().is_none() {
        return Err(StructuralError::EmptyPortfolio { id: portfolio.clone() }.into());
    }
    Ok(combine_all(children)?)
}

/// Simulates the subtree under `id` with a throwaway simulator.
pub fn simulate(index: &TreeIndex, id: &NodeId, config: &SimulationConfig) -> RiskResult<TreeOutcome> {
    Simulator::new(config)?.simulate_tree(index, id, &CancellationToken::new())
}
