//! Sparse simulation outcomes and their combination algebra.
//!
//! An outcome stores only the trials with a non-zero loss, together with the
//! total number of trials that were run. Combining outcomes is a commutative
//! monoid: the identity is the empty outcome with zero trials, and losses of
//! shared trials are summed as integers so associativity holds exactly.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ExecutionError, ValidationError};
use crate::node::NodeId;

/// Monetary loss in whole currency units.
pub type Loss = u64;

/// Zero-based trial index.
pub type TrialId = u64;

/// Exact fraction of trials, `hits / trials`.
///
/// Ordering and equality compare the rational values, so `1/2 == 2/4`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Exceedance {
    hits: u64,
    trials: u64,
}

impl Exceedance {
    /// The zero fraction.
    pub const ZERO: Self = Self { hits: 0, trials: 1 };

    /// The fraction one.
    pub const ONE: Self = Self { hits: 1, trials: 1 };

    /// Creates `hits / trials`; zero trials yields [`Exceedance::ZERO`].
    #[must_use]
    pub const fn new(hits: u64, trials: u64) -> Self {
        if trials == 0 {
            Self::ZERO
        } else {
            Self { hits, trials }
        }
    }

    /// Numerator.
    #[must_use]
    pub const fn hits(&self) -> u64 {
        self.hits
    }

    /// Denominator.
    #[must_use]
    pub const fn trials(&self) -> u64 {
        self.trials
    }

    /// Nearest `f64` to the fraction.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> f64 {
        self.hits as f64 / self.trials as f64
    }
}

impl PartialEq for Exceedance {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Exceedance {}

impl PartialOrd for Exceedance {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Exceedance {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = u128::from(self.hits) * u128::from(other.trials);
        let rhs = u128::from(other.hits) * u128::from(self.trials);
        lhs.cmp(&rhs)
    }
}

/// Per-node simulation result: non-zero trial losses plus the trial count.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Outcome {
    n_trials: u64,
    losses: BTreeMap<TrialId, Loss>,
}

impl Outcome {
    /// The combination identity: zero trials, no losses.
    #[must_use]
    pub fn identity() -> Self {
        Self::default()
    }

    /// An outcome of `n_trials` trials in which nothing was lost.
    #[must_use]
    pub fn empty(n_trials: u64) -> Self {
        Self {
            n_trials,
            losses: BTreeMap::new(),
        }
    }

    /// Builds an outcome from `(trial, loss)` pairs.
    ///
    /// Zero losses are dropped. Repeated trial ids keep the last loss.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::OutOfRange` if a trial id is not below `n_trials`.
    pub fn from_losses(
        n_trials: u64,
        losses: impl IntoIterator<Item = (TrialId, Loss)>,
    ) -> Result<Self, ValidationError> {
        let mut map = BTreeMap::new();
        for (trial, loss) in losses {
            if trial >= n_trials {
                #[allow(clippy::cast_precision_loss)]
                let value = trial as f64;
                return Err(ValidationError::OutOfRange {
                    field: "trial".to_string(),
                    value,
                    reason: format!("must be below n_trials {n_trials}"),
                });
            }
            if loss > 0 {
                map.insert(trial, loss);
            }
        }
        Ok(Self {
            n_trials,
            losses: map,
        })
    }

    /// Builds an outcome from a map already known to be valid.
    pub(crate) fn from_sparse(n_trials: u64, losses: BTreeMap<TrialId, Loss>) -> Self {
        debug_assert!(losses.keys().next_back().map_or(true, |t| *t < n_trials));
        debug_assert!(losses.values().all(|l| *l > 0));
        Self { n_trials, losses }
    }

    /// Total trials run, including trials without loss.
    #[must_use]
    pub const fn n_trials(&self) -> u64 {
        self.n_trials
    }

    /// Stored non-zero losses keyed by trial.
    #[must_use]
    pub const fn losses(&self) -> &BTreeMap<TrialId, Loss> {
        &self.losses
    }

    /// True for the combination identity.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.n_trials == 0 && self.losses.is_empty()
    }

    /// Number of trials with a non-zero loss.
    #[must_use]
    pub fn occurrence_count(&self) -> usize {
        self.losses.len()
    }

    /// Loss of one trial (zero when not stored).
    #[must_use]
    pub fn loss(&self, trial: TrialId) -> Loss {
        self.losses.get(&trial).copied().unwrap_or(0)
    }

    /// Smallest stored loss.
    #[must_use]
    pub fn min_loss(&self) -> Option<Loss> {
        self.losses.values().min().copied()
    }

    /// Largest stored loss.
    #[must_use]
    pub fn max_loss(&self) -> Option<Loss> {
        self.losses.values().max().copied()
    }

    /// Mean loss over all trials, zero-loss trials included.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean_loss(&self) -> f64 {
        if self.n_trials == 0 {
            return 0.0;
        }
        let total: u128 = self.losses.values().map(|l| u128::from(*l)).sum();
        total as f64 / self.n_trials as f64
    }

    /// Stored losses in ascending order.
    #[must_use]
    pub fn sorted_losses(&self) -> Vec<Loss> {
        let mut values: Vec<Loss> = self.losses.values().copied().collect();
        values.sort_unstable();
        values
    }

    /// Fraction of all trials whose loss is at least `threshold`.
    ///
    /// A zero threshold is met by every trial, including those without a
    /// stored loss.
    #[must_use]
    pub fn prob_of_exceedance(&self, threshold: Loss) -> Exceedance {
        if threshold == 0 {
            return Exceedance::new(self.n_trials, self.n_trials);
        }
        let hits = self.losses.values().filter(|l| **l >= threshold).count() as u64;
        Exceedance::new(hits, self.n_trials)
    }

    /// Combines two outcomes; see [`combine`].
    pub fn combine(&self, other: &Self) -> Result<Self, ExecutionError> {
        combine(self, other)
    }

    /// Applies `f` to every stored loss, dropping trials mapped to `None` or zero.
    #[must_use]
    pub fn map_losses(&self, f: impl Fn(Loss) -> Option<Loss>) -> Self {
        let losses = self
            .losses
            .iter()
            .filter_map(|(trial, loss)| f(*loss).filter(|l| *l > 0).map(|l| (*trial, l)))
            .collect();
        Self {
            n_trials: self.n_trials,
            losses,
        }
    }
}

/// Sums two outcomes trial by trial.
///
/// The identity combines with anything. Otherwise both sides must have run
/// the same number of trials.
///
/// # Errors
///
/// Returns `ExecutionError::TrialCountMismatch` when trial counts differ.
pub fn combine(a: &Outcome, b: &Outcome) -> Result<Outcome, ExecutionError> {
    if a.is_identity() {
        return Ok(b.clone());
    }
    if b.is_identity() {
        return Ok(a.clone());
    }
    if a.n_trials != b.n_trials {
        return Err(ExecutionError::TrialCountMismatch {
            left: a.n_trials,
            right: b.n_trials,
        });
    }

    let (large, small) = if a.losses.len() >= b.losses.len() { (a, b) } else { (b, a) };
    let mut losses = large.losses.clone();
    for (trial, loss) in &small.losses {
        let entry = losses.entry(*trial).or_insert(0);
        *entry = entry.saturating_add(*loss);
    }
    Ok(Outcome {
        n_trials: a.n_trials,
        losses,
    })
}

/// Folds any number of outcomes with [`combine`], starting from the identity.
pub fn combine_all<'a>(outcomes: impl IntoIterator<Item = &'a Outcome>) -> Result<Outcome, ExecutionError> {
    outcomes
        .into_iter()
        .try_fold(Outcome::identity(), |acc, next| combine(&acc, next))
}

/// Outcome of a node together with the outcomes of its subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeOutcome {
    /// Node this outcome belongs to.
    pub node_id: NodeId,
    /// The node's own outcome; for a portfolio, the sum of its children.
    pub outcome: Arc<Outcome>,
    /// Child outcomes in declaration order. Empty for leaves.
    pub children: Vec<TreeOutcome>,
}

impl TreeOutcome {
    /// Finds the outcome of `id` in this subtree.
    #[must_use]
    pub fn find(&self, id: &NodeId) -> Option<&TreeOutcome> {
        if &self.node_id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    /// Visits every node of the subtree, parents before children.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a TreeOutcome)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(n: u64, pairs: &[(TrialId, Loss)]) -> Outcome {
        Outcome::from_losses(n, pairs.iter().copied()).unwrap()
    }

    #[test]
    fn from_losses_drops_zero_and_rejects_out_of_range() {
        let o = outcome(10, &[(1, 5), (2, 0)]);
        assert_eq!(o.occurrence_count(), 1);
        assert!(Outcome::from_losses(3, [(3, 1)]).is_err());
    }

    #[test]
    fn combine_sums_shared_trials() {
        let a = outcome(10, &[(1, 100), (2, 50)]);
        let b = outcome(10, &[(2, 25), (7, 10)]);
        let c = combine(&a, &b).unwrap();
        assert_eq!(c, outcome(10, &[(1, 100), (2, 75), (7, 10)]));
        assert_eq!(c, combine(&b, &a).unwrap());
    }

    #[test]
    fn combine_identity_is_neutral() {
        let a = outcome(10, &[(3, 9)]);
        assert_eq!(combine(&Outcome::identity(), &a).unwrap(), a);
        assert_eq!(combine(&a, &Outcome::identity()).unwrap(), a);
    }

    #[test]
    fn combine_rejects_mismatched_trials() {
        let err = combine(&outcome(10, &[(1, 1)]), &outcome(20, &[(1, 1)])).unwrap_err();
        assert!(matches!(err, ExecutionError::TrialCountMismatch { left: 10, right: 20 }));
    }

    #[test]
    fn combine_all_folds_from_identity() {
        let parts = [outcome(5, &[(0, 1)]), outcome(5, &[(0, 2)]), outcome(5, &[(4, 3)])];
        let total = combine_all(&parts).unwrap();
        assert_eq!(total, outcome(5, &[(0, 3), (4, 3)]));
        assert!(combine_all(std::iter::empty()).unwrap().is_identity());
    }

    #[test]
    fn exceedance_counts_all_trials() {
        let o = outcome(10, &[(1, 100), (2, 200), (3, 300)]);
        assert_eq!(o.prob_of_exceedance(0), Exceedance::ONE);
        assert_eq!(o.prob_of_exceedance(1), Exceedance::new(3, 10));
        assert_eq!(o.prob_of_exceedance(200), Exceedance::new(2, 10));
        assert_eq!(o.prob_of_exceedance(301), Exceedance::ZERO);
        assert!((o.prob_of_exceedance(150).as_f64() - 0.2).abs() < 1e-15);
    }

    #[test]
    fn exceedance_compares_as_rationals() {
        assert_eq!(Exceedance::new(1, 2), Exceedance::new(2, 4));
        assert!(Exceedance::new(1, 3) < Exceedance::new(1, 2));
        assert_eq!(Exceedance::new(5, 0), Exceedance::ZERO);
    }

    #[test]
    fn summary_statistics() {
        let o = outcome(4, &[(0, 10), (3, 30)]);
        assert_eq!(o.min_loss(), Some(10));
        assert_eq!(o.max_loss(), Some(30));
        assert!((o.mean_loss() - 10.0).abs() < 1e-12);
        assert_eq!(o.loss(1), 0);
        assert_eq!(o.sorted_losses(), vec![10, 30]);
    }

    #[test]
    fn tree_outcome_find_and_walk() {
        let leaf = TreeOutcome {
            node_id: NodeId::new("leaf").unwrap(),
            outcome: Arc::new(outcome(2, &[(0, 1)])),
            children: Vec::new(),
        };
        let root = TreeOutcome {
            node_id: NodeId::new("root").unwrap(),
            outcome: Arc::new(outcome(2, &[(0, 1)])),
            children: vec![leaf],
        };
        assert!(root.find(&NodeId::new("leaf").unwrap()).is_some());
        let mut seen = Vec::new();
        root.walk(&mut |t| seen.push(t.node_id.to_string()));
        assert_eq!(seen, vec!["root", "leaf"]);
    }
}
