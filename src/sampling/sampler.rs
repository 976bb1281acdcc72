//! Per-leaf sampler binding occurrence and loss to independent streams.

use crate::error::{ExecutionError, RiskResult};
use crate::node::{NodeId, RiskLeaf};
use crate::outcome::{Loss, TrialId};

use super::{FittedDistribution, LognormalInterval, LossDistribution, TrialGenerator};

/// Offset of the occurrence stream from the node's variable base.
pub const OCCURRENCE_VAR_OFFSET: u64 = 0;

/// Offset of the loss-magnitude stream from the node's variable base.
///
/// Variable bases are 32-bit, so this keeps loss streams disjoint from every
/// node's occurrence stream.
pub const LOSS_VAR_OFFSET: u64 = 1 << 32;

/// Derives `(entity_id, variable_base)` from a node id.
#[must_use]
pub fn stream_ids(node_id: &NodeId) -> (u64, u64) {
    let hash = blake3::hash(node_id.as_str().as_bytes());
    let bytes = hash.as_bytes();
    let mut entity = [0u8; 8];
    entity.copy_from_slice(&bytes[0..8]);
    let mut var = [0u8; 4];
    var.copy_from_slice(&bytes[8..12]);
    (u64::from_le_bytes(entity), u64::from(u32::from_le_bytes(var)))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_loss(x: f64) -> Loss {
    // Float-to-int `as` saturates: negatives and NaN become 0.
    x.round() as Loss
}

/// Samples one leaf's per-trial occurrence and loss.
#[derive(Debug, Clone)]
pub struct RiskSampler {
    node_id: NodeId,
    entity_id: u64,
    occurrence_var: u64,
    loss_var: u64,
    probability: f64,
    distribution: FittedDistribution,
    generator: TrialGenerator,
}

impl RiskSampler {
    /// Creates a sampler from already-fitted parts.
    #[must_use]
    pub fn new(
        node_id: NodeId,
        probability: f64,
        distribution: FittedDistribution,
        generator: TrialGenerator,
    ) -> Self {
        let (entity_id, var_base) = stream_ids(&node_id);
        Self {
            node_id,
            entity_id,
            occurrence_var: var_base.wrapping_add(OCCURRENCE_VAR_OFFSET),
            loss_var: var_base.wrapping_add(LOSS_VAR_OFFSET),
            probability,
            distribution,
            generator,
        }
    }

    /// Validates the leaf and fits its distribution.
    ///
    /// Fit failures are reported with the leaf's id.
    pub fn from_leaf(leaf: &RiskLeaf, generator: TrialGenerator, interval: LognormalInterval) -> RiskResult<Self> {
        leaf.validate()?;
        let distribution = FittedDistribution::fit(&leaf.distribution, interval).map_err(|source| {
            ExecutionError::DistributionFit {
                node_id: leaf.id.clone(),
                source,
            }
        })?;
        Ok(Self::new(leaf.id.clone(), leaf.probability, distribution, generator))
    }

    /// Node this sampler belongs to.
    #[must_use]
    pub const fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Whether the risk occurs in `trial`.
    #[must_use]
    #[inline]
    pub fn sample_occurrence(&self, trial: TrialId) -> bool {
        self.generator.uniform(trial, self.entity_id, self.occurrence_var) < self.probability
    }

    /// Loss magnitude in `trial`, regardless of occurrence.
    #[must_use]
    #[inline]
    pub fn sample_loss(&self, trial: TrialId) -> Loss {
        let u = self.generator.uniform(trial, self.entity_id, self.loss_var);
        to_loss(self.distribution.sample(u))
    }

    /// Loss of `trial` when the risk occurs and the loss is non-zero.
    #[must_use]
    #[inline]
    pub fn sample_trial(&self, trial: TrialId) -> Option<Loss> {
        if !self.sample_occurrence(trial) {
            return None;
        }
        let loss = self.sample_loss(trial);
        (loss > 0).then_some(loss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(id: &str, probability: f64) -> RiskLeaf {
        RiskLeaf::lognormal(NodeId::new(id).unwrap(), id, probability, 1_000.0, 100_000.0).unwrap()
    }

    fn sampler(id: &str, probability: f64) -> RiskSampler {
        RiskSampler::from_leaf(&leaf(id, probability), TrialGenerator::new(0, 0), LognormalInterval::P90).unwrap()
    }

    #[test]
    fn stream_ids_are_stable_and_distinct() {
        let a = NodeId::new("cyber").unwrap();
        let b = NodeId::new("hardware").unwrap();
        assert_eq!(stream_ids(&a), stream_ids(&a));
        assert_ne!(stream_ids(&a), stream_ids(&b));
        assert!(stream_ids(&a).1 < LOSS_VAR_OFFSET);
    }

    #[test]
    fn occurrence_rate_tracks_probability() {
        let s = sampler("cyber", 0.2);
        let hits = (0..50_000u64).filter(|&t| s.sample_occurrence(t)).count();
        #[allow(clippy::cast_precision_loss)]
        let rate = hits as f64 / 50_000.0;
        assert!((rate - 0.2).abs() < 0.01, "rate={rate}");
    }

    #[test]
    fn occurrence_and_loss_are_uncorrelated() {
        let s = sampler("cyber", 0.5);
        let n = 20_000u64;
        let (mut occurred_sum, mut occurred_n, mut quiet_sum, mut quiet_n) = (0f64, 0f64, 0f64, 0f64);
        for t in 0..n {
            #[allow(clippy::cast_precision_loss)]
            let loss = (s.sample_loss(t) as f64).max(1.0);
            if s.sample_occurrence(t) {
                occurred_sum += loss.ln();
                occurred_n += 1.0;
            } else {
                quiet_sum += loss.ln();
                quiet_n += 1.0;
            }
        }
        let diff = (occurred_sum / occurred_n - quiet_sum / quiet_n).abs();
        assert!(diff < 0.1, "mean log-loss differs by {diff}");
    }

    #[test]
    fn sample_trial_is_sparse() {
        let s = sampler("rare", 0.01);
        let stored = (0..10_000u64).filter_map(|t| s.sample_trial(t)).count();
        assert!(stored > 0 && stored < 200, "stored={stored}");
    }

    #[test]
    fn fit_failures_carry_node_id() {
        let bad = RiskLeaf {
            id: NodeId::new("skewed").unwrap(),
            name: "Skewed".to_string(),
            probability: 0.1,
            distribution: crate::node::LossDistributionSpec::Expert {
                percentiles: vec![0.1, 0.5, 0.9],
                quantiles: vec![1_000.0, 5_000.0, 50_000.0],
                terms: None,
                lower_bound: None,
                upper_bound: None,
            },
        };
        let err = RiskSampler::from_leaf(&bad, TrialGenerator::default(), LognormalInterval::P90).unwrap_err();
        let crate::error::RiskError::Execution(ExecutionError::DistributionFit { node_id, .. }) = err else {
            panic!("expected DistributionFit, got {err:?}");
        };
        assert_eq!(node_id.as_str(), "skewed");
    }
}
