//! Random draws and loss distributions.
//!
//! Everything here is deterministic: the generator is a pure hash of its
//! inputs and distributions are evaluated by inverse transform.

pub mod generator;
pub mod lognormal;
pub mod metalog;
pub mod normal;
pub mod sampler;

use std::fmt;

pub use generator::{generate, TrialGenerator};
pub use lognormal::{LognormalDistribution, LognormalInterval};
pub use metalog::{MetalogBounds, MetalogDistribution};
pub use normal::inverse_normal_cdf;
pub use sampler::RiskSampler;

use crate::error::DistributionError;
use crate::node::LossDistributionSpec;

/// A loss distribution evaluated by its quantile function.
pub trait LossDistribution: Send + Sync + fmt::Debug {
    /// Inverse CDF at `p` in `[0, 1]`.
    fn quantile(&self, p: f64) -> f64;

    /// Inverse-transform sample for a uniform draw `u`.
    fn sample(&self, u: f64) -> f64 {
        self.quantile(u)
    }
}

/// A distribution fitted from a leaf's parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum FittedDistribution {
    Metalog(MetalogDistribution),
    Lognormal(LognormalDistribution),
}

impl FittedDistribution {
    /// Fits the distribution described by `spec`.
    ///
    /// `interval` selects the confidence interval that lognormal bounds span.
    pub fn fit(spec: &LossDistributionSpec, interval: LognormalInterval) -> Result<Self, DistributionError> {
        match spec {
            LossDistributionSpec::Expert {
                percentiles,
                quantiles,
                terms,
                lower_bound,
                upper_bound,
            } => {
                let terms = terms.unwrap_or(percentiles.len());
                MetalogDistribution::from_percentiles(percentiles, quantiles, terms, *lower_bound, *upper_bound)
                    .map(Self::Metalog)
            }
            LossDistributionSpec::Lognormal { min_loss, max_loss } => {
                LognormalDistribution::from_interval(*min_loss, *max_loss, interval).map(Self::Lognormal)
            }
        }
    }
}

impl LossDistribution for FittedDistribution {
    fn quantile(&self, p: f64) -> f64 {
        match self {
            Self::Metalog(d) => d.quantile(p),
            Self::Lognormal(d) => d.quantile(p),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_dispatches_on_kind() {
        let expert = LossDistributionSpec::Expert {
            percentiles: vec![0.1, 0.5, 0.9],
            quantiles: vec![1_000.0, 2_000.0, 3_500.0],
            terms: None,
            lower_bound: None,
            upper_bound: None,
        };
        let fitted = FittedDistribution::fit(&expert, LognormalInterval::P90).unwrap();
        assert!(matches!(fitted, FittedDistribution::Metalog(_)));
        assert!((fitted.sample(0.5) - 2_000.0).abs() < 1e-6);

        let lognormal = LossDistributionSpec::Lognormal {
            min_loss: 100.0,
            max_loss: 10_000.0,
        };
        let fitted = FittedDistribution::fit(&lognormal, LognormalInterval::P90).unwrap();
        assert!(matches!(fitted, FittedDistribution::Lognormal(_)));
        assert!((fitted.quantile(0.5) - 1_000.0).abs() < 1e-6);
    }

    #[test]
    fn fit_reports_term_incompatibility() {
        let expert = LossDistributionSpec::Expert {
            percentiles: vec![0.1, 0.9],
            quantiles: vec![1.0, 2.0],
            terms: Some(4),
            lower_bound: None,
            upper_bound: None,
        };
        let err = FittedDistribution::fit(&expert, LognormalInterval::P90).unwrap_err();
        assert_eq!(err, DistributionError::IncompatibleTerms { terms: 4, points: 2 });
    }
}
