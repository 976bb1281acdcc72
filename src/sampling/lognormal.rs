//! Closed-form lognormal fitted to a confidence interval.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DistributionError, ValidationError};

use super::normal::inverse_normal_cdf;
use super::LossDistribution;

/// Two-sided interval that a lognormal's `(min_loss, max_loss)` pair spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LognormalInterval {
    /// 10th to 90th percentile.
    P80,
    /// 5th to 95th percentile.
    #[default]
    P90,
}

impl LognormalInterval {
    /// Width of the interval in standard-normal units.
    #[must_use]
    pub const fn z_span(self) -> f64 {
        match self {
            Self::P80 => 2.0 * 1.281_551_565_544_600_4,
            Self::P90 => 2.0 * 1.644_853_626_951_472_2,
        }
    }

    /// Percentile that `min_loss` is matched to.
    #[must_use]
    pub const fn lower_percentile(self) -> f64 {
        match self {
            Self::P80 => 0.10,
            Self::P90 => 0.05,
        }
    }

    /// Percentile that `max_loss` is matched to.
    #[must_use]
    pub const fn upper_percentile(self) -> f64 {
        match self {
            Self::P80 => 0.90,
            Self::P90 => 0.95,
        }
    }
}

impl fmt::Display for LognormalInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::P80 => write!(f, "p80"),
            Self::P90 => write!(f, "p90"),
        }
    }
}

/// Lognormal loss distribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LognormalDistribution {
    mean_log: f64,
    std_log: f64,
}

impl LognormalDistribution {
    /// Fits a lognormal whose interval percentiles equal `lo` and `hi`.
    pub fn from_interval(lo: f64, hi: f64, interval: LognormalInterval) -> Result<Self, DistributionError> {
        if !(lo.is_finite() && lo > 0.0) {
            return Err(ValidationError::InvalidBounds {
                field: "min_loss".to_string(),
                reason: format!("must be positive and finite, got {lo}"),
            }
            .into());
        }
        if !(hi.is_finite() && hi > lo) {
            return Err(ValidationError::InvalidBounds {
                field: "max_loss".to_string(),
                reason: format!("must be finite and greater than min_loss {lo}, got {hi}"),
            }
            .into());
        }

        let (ln_lo, ln_hi) = (lo.ln(), hi.ln());
        Ok(Self {
            mean_log: (ln_hi + ln_lo) / 2.0,
            std_log: (ln_hi - ln_lo) / interval.z_span(),
        })
    }

    /// Mean of the underlying normal.
    #[must_use]
    pub const fn mean_log(&self) -> f64 {
        self.mean_log
    }

    /// Standard deviation of the underlying normal.
    #[must_use]
    pub const fn std_log(&self) -> f64 {
        self.std_log
    }
}

impl LossDistribution for LognormalDistribution {
    fn quantile(&self, p: f64) -> f64 {
        if p <= 0.0 {
            return 0.0;
        }
        (self.mean_log + self.std_log * inverse_normal_cdf(p)).exp()
    }
}
