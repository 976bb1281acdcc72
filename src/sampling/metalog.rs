//! Percentile-fit (metalog) distribution.
//!
//! The quantile function is a linear combination of basis functions of
//! `logit(p)` and `p - 0.5`, fitted by least squares to the expert's
//! percentile/quantile pairs. With as many terms as points the fit
//! interpolates the inputs exactly. Lower and/or upper bounds switch the fit
//! into log or logit space so sampled values can never leave the support.

use serde::{Deserialize, Serialize};

use crate::error::{DistributionError, ValidationError};

use super::LossDistribution;

/// Largest supported number of basis terms.
pub const MAX_TERMS: usize = 16;

/// Probabilities are clamped into `[P_EPS, 1 - P_EPS]` before evaluating `logit`.
const P_EPS: f64 = 1e-12;

/// Support of a metalog.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetalogBounds {
    Unbounded,
    Lower { lower: f64 },
    Upper { upper: f64 },
    Bounded { lower: f64, upper: f64 },
}

impl MetalogBounds {
    /// Builds the support from optional bounds.
    pub fn from_options(lower: Option<f64>, upper: Option<f64>) -> Result<Self, DistributionError> {
        match (lower, upper) {
            (None, None) => Ok(Self::Unbounded),
            (Some(lower), None) if lower.is_finite() => Ok(Self::Lower { lower }),
            (None, Some(upper)) if upper.is_finite() => Ok(Self::Upper { upper }),
            (Some(lower), Some(upper)) if lower.is_finite() && upper.is_finite() && lower < upper => {
                Ok(Self::Bounded { lower, upper })
            }
            (lower, upper) => Err(ValidationError::InvalidBounds {
                field: "lower_bound".to_string(),
                reason: format!("bounds must be finite with lower < upper, got {lower:?} and {upper:?}"),
            }
            .into()),
        }
    }

    fn to_fit_space(self, x: f64) -> Result<f64, DistributionError> {
        let out_of_support = |field: &str| {
            DistributionError::from(ValidationError::InvalidBounds {
                field: field.to_string(),
                reason: format!("quantile {x} lies outside the support"),
            })
        };
        match self {
            Self::Unbounded => Ok(x),
            Self::Lower { lower } => {
                if x <= lower {
                    return Err(out_of_support("lower_bound"));
                }
                Ok((x - lower).ln())
            }
            Self::Upper { upper } => {
                if x >= upper {
                    return Err(out_of_support("upper_bound"));
                }
                Ok(-(upper - x).ln())
            }
            Self::Bounded { lower, upper } => {
                if x <= lower {
                    return Err(out_of_support("lower_bound"));
                }
                if x >= upper {
                    return Err(out_of_support("upper_bound"));
                }
                Ok(((x - lower) / (upper - x)).ln())
            }
        }
    }

    fn from_fit_space(self, m: f64) -> f64 {
        match self {
            Self::Unbounded => m,
            Self::Lower { lower } => lower + m.exp(),
            Self::Upper { upper } => upper - (-m).exp(),
            Self::Bounded { lower, upper } => lower + (upper - lower) * sigmoid(m),
        }
    }

    const fn lower(self) -> Option<f64> {
        match self {
            Self::Lower { lower } | Self::Bounded { lower, .. } => Some(lower),
            Self::Unbounded | Self::Upper { .. } => None,
        }
    }

    const fn upper(self) -> Option<f64> {
        match self {
            Self::Upper { upper } | Self::Bounded { upper, .. } => Some(upper),
            Self::Unbounded | Self::Lower { .. } => None,
        }
    }
}

fn sigmoid(m: f64) -> f64 {
    if m >= 0.0 {
        1.0 / (1.0 + (-m).exp())
    } else {
        let e = m.exp();
        e / (1.0 + e)
    }
}

fn logit(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}

/// Value of basis function `j` (zero-based) at `p`.
fn basis(j: usize, logit_p: f64, centred: f64) -> f64 {
    match j {
        0 => 1.0,
        1 => logit_p,
        2 => centred * logit_p,
        3 => centred,
        _ => {
            #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
            let power = centred.powi((j / 2) as i32);
            if j % 2 == 0 {
                power
            } else {
                power * logit_p
            }
        }
    }
}

/// Solves `a x = b` by Gaussian elimination with partial pivoting.
///
/// Returns `None` when the system is numerically singular.
fn solve_linear(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    let scale = a
        .iter()
        .flat_map(|row| row.iter())
        .fold(0.0f64, |acc, v| acc.max(v.abs()));
    if scale == 0.0 {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let tolerance = scale * f64::EPSILON * 64.0 * n as f64;

    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() <= tolerance {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        let pivot_row = a[col].clone();
        for row in (col + 1)..n {
            let factor = a[row][col] / pivot_row[col];
            if factor == 0.0 {
                continue;
            }
            for (k, value) in pivot_row.iter().enumerate().skip(col) {
                a[row][k] -= factor * value;
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = ((row + 1)..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    if x.iter().all(|v| v.is_finite()) {
        Some(x)
    } else {
        None
    }
}

/// Probabilities at which a fitted quantile function must be non-decreasing.
fn monotonicity_grid() -> impl Iterator<Item = f64> {
    const TAILS: [f64; 3] = [1e-6, 1e-5, 1e-4];
    TAILS
        .into_iter()
        .chain((1..1000).map(|i| f64::from(i) / 1000.0))
        .chain(TAILS.into_iter().rev().map(|t| 1.0 - t))
}

/// Fitted percentile distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetalogDistribution {
    coefficients: Vec<f64>,
    bounds: MetalogBounds,
}

impl MetalogDistribution {
    /// Fits `terms` coefficients to the given percentile/quantile pairs.
    ///
    /// # Errors
    ///
    /// - `Invalid` for mismatched lengths, fewer than two points, percentiles
    ///   outside (0, 1) or quantiles outside the bounds.
    /// - `IncompatibleTerms` when `terms` is below 2 or above the point count.
    /// - `IllPosed` when the design matrix is singular.
    /// - `NonMonotone` when the fitted quantile function decreases anywhere.
    pub fn from_percentiles(
        percentiles: &[f64],
        quantiles: &[f64],
        terms: usize,
        lower: Option<f64>,
        upper: Option<f64>,
    ) -> Result<Self, DistributionError> {
        if percentiles.len() != quantiles.len() {
            return Err(ValidationError::LengthMismatch {
                left: "percentiles".to_string(),
                left_len: percentiles.len(),
                right: "quantiles".to_string(),
                right_len: quantiles.len(),
            }
            .into());
        }
        let points = percentiles.len();
        if points < 2 {
            return Err(ValidationError::InsufficientPoints {
                field: "percentiles".to_string(),
                min: 2,
                actual: points,
            }
            .into());
        }
        if terms < 2 || terms > points || terms > MAX_TERMS {
            return Err(DistributionError::IncompatibleTerms { terms, points });
        }
        if let Some(&p) = percentiles.iter().find(|p| !(p.is_finite() && **p > 0.0 && **p < 1.0)) {
            return Err(ValidationError::ProbabilityOutOfRange {
                field: "percentiles".to_string(),
                value: p,
            }
            .into());
        }

        let bounds = MetalogBounds::from_options(lower, upper)?;
        let targets = quantiles
            .iter()
            .map(|&q| bounds.to_fit_space(q))
            .collect::<Result<Vec<_>, _>>()?;

        let design: Vec<Vec<f64>> = percentiles
            .iter()
            .map(|&p| {
                let (l, c) = (logit(p), p - 0.5);
                (0..terms).map(|j| basis(j, l, c)).collect()
            })
            .collect();

        let coefficients = if terms == points {
            solve_linear(design, targets)
        } else {
            // Normal equations: (Yᵀ Y) a = Yᵀ z.
            let mut gram = vec![vec![0.0; terms]; terms];
            let mut rhs = vec![0.0; terms];
            for (row, &z) in design.iter().zip(&targets) {
                for i in 0..terms {
                    rhs[i] += row[i] * z;
                    for j in 0..terms {
                        gram[i][j] += row[i] * row[j];
                    }
                }
            }
            solve_linear(gram, rhs)
        }
        .ok_or_else(|| DistributionError::IllPosed {
            reason: format!("singular design matrix for {points} points and {terms} terms"),
        })?;

        let fitted = Self { coefficients, bounds };
        fitted.check_monotone()?;
        Ok(fitted)
    }

    fn check_monotone(&self) -> Result<(), DistributionError> {
        let mut prev = f64::NEG_INFINITY;
        for p in monotonicity_grid() {
            let m = self.evaluate_fit_space(p);
            if !m.is_finite() {
                return Err(DistributionError::IllPosed {
                    reason: format!("non-finite quantile at p={p}"),
                });
            }
            if m < prev - 1e-9 * prev.abs().max(1.0) {
                return Err(DistributionError::NonMonotone { p });
            }
            prev = m;
        }
        Ok(())
    }

    fn evaluate_fit_space(&self, p: f64) -> f64 {
        let (l, c) = (logit(p), p - 0.5);
        self.coefficients
            .iter()
            .enumerate()
            .map(|(j, a)| a * basis(j, l, c))
            .sum()
    }

    /// Fitted coefficients, lowest-order first.
    #[must_use]
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    /// Support of the distribution.
    #[must_use]
    pub const fn bounds(&self) -> MetalogBounds {
        self.bounds
    }
}

impl LossDistribution for MetalogDistribution {
    fn quantile(&self, p: f64) -> f64 {
        if p <= 0.0 {
            if let Some(lower) = self.bounds.lower() {
                return lower;
            }
        }
        if p >= 1.0 {
            if let Some(upper) = self.bounds.upper() {
                return upper;
            }
        }
        let p = p.clamp(P_EPS, 1.0 - P_EPS);
        self.bounds.from_fit_space(self.evaluate_fit_space(p))
    }
}
