//! Loss-exceedance curves and loss quantiles.
//!
//! Curves are derived from outcomes on demand. Several curves shown together
//! share one tick sequence, and every point is an exact exceedance count at
//! its tick, never an interpolation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::node::NodeId;
use crate::outcome::{Exceedance, Loss, Outcome};

/// Exceedance below which the tail of a curve is considered flat.
pub const TAIL_CUTOFF: Exceedance = Exceedance::new(1, 200);

/// Ticks extend this far past the largest observed loss.
pub const TICK_HEADROOM: f64 = 1.1;

/// One point of a loss-exceedance curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub loss: Loss,
    pub exceedance: Exceedance,
}

impl CurvePoint {
    /// Exceedance as a probability.
    #[must_use]
    pub fn probability(&self) -> f64 {
        self.exceedance.as_f64()
    }
}

/// Curves for several nodes over one shared tick sequence.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CurveBundle {
    pub ticks: Vec<Loss>,
    pub curves: BTreeMap<NodeId, Vec<Exceedance>>,
}

impl CurveBundle {
    /// Builds a bundle from outcomes keyed by node.
    pub fn from_outcomes<'a>(
        outcomes: impl IntoIterator<Item = (NodeId, &'a Outcome)>,
        tick_count: usize,
    ) -> Result<Self, ValidationError> {
        let (ticks, curves) = shared_curves(outcomes, tick_count)?;
        Ok(Self { ticks, curves })
    }

    /// The curve of one node as points.
    #[must_use]
    pub fn points(&self, id: &NodeId) -> Option<Vec<CurvePoint>> {
        self.curves.get(id).map(|curve| zip_points(&self.ticks, curve))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.curves.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.curves.is_empty()
    }
}

fn zip_points(ticks: &[Loss], curve: &[Exceedance]) -> Vec<CurvePoint> {
    ticks
        .iter()
        .zip(curve)
        .map(|(loss, exceedance)| CurvePoint {
            loss: *loss,
            exceedance: *exceedance,
        })
        .collect()
}

/// Evenly spaced ticks over `[max(1, min_loss), max_loss * 1.1]`.
///
/// Rounding can merge neighbouring ticks on narrow ranges; merged ticks are
/// kept once.
pub fn loss_ticks(min_loss: Loss, max_loss: Loss, tick_count: usize) -> Result<Vec<Loss>, ValidationError> {
    if tick_count < 2 {
        return Err(ValidationError::InvalidConfig {
            field: "tick_count".to_string(),
            reason: format!("must be >= 2, got {tick_count}"),
        });
    }
    #[allow(clippy::cast_precision_loss)]
    let (lo, hi) = (min_loss.max(1) as f64, max_loss.max(min_loss).max(1) as f64 * TICK_HEADROOM);
    #[allow(clippy::cast_precision_loss)]
    let steps = (tick_count - 1) as f64;

    let mut ticks: Vec<Loss> = (0..tick_count)
        .map(|i| {
            #[allow(clippy::cast_precision_loss)]
            let fraction = i as f64 / steps;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let tick = (lo + (hi - lo) * fraction).round() as Loss;
            tick
        })
        .collect();
    ticks.dedup();
    Ok(ticks)
}

/// Counts trials at or above each tick. `ticks` must be ascending.
fn exceedance_at(outcome: &Outcome, ticks: &[Loss]) -> Vec<Exceedance> {
    let sorted = outcome.sorted_losses();
    ticks
        .iter()
        .map(|&tick| {
            if tick == 0 {
                return outcome.prob_of_exceedance(0);
            }
            let below = sorted.partition_point(|loss| *loss < tick);
            Exceedance::new((sorted.len() - below) as u64, outcome.n_trials())
        })
        .collect()
}

/// Index one past the last tick worth showing.
fn trimmed_len<'a>(curves: impl IntoIterator<Item = &'a Vec<Exceedance>> + Clone, len: usize) -> usize {
    let last_informative = (0..len)
        .rev()
        .find(|&i| curves.clone().into_iter().any(|curve| curve[i] > TAIL_CUTOFF));
    match last_informative {
        Some(i) => (i + 2).min(len),
        None => len,
    }
}

fn shared_curves<'a, K: Ord>(
    outcomes: impl IntoIterator<Item = (K, &'a Outcome)>,
    tick_count: usize,
) -> Result<(Vec<Loss>, BTreeMap<K, Vec<Exceedance>>), ValidationError> {
    let outcomes: Vec<(K, &Outcome)> = outcomes.into_iter().collect();
    let min = outcomes.iter().filter_map(|(_, o)| o.min_loss()).min();
    let max = outcomes.iter().filter_map(|(_, o)| o.max_loss()).max();

    let (Some(min), Some(max)) = (min, max) else {
        if tick_count < 2 {
            loss_ticks(0, 0, tick_count)?;
        }
        let curves = outcomes.into_iter().map(|(key, _)| (key, Vec::new())).collect();
        return Ok((Vec::new(), curves));
    };

    let mut ticks = loss_ticks(min, max, tick_count)?;
    let mut curves: BTreeMap<K, Vec<Exceedance>> = outcomes
        .into_iter()
        .map(|(key, outcome)| (key, exceedance_at(outcome, &ticks)))
        .collect();

    let keep = trimmed_len(curves.values(), ticks.len());
    ticks.truncate(keep);
    for curve in curves.values_mut() {
        curve.truncate(keep);
    }
    Ok((ticks, curves))
}

/// Curve points for one outcome. An outcome without losses has no points.
pub fn generate_curve_points(outcome: &Outcome, tick_count: usize) -> Result<Vec<CurvePoint>, ValidationError> {
    let (ticks, curves) = shared_curves([((), outcome)], tick_count)?;
    Ok(curves.get(&()).map(|curve| zip_points(&ticks, curve)).unwrap_or_default())
}

/// Curve points for several outcomes over one shared tick sequence.
pub fn generate_curve_points_multi<'a, K: Ord>(
    outcomes: impl IntoIterator<Item = (K, &'a Outcome)>,
    tick_count: usize,
) -> Result<BTreeMap<K, Vec<CurvePoint>>, ValidationError> {
    let (ticks, curves) = shared_curves(outcomes, tick_count)?;
    Ok(curves
        .into_iter()
        .map(|(key, curve)| (key, zip_points(&ticks, &curve)))
        .collect())
}

/// Loss levels at common percentiles of the full trial population.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Quantiles {
    pub p50: Loss,
    pub p90: Loss,
    pub p95: Loss,
    pub p99: Loss,
}

/// Nearest-rank percentile, counting trials without a stored loss as zero.
fn nearest_rank(sorted: &[Loss], n_trials: u64, percent: u64) -> Loss {
    if n_trials == 0 {
        return 0;
    }
    let rank = (u128::from(n_trials) * u128::from(percent)).div_ceil(100).max(1);
    let zeros = u128::from(n_trials) - sorted.len() as u128;
    if rank <= zeros {
        return 0;
    }
    usize::try_from(rank - zeros - 1)
        .ok()
        .and_then(|idx| sorted.get(idx))
        .copied()
        .unwrap_or(0)
}

/// p50, p90, p95 and p99 of an outcome's per-trial losses.
#[must_use]
pub fn calculate_quantiles(outcome: &Outcome) -> Quantiles {
    let sorted = outcome.sorted_losses();
    let n = outcome.n_trials();
    Quantiles {
        p50: nearest_rank(&sorted, n, 50),
        p90: nearest_rank(&sorted, n, 90),
        p95: nearest_rank(&sorted, n, 95),
        p99: nearest_rank(&sorted, n, 99),
    }
}
