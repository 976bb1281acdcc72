//! Ordered loss transforms applied to outcomes.
//!
//! A [`Mitigation`] is a sequence of [`MitigationStep`]s. Sequences compose by
//! concatenation, which makes them a monoid with the empty sequence as the
//! identity. Order matters: a deductible before a scale is not the same as a
//! scale before a deductible.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::outcome::{Loss, Outcome};

/// One per-trial loss transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MitigationStep {
    /// Subtract `amount`; trials left with nothing are dropped.
    Deductible { amount: Loss },
    /// Clamp each loss to at most `limit`.
    Cap { limit: Loss },
    /// Multiply each loss by `factor` and round.
    Scale { factor: f64 },
}

impl MitigationStep {
    /// Transforms one loss. `None` means the trial no longer has a loss.
    #[must_use]
    pub fn apply_loss(&self, loss: Loss) -> Option<Loss> {
        let out = match *self {
            Self::Deductible { amount } => loss.saturating_sub(amount),
            Self::Cap { limit } => loss.min(limit),
            Self::Scale { factor } => scale_loss(loss, factor),
        };
        (out > 0).then_some(out)
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn scale_loss(loss: Loss, factor: f64) -> Loss {
    (loss as f64 * factor).round() as Loss
}

fn check_factor(factor: f64) -> Result<(), ValidationError> {
    if factor.is_finite() && factor >= 0.0 {
        Ok(())
    } else {
        Err(ValidationError::InvalidMitigation {
            field: "factor".to_string(),
            reason: format!("scale factor must be finite and non-negative, got {factor}"),
        })
    }
}

/// An ordered chain of loss transforms.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mitigation {
    steps: Vec<MitigationStep>,
}

impl Mitigation {
    /// The transform that leaves outcomes unchanged.
    #[must_use]
    pub fn identity() -> Self {
        Self::default()
    }

    /// Subtracts `amount` from every loss, dropping trials left at zero.
    #[must_use]
    pub fn deductible(amount: Loss) -> Self {
        Self {
            steps: vec![MitigationStep::Deductible { amount }],
        }
    }

    /// Clamps every loss to at most `limit`.
    #[must_use]
    pub fn cap(limit: Loss) -> Self {
        Self {
            steps: vec![MitigationStep::Cap { limit }],
        }
    }

    /// # Errors
    ///
    /// Returns `ValidationError::InvalidMitigation` for a negative or non-finite factor.
    pub fn scale(factor: f64) -> Result<Self, ValidationError> {
        check_factor(factor)?;
        Ok(Self {
            steps: vec![MitigationStep::Scale { factor }],
        })
    }

    /// Builds a chain from explicit steps, validating scale factors.
    pub fn from_steps(steps: Vec<MitigationStep>) -> Result<Self, ValidationError> {
        for step in &steps {
            if let MitigationStep::Scale { factor } = step {
                check_factor(*factor)?;
            }
        }
        Ok(Self { steps })
    }

    /// Applies `self`, then `next`.
    #[must_use]
    pub fn and_then(mut self, next: Self) -> Self {
        self.steps.extend(next.steps);
        self
    }

    /// Applies `first`, then `self`.
    #[must_use]
    pub fn compose(self, first: Self) -> Self {
        first.and_then(self)
    }

    /// Steps in application order.
    #[must_use]
    pub fn steps(&self) -> &[MitigationStep] {
        &self.steps
    }

    /// True when there are no steps.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.steps.is_empty()
    }

    /// Transforms every stored loss of `outcome`; the trial count is kept.
    #[must_use]
    pub fn apply(&self, outcome: &Outcome) -> Outcome {
        if self.steps.is_empty() {
            return outcome.clone();
        }
        outcome.map_losses(|loss| self.steps.iter().try_fold(loss, |acc, step| step.apply_loss(acc)))
    }
}

/// Subtracts `amount` from every loss.
#[must_use]
pub fn apply_deductible(outcome: &Outcome, amount: Loss) -> Outcome {
    Mitigation::deductible(amount).apply(outcome)
}

/// Clamps every loss to `limit`.
#[must_use]
pub fn cap_losses(outcome: &Outcome, limit: Loss) -> Outcome {
    Mitigation::cap(limit).apply(outcome)
}

/// Multiplies every loss by `factor`.
pub fn scale_losses(outcome: &Outcome, factor: f64) -> Result<Outcome, ValidationError> {
    Ok(Mitigation::scale(factor)?.apply(outcome))
}

/// A deductible followed by a cap on the residual loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsurancePolicy {
    deductible: Loss,
    cap: Loss,
}

impl InsurancePolicy {
    /// Creates a policy from signed amounts as they arrive from callers.
    ///
    /// # Errors
    ///
    /// Rejects a negative deductible and a cap that does not exceed the deductible.
    pub fn new(deductible: i64, cap: i64) -> Result<Self, ValidationError> {
        let Ok(deductible) = Loss::try_from(deductible) else {
            return Err(ValidationError::InvalidMitigation {
                field: "deductible".to_string(),
                reason: format!("must be non-negative, got {deductible}"),
            });
        };
        let cap_loss = Loss::try_from(cap).unwrap_or(0);
        if cap_loss <= deductible {
            return Err(ValidationError::InvalidMitigation {
                field: "cap".to_string(),
                reason: format!("must exceed deductible {deductible}, got {cap}"),
            });
        }
        Ok(Self {
            deductible,
            cap: cap_loss,
        })
    }

    /// Retained loss per trial.
    #[must_use]
    pub const fn deductible(&self) -> Loss {
        self.deductible
    }

    /// Largest loss the policy leaves in place.
    #[must_use]
    pub const fn cap(&self) -> Loss {
        self.cap
    }

    #[must_use]
    pub fn to_mitigation(&self) -> Mitigation {
        Mitigation::deductible(self.deductible).and_then(Mitigation::cap(self.cap))
    }

    #[must_use]
    pub fn apply(&self, outcome: &Outcome) -> Outcome {
        self.to_mitigation().apply(outcome)
    }
}

impl From<InsurancePolicy> for Mitigation {
    fn from(policy: InsurancePolicy) -> Self {
        policy.to_mitigation()
    }
}
