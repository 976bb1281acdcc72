//! Simulation configuration.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::sampling::{LognormalInterval, TrialGenerator};

/// Settings that every simulation and cache lookup of an engine shares.
///
/// Missing JSON fields take their default values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Trials per simulation.
    pub n_trials: u64,
    /// Worker threads used for trials, children and batch resolves.
    pub parallelism: usize,
    pub seed3: u64,
    pub seed4: u64,
    /// Deepest tree (in edges below the root) the resolver accepts.
    pub max_tree_depth: usize,
    /// Resolves allowed to simulate at once across all trees.
    pub max_concurrent_simulations: usize,
    /// Interval that lognormal `(min_loss, max_loss)` bounds span.
    pub lognormal_interval: LognormalInterval,
    /// Ticks per loss-exceedance curve when the caller does not choose.
    pub default_tick_count: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            n_trials: 10_000,
            parallelism: 4,
            seed3: 0,
            seed4: 0,
            max_tree_depth: 5,
            max_concurrent_simulations: 4,
            lognormal_interval: LognormalInterval::P90,
            default_tick_count: 100,
        }
    }
}

fn invalid(field: &str, reason: &str) -> ValidationError {
    ValidationError::InvalidConfig {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

impl SimulationConfig {
    /// Validate the configuration.
    ///
    /// This must be called before constructing an engine.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.n_trials == 0 {
            return Err(invalid("n_trials", "must be > 0"));
        }
        if self.parallelism == 0 {
            return Err(invalid("parallelism", "must be > 0"));
        }
        if self.max_tree_depth == 0 {
            return Err(invalid("max_tree_depth", "must be > 0"));
        }
        if self.max_concurrent_simulations == 0 {
            return Err(invalid("max_concurrent_simulations", "must be > 0"));
        }
        if self.default_tick_count < 2 {
            return Err(invalid("default_tick_count", "must be >= 2"));
        }
        Ok(())
    }

    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ValidationError> {
        let config: Self = serde_json::from_str(json).map_err(|e| invalid("json", &e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Generator seeded from this configuration.
    #[must_use]
    pub const fn generator(&self) -> TrialGenerator {
        TrialGenerator::new(self.seed3, self.seed4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        SimulationConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_zero_limits() {
        let mut c = SimulationConfig::default();
        c.n_trials = 0;
        assert!(c.validate().is_err());

        let mut c = SimulationConfig::default();
        c.parallelism = 0;
        assert!(c.validate().is_err());

        let mut c = SimulationConfig::default();
        c.max_tree_depth = 0;
        assert!(c.validate().is_err());

        let mut c = SimulationConfig::default();
        c.max_concurrent_simulations = 0;
        assert!(c.validate().is_err());

        let mut c = SimulationConfig::default();
        c.default_tick_count = 1;
        let err = c.validate().unwrap_err();
        assert_eq!(err.field(), Some("default_tick_count"));
        assert_eq!(err.code(), "invalid_config");
    }

    #[test]
    fn json_fills_in_defaults() {
        let c = SimulationConfig::from_json_str(r#"{"n_trials": 500, "lognormal_interval": "p80"}"#).unwrap();
        assert_eq!(c.n_trials, 500);
        assert_eq!(c.lognormal_interval, LognormalInterval::P80);
        assert_eq!(c.parallelism, 4);
    }

    #[test]
    fn json_is_validated() {
        assert!(SimulationConfig::from_json_str(r#"{"parallelism": 0}"#).is_err());
        assert!(SimulationConfig::from_json_str("not json").is_err());
    }
}
