//! Counter-based uniform generator.
//!
//! Every draw is a pure function of `(counter, entity, variable, seed3, seed4)`.
//! There is no internal state, so trials can be evaluated in any order and on
//! any thread and still produce the same values.

use serde::{Deserialize, Serialize};

const SPLITMIX_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;
const STREAM_SALT: u64 = 0xD6E8_FEB8_6659_FD93;

/// 2^-53, the spacing of the output grid.
const UNIT: f64 = 1.0 / (1u64 << 53) as f64;

#[inline]
fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(SPLITMIX_GAMMA);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Maps five integers to a uniform value in `[0, 1)`.
///
/// Each input is folded through one splitmix64 round, so changing any single
/// input yields an unrelated output.
#[must_use]
#[inline]
pub fn generate(counter: u64, entity_id: u64, var_id: u64, seed3: u64, seed4: u64) -> f64 {
    let mut h = splitmix64(seed3 ^ STREAM_SALT);
    h = splitmix64(h ^ seed4);
    h = splitmix64(h ^ entity_id);
    h = splitmix64(h ^ var_id);
    h = splitmix64(h ^ counter);
    #[allow(clippy::cast_precision_loss)]
    let value = (h >> 11) as f64 * UNIT;
    value
}

/// The two global seeds bound to a simulation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TrialGenerator {
    pub seed3: u64,
    pub seed4: u64,
}

impl TrialGenerator {
    /// Creates a generator for the given seeds.
    #[must_use]
    pub const fn new(seed3: u64, seed4: u64) -> Self {
        Self { seed3, seed4 }
    }

    /// Uniform draw for one trial of one stream.
    #[must_use]
    #[inline]
    pub fn uniform(&self, trial: u64, entity_id: u64, var_id: u64) -> f64 {
        generate(trial, entity_id, var_id, self.seed3, self.seed4)
    }
}
