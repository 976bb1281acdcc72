//! Monte Carlo execution.
//!
//! Leaves run their trials in parallel chunks on a bounded `rayon` pool and
//! portfolios combine their children's outcomes. A counting semaphore caps how
//! many resolves simulate at once across all trees.

pub mod cancel;
pub mod permits;
pub mod simulator;

pub use cancel::CancellationToken;
pub use permits::{SimulationPermit, SimulationPermits};
pub use simulator::{aggregate, simulate, Simulator, TRIAL_CHUNK};
