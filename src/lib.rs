//! # riskcurve - Reproducible Monte Carlo loss-exceedance curves
//!
//! riskcurve simulates hierarchical risk trees and serves loss-exceedance
//! curve (LEC) data from an in-memory, tree-scoped cache.
//!
//! ## Core Concepts
//!
//! - **RiskTree**: leaves with an occurrence probability and loss distribution,
//!   portfolios that aggregate their children
//! - **Outcome**: sparse per-node map of trial to loss, plus the trial count
//! - **Mitigation**: ordered deductible, cap and scale transforms over outcomes
//! - **RiskEngine**: cache-aside resolution, ancestor-path invalidation and
//!   curve generation
//!
//! Random draws come from a counter-based generator, so a given configuration
//! produces the same outcomes regardless of thread count or scheduling.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use riskcurve::{NodeId, RiskEngine, RiskLeaf, RiskPortfolio, RiskTree, SimulationConfig};
//!
//! let tree = RiskTree::new("Enterprise", vec![
//!     RiskPortfolio::new(NodeId::new("ops")?, "Operations", vec![NodeId::new("cyber")?])?.into(),
//!     RiskLeaf::lognormal(NodeId::new("cyber")?, "Cyber", 0.15, 10_000.0, 2_000_000.0)?.into(),
//! ])?;
//!
//! let engine = RiskEngine::new(SimulationConfig::default())?;
//! let curves = engine.lec_curves(&tree, &[NodeId::new("ops")?], None)?;
//! let quantiles = engine.quantiles(&tree, &NodeId::new("cyber")?)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Model
pub mod error;
pub mod node;
pub mod outcome;
pub mod tree;

// Sampling and simulation
pub mod sampling;
pub mod simulation;

// Transforms, caching and curves
pub mod cache;
pub mod config;
pub mod engine;
pub mod lec;
pub mod metrics;
pub mod mitigation;

// Re-export primary types at crate root for convenience
pub use cache::{InvalidationEvent, InvalidationReason, RiskResultCache, RiskResultResolver, TreeCacheManager};
pub use config::SimulationConfig;
pub use engine::RiskEngine;
pub use error::{DistributionError, ExecutionError, RiskError, RiskResult, StructuralError, ValidationError};
pub use lec::{calculate_quantiles, generate_curve_points, generate_curve_points_multi, CurveBundle, CurvePoint, Quantiles};
pub use metrics::{CountingMetrics, NoopMetrics, SimulationMetrics};
pub use mitigation::{InsurancePolicy, Mitigation, MitigationStep};
pub use node::{LossDistributionSpec, NodeId, RiskLeaf, RiskNode, RiskPortfolio};
pub use outcome::{combine, combine_all, Exceedance, Loss, Outcome, TreeOutcome, TrialId};
pub use sampling::{generate, FittedDistribution, LognormalInterval, LossDistribution, RiskSampler, TrialGenerator};
pub use simulation::{simulate, CancellationToken, SimulationPermits, Simulator};
pub use tree::{RiskTree, TreeId, TreeIndex};
