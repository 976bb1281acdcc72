//! Error types for riskcurve.
//!
//! All errors are strongly typed using thiserror. Validation and structural
//! failures carry the offending field or node id and a machine-readable code
//! so callers can surface them as structured responses.

use thiserror::Error;

use crate::node::NodeId;

/// Validation errors that occur while checking node parameters or configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Field '{field}' value {value} is outside the open interval (0, 1)")]
    ProbabilityOutOfRange {
        field: String,
        value: f64,
    },

    #[error("Fields '{left}' ({left_len}) and '{right}' ({right_len}) must have equal length")]
    LengthMismatch {
        left: String,
        left_len: usize,
        right: String,
        right_len: usize,
    },

    #[error("Field '{field}' needs at least {min} points, got {actual}")]
    InsufficientPoints {
        field: String,
        min: usize,
        actual: usize,
    },

    #[error("Field '{field}' must be increasing")]
    NotIncreasing {
        field: String,
    },

    #[error("Invalid bounds for '{field}': {reason}")]
    InvalidBounds {
        field: String,
        reason: String,
    },

    #[error("Field '{field}' value {value} is out of range: {reason}")]
    OutOfRange {
        field: String,
        value: f64,
        reason: String,
    },

    #[error("Invalid node id '{value}': {reason}")]
    InvalidNodeId {
        value: String,
        reason: String,
    },

    #[error("Field '{field}' cannot be empty")]
    EmptyField {
        field: String,
    },

    #[error("Invalid configuration '{field}': {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    #[error("Invalid mitigation '{field}': {reason}")]
    InvalidMitigation {
        field: String,
        reason: String,
    },
}

impl ValidationError {
    /// Machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ProbabilityOutOfRange { .. } => "probability_out_of_range",
            Self::LengthMismatch { .. } => "length_mismatch",
            Self::InsufficientPoints { .. } => "insufficient_points",
            Self::NotIncreasing { .. } => "not_increasing",
            Self::InvalidBounds { .. } => "invalid_bounds",
            Self::OutOfRange { .. } => "out_of_range",
            Self::InvalidNodeId { .. } => "invalid_node_id",
            Self::EmptyField { .. } => "empty_field",
            Self::InvalidConfig { .. } => "invalid_config",
            Self::InvalidMitigation { .. } => "invalid_mitigation",
        }
    }

    /// Name of the offending field, when the error concerns a single field.
    #[must_use]
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::ProbabilityOutOfRange { field, .. }
            | Self::InsufficientPoints { field, .. }
            | Self::NotIncreasing { field }
            | Self::InvalidBounds { field, .. }
            | Self::OutOfRange { field, .. }
            | Self::EmptyField { field }
            | Self::InvalidConfig { field, .. }
            | Self::InvalidMitigation { field, .. } => Some(field),
            Self::LengthMismatch { left, .. } => Some(left),
            Self::InvalidNodeId { .. } => Some("id"),
        }
    }
}

/// Errors describing an ill-formed tree or a lookup against the wrong tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralError {
    #[error("Node not found in tree index: {id}")]
    NodeNotFound {
        id: NodeId,
    },

    #[error("Duplicate node id: {id}")]
    DuplicateNode {
        id: NodeId,
    },

    #[error("Portfolio {portfolio} references missing child {child}")]
    MissingChild {
        portfolio: NodeId,
        child: NodeId,
    },

    #[error("Node {id} has more than one parent ({first}, {second})")]
    MultipleParents {
        id: NodeId,
        first: NodeId,
        second: NodeId,
    },

    #[error("Node {id} declares parent {declared} but is a child of {actual:?}")]
    ParentMismatch {
        id: NodeId,
        declared: NodeId,
        actual: Option<NodeId>,
    },

    #[error("Tree has no root node")]
    NoRoot,

    #[error("Tree has more than one root: {roots:?}")]
    MultipleRoots {
        roots: Vec<NodeId>,
    },

    #[error("Cycle detected at node {id}")]
    Cycle {
        id: NodeId,
    },

    #[error("Portfolio {id} has no children")]
    EmptyPortfolio {
        id: NodeId,
    },

    #[error("Tree depth {depth} exceeds configured maximum {max_depth}")]
    TreeTooDeep {
        depth: usize,
        max_depth: usize,
    },

    #[error("Tree is empty")]
    EmptyTree,
}

impl StructuralError {
    /// Machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NodeNotFound { .. } => "node_not_found",
            Self::DuplicateNode { .. } => "duplicate_node",
            Self::MissingChild { .. } => "missing_child",
            Self::MultipleParents { .. } => "multiple_parents",
            Self::ParentMismatch { .. } => "parent_mismatch",
            Self::NoRoot => "no_root",
            Self::MultipleRoots { .. } => "multiple_roots",
            Self::Cycle { .. } => "cycle",
            Self::EmptyPortfolio { .. } => "empty_portfolio",
            Self::TreeTooDeep { .. } => "tree_too_deep",
            Self::EmptyTree => "empty_tree",
        }
    }
}

/// Failures while fitting or constructing a loss distribution.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DistributionError {
    #[error("Fitted quantile function is not monotone near p={p}")]
    NonMonotone {
        p: f64,
    },

    #[error("Fit is ill-posed: {reason}")]
    IllPosed {
        reason: String,
    },

    #[error("Cannot fit {terms} terms to {points} points")]
    IncompatibleTerms {
        terms: usize,
        points: usize,
    },

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Execution errors raised while simulating or resolving.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Simulation of {node_id} was cancelled")]
    Cancelled {
        node_id: NodeId,
    },

    #[error("Cannot combine outcomes with {left} and {right} trials")]
    TrialCountMismatch {
        left: u64,
        right: u64,
    },

    #[error("Distribution fit failed for {node_id}: {source}")]
    DistributionFit {
        node_id: NodeId,
        #[source]
        source: DistributionError,
    },

    #[error("Cache error: {message}")]
    Cache {
        message: String,
    },

    #[error("Thread pool error: {message}")]
    ThreadPool {
        message: String,
    },
}

/// Top-level error type for riskcurve.
#[derive(Debug, Error)]
pub enum RiskError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Structural error: {0}")]
    Structural(#[from] StructuralError),

    #[error("Distribution error: {0}")]
    Distribution(#[from] DistributionError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),
}

impl RiskError {
    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a structural error.
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        matches!(self, Self::Structural(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if the caller may retry the same request.
    ///
    /// Only cancellation qualifies; every other failure is deterministic.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Execution(ExecutionError::Cancelled { .. }))
    }

    /// Machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(e) => e.code(),
            Self::Structural(e) => e.code(),
            Self::Distribution(_) => "distribution_fit_failed",
            Self::Execution(e) => match e {
                ExecutionError::Cancelled { .. } => "cancelled",
                ExecutionError::TrialCountMismatch { .. } => "trial_count_mismatch",
                ExecutionError::DistributionFit { .. } => "distribution_fit_failed",
                ExecutionError::Cache { .. } => "cache_error",
                ExecutionError::ThreadPool { .. } => "thread_pool_error",
            },
        }
    }
}

/// Result type alias for riskcurve operations.
pub type RiskResult<T> = Result<T, RiskError>;
