//! Risk tree nodes and their identifiers.
//!
//! A tree is made of two node kinds: leaves, which carry an occurrence
//! probability and a loss distribution, and portfolios, which aggregate an
//! ordered list of children. Node ids are validated once at construction and
//! never change afterwards.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Maximum length of a node identifier.
pub const MAX_NODE_ID_LEN: usize = 64;

/// Maximum length of a node display name.
pub const MAX_NODE_NAME_LEN: usize = 256;

static NODE_ID_PATTERN: OnceLock<Regex> = OnceLock::new();

fn node_id_pattern() -> &'static Regex {
    NODE_ID_PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_-]+$").unwrap_or_else(|e| panic!("node id pattern: {e}"))
    })
}

/// Identifier of a node, unique within one tree.
///
/// Ids are 1 to 64 characters drawn from ASCII letters, digits, `_` and `-`.
///
/// # Examples
///
/// ```
/// use riskcurve::NodeId;
///
/// let id = NodeId::new("cyber-breach").unwrap();
/// assert_eq!(id.as_str(), "cyber-breach");
/// assert!(NodeId::new("not valid!").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    /// Creates a validated node id.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidNodeId` if the value is empty, too long,
    /// or contains characters outside the allowed alphabet.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        if value.is_empty() {
            return Err(ValidationError::InvalidNodeId {
                value,
                reason: "must not be empty".to_string(),
            });
        }
        if value.len() > MAX_NODE_ID_LEN {
            return Err(ValidationError::InvalidNodeId {
                value,
                reason: format!("must be at most {MAX_NODE_ID_LEN} characters"),
            });
        }
        if !node_id_pattern().is_match(&value) {
            return Err(ValidationError::InvalidNodeId {
                value,
                reason: "only ASCII letters, digits, '_' and '-' are allowed".to_string(),
            });
        }
        Ok(Self(value))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for NodeId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for NodeId {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Loss distribution parameters of a leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "distribution_type", rename_all = "lowercase")]
pub enum LossDistributionSpec {
    /// Expert estimate given as matched percentile/quantile pairs.
    Expert {
        /// Percentiles in (0, 1), strictly increasing.
        percentiles: Vec<f64>,
        /// Loss values at each percentile, non-decreasing.
        quantiles: Vec<f64>,
        /// Number of basis terms; defaults to the number of points.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        terms: Option<usize>,
        /// Optional lower bound of the loss support.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lower_bound: Option<f64>,
        /// Optional upper bound of the loss support.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        upper_bound: Option<f64>,
    },

    /// Lognormal fitted to a confidence interval.
    Lognormal {
        /// Lower end of the interval.
        min_loss: f64,
        /// Upper end of the interval.
        max_loss: f64,
    },
}

impl LossDistributionSpec {
    /// Short name of the distribution family.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Expert { .. } => "expert",
            Self::Lognormal { .. } => "lognormal",
        }
    }

    /// Validates the parameters without fitting.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Expert {
                percentiles,
                quantiles,
                terms,
                lower_bound,
                upper_bound,
            } => validate_expert(percentiles, quantiles, *terms, *lower_bound, *upper_bound),
            Self::Lognormal { min_loss, max_loss } => validate_lognormal(*min_loss, *max_loss),
        }
    }
}

fn validate_expert(
    percentiles: &[f64],
    quantiles: &[f64],
    terms: Option<usize>,
    lower_bound: Option<f64>,
    upper_bound: Option<f64>,
) -> Result<(), ValidationError> {
    if percentiles.len() != quantiles.len() {
        return Err(ValidationError::LengthMismatch {
            left: "percentiles".to_string(),
            left_len: percentiles.len(),
            right: "quantiles".to_string(),
            right_len: quantiles.len(),
        });
    }
    if percentiles.len() < 2 {
        return Err(ValidationError::InsufficientPoints {
            field: "percentiles".to_string(),
            min: 2,
            actual: percentiles.len(),
        });
    }
    for &p in percentiles {
        if !(p.is_finite() && p > 0.0 && p < 1.0) {
            return Err(ValidationError::ProbabilityOutOfRange {
                field: "percentiles".to_string(),
                value: p,
            });
        }
    }
    if percentiles.windows(2).any(|w| w[1] <= w[0]) {
        return Err(ValidationError::NotIncreasing {
            field: "percentiles".to_string(),
        });
    }
    if let Some(q) = quantiles.iter().find(|q| !q.is_finite()) {
        return Err(ValidationError::OutOfRange {
            field: "quantiles".to_string(),
            value: *q,
            reason: "must be finite".to_string(),
        });
    }
    if quantiles.windows(2).any(|w| w[1] < w[0]) {
        return Err(ValidationError::NotIncreasing {
            field: "quantiles".to_string(),
        });
    }
    if let Some(t) = terms {
        if t < 2 || t > percentiles.len() {
            return Err(ValidationError::OutOfRange {
                field: "terms".to_string(),
                value: t as f64,
                reason: format!("must be between 2 and {}", percentiles.len()),
            });
        }
    }
    if let (Some(lo), Some(hi)) = (lower_bound, upper_bound) {
        if !(lo < hi) {
            return Err(ValidationError::InvalidBounds {
                field: "lower_bound".to_string(),
                reason: format!("lower bound {lo} must be below upper bound {hi}"),
            });
        }
    }
    if let Some(lo) = lower_bound {
        if !lo.is_finite() || quantiles.iter().any(|&q| q <= lo) {
            return Err(ValidationError::InvalidBounds {
                field: "lower_bound".to_string(),
                reason: format!("every quantile must lie above {lo}"),
            });
        }
    }
    if let Some(hi) = upper_bound {
        if !hi.is_finite() || quantiles.iter().any(|&q| q >= hi) {
            return Err(ValidationError::InvalidBounds {
                field: "upper_bound".to_string(),
                reason: format!("every quantile must lie below {hi}"),
            });
        }
    }
    Ok(())
}

fn validate_lognormal(min_loss: f64, max_loss: f64) -> Result<(), ValidationError> {
    if !(min_loss.is_finite() && min_loss > 0.0) {
        return Err(ValidationError::InvalidBounds {
            field: "min_loss".to_string(),
            reason: format!("must be positive and finite, got {min_loss}"),
        });
    }
    if !(max_loss.is_finite() && max_loss > min_loss) {
        return Err(ValidationError::InvalidBounds {
            field: "max_loss".to_string(),
            reason: format!("must be finite and greater than min_loss {min_loss}, got {max_loss}"),
        });
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<(), ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField {
            field: "name".to_string(),
        });
    }
    if trimmed.len() > MAX_NODE_NAME_LEN {
        return Err(ValidationError::OutOfRange {
            field: "name".to_string(),
            value: trimmed.len() as f64,
            reason: format!("must be at most {MAX_NODE_NAME_LEN} characters"),
        });
    }
    Ok(())
}

/// A risk that may occur once per trial with a sampled loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLeaf {
    pub id: NodeId,
    pub name: String,
    /// Per-trial occurrence probability, in the open interval (0, 1).
    pub probability: f64,
    pub distribution: LossDistributionSpec,
}

impl RiskLeaf {
    /// Creates a validated leaf.
    pub fn new(
        id: NodeId,
        name: impl Into<String>,
        probability: f64,
        distribution: LossDistributionSpec,
    ) -> Result<Self, ValidationError> {
        let leaf = Self {
            id,
            name: name.into(),
            probability,
            distribution,
        };
        leaf.validate()?;
        Ok(leaf)
    }

    /// Creates a leaf with an expert (percentile-fit) loss distribution.
    pub fn expert(
        id: NodeId,
        name: impl Into<String>,
        probability: f64,
        percentiles: Vec<f64>,
        quantiles: Vec<f64>,
    ) -> Result<Self, ValidationError> {
        Self::new(
            id,
            name,
            probability,
            LossDistributionSpec::Expert {
                percentiles,
                quantiles,
                terms: None,
                lower_bound: None,
                upper_bound: None,
            },
        )
    }

    /// Creates a leaf with a lognormal loss distribution.
    pub fn lognormal(
        id: NodeId,
        name: impl Into<String>,
        probability: f64,
        min_loss: f64,
        max_loss: f64,
    ) -> Result<Self, ValidationError> {
        Self::new(
            id,
            name,
            probability,
            LossDistributionSpec::Lognormal { min_loss, max_loss },
        )
    }

    /// Validates name, probability and distribution parameters.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_name(&self.name)?;
        if !(self.probability.is_finite() && self.probability > 0.0 && self.probability < 1.0) {
            return Err(ValidationError::ProbabilityOutOfRange {
                field: "probability".to_string(),
                value: self.probability,
            });
        }
        self.distribution.validate()
    }
}

/// A node that aggregates its children's losses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskPortfolio {
    pub id: NodeId,
    pub name: String,
    /// Ordered child ids.
    pub children: Vec<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<NodeId>,
}

impl RiskPortfolio {
    /// Creates a validated portfolio without a declared parent.
    pub fn new(
        id: NodeId,
        name: impl Into<String>,
        children: Vec<NodeId>,
    ) -> Result<Self, ValidationError> {
        let portfolio = Self {
            id,
            name: name.into(),
            children,
            parent: None,
        };
        portfolio.validate()?;
        Ok(portfolio)
    }

    /// Declares the parent of this portfolio.
    #[must_use]
    pub fn with_parent(mut self, parent: NodeId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Validates the name.
    ///
    /// Child existence and the non-empty rule are checked when the tree index
    /// is built, since they depend on the rest of the tree.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_name(&self.name)
    }
}

/// A node of a risk tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RiskNode {
    Leaf(RiskLeaf),
    Portfolio(RiskPortfolio),
}

impl RiskNode {
    /// Returns the node id.
    #[must_use]
    pub const fn id(&self) -> &NodeId {
        match self {
            Self::Leaf(leaf) => &leaf.id,
            Self::Portfolio(portfolio) => &portfolio.id,
        }
    }

    /// Returns the display name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Leaf(leaf) => &leaf.name,
            Self::Portfolio(portfolio) => &portfolio.name,
        }
    }

    /// Returns the ordered child ids (empty for leaves).
    #[must_use]
    pub fn children(&self) -> &[NodeId] {
        match self {
            Self::Leaf(_) => &[],
            Self::Portfolio(portfolio) => &portfolio.children,
        }
    }

    /// Returns true if this node is a leaf.
    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf(_))
    }

    /// Validates node-local parameters.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Leaf(leaf) => leaf.validate(),
            Self::Portfolio(portfolio) => portfolio.validate(),
        }
    }
}

impl From<RiskLeaf> for RiskNode {
    fn from(leaf: RiskLeaf) -> Self {
        Self::Leaf(leaf)
    }
}

impl From<RiskPortfolio> for RiskNode {
    fn from(portfolio: RiskPortfolio) -> Self {
        Self::Portfolio(portfolio)
    }
}
