//! Risk trees and their read-only index.
//!
//! A [`TreeIndex`] is built once per tree structure. It validates the whole
//! tree up front and precomputes every node's ancestor path, so cache
//! invalidation never has to walk parent pointers under contention.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{RiskResult, StructuralError};
use crate::node::{NodeId, RiskNode};

/// Unique identifier of a risk tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TreeId(Uuid);

impl TreeId {
    /// Creates a new random tree ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID, e.g. one read back from storage.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TreeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for TreeId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Validated, immutable view of one tree structure.
#[derive(Debug, Clone)]
pub struct TreeIndex {
    nodes: HashMap<NodeId, RiskNode>,
    order: Vec<NodeId>,
    parents: HashMap<NodeId, NodeId>,
    paths: HashMap<NodeId, Arc<[NodeId]>>,
    root: NodeId,
    depth: usize,
}

impl TreeIndex {
    /// Validates `nodes` as a single rooted tree and indexes it.
    ///
    /// # Errors
    ///
    /// Returns a validation error for bad node parameters and a structural
    /// error for duplicate ids, dangling or shared children, empty
    /// portfolios, missing or multiple roots, and cycles.
    pub fn build(nodes: Vec<RiskNode>) -> RiskResult<Self> {
        if nodes.is_empty() {
            return Err(StructuralError::EmptyTree.into());
        }

        let mut order = Vec::with_capacity(nodes.len());
        let mut by_id = HashMap::with_capacity(nodes.len());
        for node in nodes {
            node.validate()?;
            let id = node.id().clone();
            if by_id.contains_key(&id) {
                return Err(StructuralError::DuplicateNode { id }.into());
            }
            order.push(id.clone());
            by_id.insert(id, node);
        }

        let mut parents: HashMap<NodeId, NodeId> = HashMap::new();
        for id in &order {
            let RiskNode::Portfolio(portfolio) = &by_id[id] else {
                continue;
            };
            if portfolio.children.is_empty() {
                return Err(StructuralError::EmptyPortfolio { id: id.clone() }.into());
            }
            for child in &portfolio.children {
                if !by_id.contains_key(child) {
                    return Err(StructuralError::MissingChild {
                        portfolio: id.clone(),
                        child: child.clone(),
                    }
                    .into());
                }
                if let Some(first) = parents.get(child) {
                    return Err(StructuralError::MultipleParents {
                        id: child.clone(),
                        first: first.clone(),
                        second: id.clone(),
                    }
                    .into());
                }
                parents.insert(child.clone(), id.clone());
            }
        }

        for id in &order {
            if let RiskNode::Portfolio(portfolio) = &by_id[id] {
                if let Some(declared) = &portfolio.parent {
                    let actual = parents.get(id);
                    if actual != Some(declared) {
                        return Err(StructuralError::ParentMismatch {
                            id: id.clone(),
                            declared: declared.clone(),
                            actual: actual.cloned(),
                        }
                        .into());
                    }
                }
            }
        }

        let roots: Vec<NodeId> = order.iter().filter(|id| !parents.contains_key(*id)).cloned().collect();
        let root = match roots.len() {
            0 => return Err(StructuralError::NoRoot.into()),
            1 => roots[0].clone(),
            _ => return Err(StructuralError::MultipleRoots { roots }.into()),
        };

        // Every node has at most one parent, so anything unreachable from the
        // root sits on a cycle.
        let mut paths: HashMap<NodeId, Arc<[NodeId]>> = HashMap::with_capacity(order.len());
        let mut depth = 0;
        let mut queue = VecDeque::from([(root.clone(), vec![root.clone()])]);
        while let Some((id, path)) = queue.pop_front() {
            depth = depth.max(path.len() - 1);
            for child in by_id[&id].children() {
                let mut child_path = path.clone();
                child_path.push(child.clone());
                queue.push_back((child.clone(), child_path));
            }
            paths.insert(id, path.into());
        }
        if paths.len() != order.len() {
            let reached: HashSet<&NodeId> = paths.keys().collect();
            let stray = order.iter().find(|id| !reached.contains(id)).cloned();
            if let Some(id) = stray {
                return Err(StructuralError::Cycle { id }.into());
            }
        }

        Ok(Self {
            nodes: by_id,
            order,
            parents,
            paths,
            root,
            depth,
        })
    }

    /// Looks up a node.
    #[must_use]
    pub fn get(&self, id: &NodeId) -> Option<&RiskNode> {
        self.nodes.get(id)
    }

    /// Looks up a node, reporting the id when it is absent.
    pub fn node(&self, id: &NodeId) -> Result<&RiskNode, StructuralError> {
        self.get(id).ok_or_else(|| StructuralError::NodeNotFound { id: id.clone() })
    }

    #[must_use]
    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Parent of `id`; `None` for the root and unknown ids.
    #[must_use]
    pub fn parent(&self, id: &NodeId) -> Option<&NodeId> {
        self.parents.get(id)
    }

    /// Ids from the root down to `id`, inclusive.
    pub fn ancestor_path(&self, id: &NodeId) -> Result<&[NodeId], StructuralError> {
        self.paths
            .get(id)
            .map(AsRef::as_ref)
            .ok_or_else(|| StructuralError::NodeNotFound { id: id.clone() })
    }

    #[must_use]
    pub const fn root(&self) -> &NodeId {
        &self.root
    }

    /// Longest root-to-leaf path, counted in edges. A lone root has depth 0.
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// Depth of a single node.
    #[must_use]
    pub fn depth_of(&self, id: &NodeId) -> Option<usize> {
        self.paths.get(id).map(|path| path.len() - 1)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Always false: an index holds at least its root.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Node ids in the order they were supplied.
    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.order.iter()
    }

    /// Nodes in the order they were supplied.
    pub fn nodes(&self) -> impl Iterator<Item = &RiskNode> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }
}

/// A named risk tree with its current index.
#[derive(Debug, Clone)]
pub struct RiskTree {
    pub id: TreeId,
    pub name: String,
    pub index: Arc<TreeIndex>,
}

impl RiskTree {
    /// Builds a tree with a fresh id.
    pub fn new(name: impl Into<String>, nodes: Vec<RiskNode>) -> RiskResult<Self> {
        Self::with_id(TreeId::new(), name, nodes)
    }

    pub fn with_id(id: TreeId, name: impl Into<String>, nodes: Vec<RiskNode>) -> RiskResult<Self> {
        Ok(Self {
            id,
            name: name.into(),
            index: Arc::new(TreeIndex::build(nodes)?),
        })
    }

    /// Same tree id, new structure. The current index is left untouched.
    pub fn with_structure(&self, nodes: Vec<RiskNode>) -> RiskResult<Self> {
        Ok(Self {
            id: self.id,
            name: self.name.clone(),
            index: Arc::new(TreeIndex::build(nodes)?),
        })
    }

    /// Same structure with one node's parameters replaced.
    ///
    /// # Errors
    ///
    /// `NodeNotFound` when no node has the replacement's id, plus anything
    /// [`TreeIndex::build`] rejects.
    pub fn with_updated_node(&self, node: RiskNode) -> RiskResult<Self> {
        self.index.node(node.id())?;
        let nodes = self
            .index
            .nodes()
            .map(|existing| {
                if existing.id() == node.id() {
                    node.clone()
                } else {
                    existing.clone()
                }
            })
            .collect();
        self.with_structure(nodes)
    }

    /// Shortcut for `self.index.ancestor_path(id)`.
    pub fn ancestor_path(&self, id: &NodeId) -> Result<&[NodeId], StructuralError> {
        self.index.ancestor_path(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{RiskLeaf, RiskPortfolio};

    fn id(s: &str) -> NodeId {
        NodeId::new(s).unwrap()
    }

    fn leaf(s: &str) -> RiskNode {
        RiskLeaf::lognormal(id(s), s, 0.1, 1_000.0, 10_000.0).unwrap().into()
    }

    fn portfolio(s: &str, children: &[&str]) -> RiskNode {
        RiskPortfolio::new(id(s), s, children.iter().map(|c| id(c)).collect())
            .unwrap()
            .into()
    }

    fn sample_nodes() -> Vec<RiskNode> {
        vec![
            portfolio("root", &["ops", "legal"]),
            portfolio("ops", &["cyber", "hardware"]),
            leaf("cyber"),
            leaf("hardware"),
            leaf("legal"),
        ]
    }

    fn structural(err: crate::error::RiskError) -> StructuralError {
        let crate::error::RiskError::Structural(inner) = err else {
            panic!("expected structural error, got {err:?}");
        };
        inner
    }

    #[test]
    fn builds_paths_and_parents() {
        let index = TreeIndex::build(sample_nodes()).unwrap();
        assert_eq!(index.root(), &id("root"));
        assert_eq!(index.len(), 5);
        assert_eq!(index.depth(), 2);
        assert_eq!(index.parent(&id("cyber")), Some(&id("ops")));
        assert_eq!(index.parent(&id("root")), None);
        assert_eq!(
            index.ancestor_path(&id("hardware")).unwrap(),
            &[id("root"), id("ops"), id("hardware")]
        );
        assert_eq!(index.ancestor_path(&id("root")).unwrap(), &[id("root")]);
        assert_eq!(index.depth_of(&id("legal")), Some(1));
    }

    #[test]
    fn unknown_node_is_reported_with_id() {
        let index = TreeIndex::build(sample_nodes()).unwrap();
        let err = index.ancestor_path(&id("ghost")).unwrap_err();
        assert_eq!(err, StructuralError::NodeNotFound { id: id("ghost") });
        assert!(index.node(&id("ghost")).is_err());
    }

    #[test]
    fn rejects_empty_tree_and_duplicates() {
        assert_eq!(structural(TreeIndex::build(Vec::new()).unwrap_err()), StructuralError::EmptyTree);
        let err = TreeIndex::build(vec![leaf("a"), leaf("a")]).unwrap_err();
        assert_eq!(structural(err), StructuralError::DuplicateNode { id: id("a") });
    }

    #[test]
    fn rejects_empty_portfolio_and_missing_child() {
        let empty = RiskNode::Portfolio(RiskPortfolio {
            id: id("p"),
            name: "P".to_string(),
            children: Vec::new(),
            parent: None,
        });
        assert_eq!(
            structural(TreeIndex::build(vec![empty]).unwrap_err()),
            StructuralError::EmptyPortfolio { id: id("p") }
        );
        let err = TreeIndex::build(vec![portfolio("p", &["x"])]).unwrap_err();
        assert!(matches!(structural(err), StructuralError::MissingChild { .. }));
    }

    #[test]
    fn rejects_shared_child_and_multiple_roots() {
        let err = TreeIndex::build(vec![
            portfolio("root", &["a", "b"]),
            portfolio("a", &["x"]),
            portfolio("b", &["x"]),
            leaf("x"),
        ])
        .unwrap_err();
        assert!(matches!(structural(err), StructuralError::MultipleParents { .. }));

        let err = TreeIndex::build(vec![leaf("a"), leaf("b")]).unwrap_err();
        assert_eq!(
            structural(err),
            StructuralError::MultipleRoots {
                roots: vec![id("a"), id("b")]
            }
        );
    }

    #[test]
    fn rejects_cycles() {
        let err = TreeIndex::build(vec![portfolio("a", &["b"]), portfolio("b", &["a"])]).unwrap_err();
        assert_eq!(structural(err), StructuralError::NoRoot);

        let err = TreeIndex::build(vec![
            portfolio("root", &["leaf"]),
            leaf("leaf"),
            portfolio("c1", &["c2"]),
            portfolio("c2", &["c1"]),
        ])
        .unwrap_err();
        assert_eq!(structural(err), StructuralError::Cycle { id: id("c1") });
    }

    #[test]
    fn declared_parent_must_match() {
        let ops = RiskPortfolio::new(id("ops"), "Ops", vec![id("cyber")])
            .unwrap()
            .with_parent(id("elsewhere"));
        let err = TreeIndex::build(vec![portfolio("root", &["ops"]), ops.into(), leaf("cyber")]).unwrap_err();
        assert!(matches!(structural(err), StructuralError::ParentMismatch { .. }));
    }

    #[test]
    fn invalid_leaf_parameters_fail_validation() {
        let bad = RiskNode::Leaf(RiskLeaf {
            id: id("bad"),
            name: "Bad".to_string(),
            probability: 1.5,
            distribution: crate::node::LossDistributionSpec::Lognormal {
                min_loss: 1.0,
                max_loss: 2.0,
            },
        });
        assert!(TreeIndex::build(vec![bad]).unwrap_err().is_validation());
    }

    #[test]
    fn structure_changes_produce_new_index() {
        let tree = RiskTree::new("Enterprise", sample_nodes()).unwrap();
        let smaller = tree
            .with_structure(vec![portfolio("root", &["legal"]), leaf("legal")])
            .unwrap();
        assert_eq!(smaller.id, tree.id);
        assert_eq!(tree.index.len(), 5);
        assert_eq!(smaller.index.len(), 2);
    }

    #[test]
    fn updated_node_keeps_structure() {
        let tree = RiskTree::new("Enterprise", sample_nodes()).unwrap();
        let replacement: RiskNode = RiskLeaf::lognormal(id("cyber"), "Cyber", 0.5, 10.0, 20.0).unwrap().into();
        let updated = tree.with_updated_node(replacement).unwrap();
        let RiskNode::Leaf(cyber) = updated.index.node(&id("cyber")).unwrap() else {
            panic!("cyber should stay a leaf");
        };
        assert!((cyber.probability - 0.5).abs() < f64::EPSILON);
        assert_eq!(updated.ancestor_path(&id("cyber")).unwrap().len(), 3);
        assert!(tree.with_updated_node(leaf("ghost")).is_err());
    }
}
