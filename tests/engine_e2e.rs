use std::sync::Arc;
use std::time::Duration;

use riskcurve::{
    CancellationToken, CountingMetrics, ExecutionError, LossDistributionSpec, NodeId, RiskEngine, RiskError, RiskLeaf,
    RiskNode, RiskPortfolio, RiskTree, SimulationConfig, SimulationMetrics, StructuralError,
};

fn id(s: &str) -> NodeId {
    NodeId::new(s).unwrap()
}

const TREE_JSON: &str = r#"[
    {"kind": "portfolio", "id": "enterprise", "name": "Enterprise", "children": ["it", "finance"]},
    {"kind": "portfolio", "id": "it", "name": "IT", "children": ["ransomware", "data-breach"], "parent": "enterprise"},
    {"kind": "leaf", "id": "ransomware", "name": "Ransomware", "probability": 0.15,
     "distribution": {"distribution_type": "lognormal", "min_loss": 50000.0, "max_loss": 5000000.0}},
    {"kind": "leaf", "id": "data-breach", "name": "Data breach", "probability": 0.08,
     "distribution": {"distribution_type": "expert", "percentiles": [0.1, 0.5, 0.9],
                      "quantiles": [20000.0, 150000.0, 900000.0], "lower_bound": 0.0}},
    {"kind": "leaf", "id": "finance", "name": "Payment fraud", "probability": 0.3,
     "distribution": {"distribution_type": "lognormal", "min_loss": 1000.0, "max_loss": 80000.0}}
]"#;

fn tree() -> RiskTree {
    let nodes: Vec<RiskNode> = serde_json::from_str(TREE_JSON).unwrap();
    RiskTree::new("Enterprise", nodes).unwrap()
}

fn config() -> SimulationConfig {
    SimulationConfig::from_json_str(r#"{"n_trials": 10000, "parallelism": 4, "seed3": 11, "seed4": 3}"#).unwrap()
}

#[test]
fn json_tree_resolves_and_reports_quantiles() {
    let metrics = Arc::new(CountingMetrics::new());
    let engine = RiskEngine::with_metrics(config(), metrics.clone()).unwrap();
    let tree = tree();

    let q = engine.quantiles(&tree, &id("enterprise")).unwrap();
    assert!(q.p50 <= q.p90 && q.p90 <= q.p95 && q.p95 <= q.p99);
    assert!(q.p99 > 0);
    assert_eq!(metrics.simulations(), 3);
    assert_eq!(metrics.aggregations(), 2);
    assert_eq!(metrics.trials_simulated(), 30_000);

    let it = engine.ensure_cached(&tree, &id("it")).unwrap();
    let enterprise = engine.ensure_cached(&tree, &id("enterprise")).unwrap();
    assert!(enterprise.mean_loss() >= it.mean_loss());
    assert_eq!(metrics.simulations(), 3);
}

#[test]
fn unknown_node_is_a_client_error() {
    let engine = RiskEngine::new(config()).unwrap();
    let err = engine.ensure_cached(&tree(), &id("nope")).unwrap_err();
    assert!(err.is_structural());
    assert!(!err.is_retryable());
    assert_eq!(err.code(), "node_not_found");
}

#[test]
fn bad_leaf_parameters_fail_tree_construction() {
    let nodes: Vec<RiskNode> = vec![RiskNode::Leaf(RiskLeaf {
        id: id("bad"),
        name: "Bad".to_string(),
        probability: 0.5,
        distribution: LossDistributionSpec::Lognormal {
            min_loss: 500.0,
            max_loss: 100.0,
        },
    })];
    let err = RiskTree::new("Bad", nodes).unwrap_err();
    let RiskError::Validation(inner) = err else {
        panic!("expected validation error, got {err:?}");
    };
    assert_eq!(inner.code(), "invalid_bounds");
}

#[test]
fn non_monotone_fit_is_reported_with_node_id() {
    let nodes: Vec<RiskNode> = vec![
        RiskPortfolio::new(id("root"), "Root", vec![id("skewed")]).unwrap().into(),
        RiskLeaf::expert(id("skewed"), "Skewed", 0.2, vec![0.1, 0.5, 0.9], vec![1_000.0, 5_000.0, 50_000.0])
            .unwrap()
            .into(),
    ];
    let tree = RiskTree::new("Skewed", nodes).unwrap();
    let engine = RiskEngine::new(config()).unwrap();
    let err = engine.ensure_cached(&tree, &id("root")).unwrap_err();
    let RiskError::Execution(ExecutionError::DistributionFit { node_id, .. }) = err else {
        panic!("expected DistributionFit, got {err:?}");
    };
    assert_eq!(node_id, id("skewed"));
    assert!(engine.cache_manager().cache_for(tree.id).size().unwrap() == 0);
    let permits = engine.resolver().permits();
    assert_eq!(permits.available(), permits.capacity());
}

struct CancelOnFirstLeaf(CancellationToken);

impl SimulationMetrics for CancelOnFirstLeaf {
    fn on_simulation(&self, _node: &NodeId, _n_trials: u64, _duration: Duration) {
        self.0.cancel();
    }
}

#[test]
fn cancellation_mid_resolve_keeps_completed_leaves() {
    let token = CancellationToken::new();
    let engine = RiskEngine::with_metrics(
        SimulationConfig {
            parallelism: 1,
            ..config()
        },
        Arc::new(CancelOnFirstLeaf(token.clone())),
    )
    .unwrap();
    let tree = tree();

    let err = engine.ensure_cached_with(&tree, &id("enterprise"), &token).unwrap_err();
    assert!(err.is_retryable());

    let cache = engine.cache_manager().cache_for(tree.id);
    assert_eq!(cache.keys().unwrap(), vec![id("ransomware")]);
    let permits = engine.resolver().permits();
    assert_eq!(permits.available(), permits.capacity());

    engine.ensure_cached(&tree, &id("enterprise")).unwrap();
    assert_eq!(cache.size().unwrap(), 5);
}

#[test]
fn cancellation_before_start_caches_nothing_new() {
    let engine = RiskEngine::new(config()).unwrap();
    let tree = tree();
    engine.ensure_cached(&tree, &id("finance")).unwrap();

    let token = CancellationToken::new();
    token.cancel();
    assert!(engine.ensure_cached_with(&tree, &id("enterprise"), &token).unwrap_err().is_retryable());
    assert_eq!(engine.cache_manager().cache_for(tree.id).keys().unwrap(), vec![id("finance")]);
}

#[test]
fn depth_limit_is_enforced() {
    let engine = RiskEngine::new(SimulationConfig {
        max_tree_depth: 1,
        ..config()
    })
    .unwrap();
    let err = engine.ensure_cached(&tree(), &id("finance")).unwrap_err();
    assert!(matches!(
        err,
        RiskError::Structural(StructuralError::TreeTooDeep { depth: 2, max_depth: 1 })
    ));
}
