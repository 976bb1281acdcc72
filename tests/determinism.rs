use riskcurve::{
    simulate, NodeId, RiskEngine, RiskLeaf, RiskNode, RiskPortfolio, RiskTree, SimulationConfig, TreeIndex,
};

fn id(s: &str) -> NodeId {
    NodeId::new(s).unwrap()
}

fn nodes() -> Vec<RiskNode> {
    vec![
        RiskPortfolio::new(id("enterprise"), "Enterprise", vec![id("ops"), id("legal")]).unwrap().into(),
        RiskPortfolio::new(id("ops"), "Operations", vec![id("cyber"), id("hardware"), id("outage")])
            .unwrap()
            .into(),
        RiskLeaf::lognormal(id("cyber"), "Cyber attack", 0.25, 10_000.0, 2_000_000.0).unwrap().into(),
        RiskLeaf::expert(id("hardware"), "Hardware failure", 0.4, vec![0.1, 0.5, 0.9], vec![1_000.0, 4_000.0, 9_000.0])
            .unwrap()
            .into(),
        RiskLeaf::lognormal(id("outage"), "Cloud outage", 0.1, 5_000.0, 250_000.0).unwrap().into(),
        RiskLeaf::lognormal(id("legal"), "Litigation", 0.05, 50_000.0, 5_000_000.0).unwrap().into(),
    ]
}

fn config(parallelism: usize) -> SimulationConfig {
    SimulationConfig {
        n_trials: 20_000,
        parallelism,
        seed3: 42,
        seed4: 7,
        ..SimulationConfig::default()
    }
}

#[test]
fn simulate_is_identical_at_parallelism_1_4_8() {
    let index = TreeIndex::build(nodes()).unwrap();
    let root = id("enterprise");
    let baseline = simulate(&index, &root, &config(1)).unwrap();
    for parallelism in [4, 8] {
        let other = simulate(&index, &root, &config(parallelism)).unwrap();
        assert_eq!(baseline, other, "parallelism {parallelism} diverged");
    }
}

#[test]
fn cached_resolve_is_identical_across_engines() {
    let tree = RiskTree::new("Enterprise", nodes()).unwrap();
    let ids = [id("enterprise"), id("ops"), id("cyber"), id("legal")];

    let results: Vec<_> = [1, 4, 8]
        .into_iter()
        .map(|parallelism| {
            let engine = RiskEngine::new(config(parallelism)).unwrap();
            engine.ensure_cached_all(&tree, &ids).unwrap()
        })
        .collect();

    for other in &results[1..] {
        for node in &ids {
            assert_eq!(results[0][node], other[node], "{node} diverged");
        }
    }
}

#[test]
fn repeated_runs_are_identical() {
    let index = TreeIndex::build(nodes()).unwrap();
    let a = simulate(&index, &id("cyber"), &config(4)).unwrap();
    let b = simulate(&index, &id("cyber"), &config(4)).unwrap();
    assert_eq!(a.outcome, b.outcome);
}

#[test]
fn portfolio_equals_sum_of_independently_simulated_leaves() {
    let index = TreeIndex::build(nodes()).unwrap();
    let ops = simulate(&index, &id("ops"), &config(4)).unwrap();
    let leaves: Vec<_> = ["cyber", "hardware", "outage"]
        .into_iter()
        .map(|leaf| simulate(&index, &id(leaf), &config(1)).unwrap().outcome)
        .collect();
    let summed = riskcurve::combine_all(leaves.iter().map(AsRef::as_ref)).unwrap();
    assert_eq!(*ops.outcome, summed);
}
