use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use riskcurve::{
    calculate_quantiles, generate_curve_points, CancellationToken, NodeId, RiskEngine, RiskLeaf, RiskNode,
    RiskPortfolio, RiskTree, SimulationConfig, Simulator,
};

fn id(s: &str) -> NodeId {
    NodeId::new(s).unwrap()
}

fn make_tree() -> RiskTree {
    let mut nodes: Vec<RiskNode> = Vec::new();
    let leaves: Vec<NodeId> = (0..16).map(|i| id(&format!("risk-{i}"))).collect();
    nodes.push(RiskPortfolio::new(id("root"), "Root", leaves.clone()).unwrap().into());
    for (i, leaf) in leaves.into_iter().enumerate() {
        let probability = 0.02 + 0.01 * f64::from(u32::try_from(i).unwrap());
        nodes.push(
            RiskLeaf::lognormal(leaf, "Leaf", probability, 10_000.0, 1_000_000.0)
                .unwrap()
                .into(),
        );
    }
    RiskTree::new("bench", nodes).unwrap()
}

fn config() -> SimulationConfig {
    SimulationConfig {
        n_trials: 100_000,
        parallelism: 4,
        ..SimulationConfig::default()
    }
}

fn simulation(c: &mut Criterion) {
    let tree = make_tree();
    let simulator = Simulator::new(&config()).unwrap();
    let riskcurve::RiskNode::Leaf(leaf) = tree.index.node(&id("risk-8")).unwrap() else {
        panic!("risk-8 is a leaf");
    };

    let mut group = c.benchmark_group("simulation");
    group.throughput(Throughput::Elements(config().n_trials));
    group.bench_function("leaf_100k_trials", |b| {
        b.iter(|| black_box(simulator.simulate_leaf(leaf, &CancellationToken::new()).unwrap()));
    });
    group.bench_function("tree_16_leaves_uncached", |b| {
        b.iter(|| black_box(simulator.simulate_tree(&tree.index, &id("root"), &CancellationToken::new()).unwrap()));
    });
    group.finish();

    let engine = RiskEngine::new(config()).unwrap();
    engine.ensure_cached(&tree, &id("root")).unwrap();
    c.bench_function("resolve/cached_root", |b| {
        b.iter(|| black_box(engine.ensure_cached(&tree, &id("root")).unwrap()));
    });

    let outcome = engine.ensure_cached(&tree, &id("root")).unwrap();
    c.bench_function("lec/curve_100_ticks", |b| {
        b.iter(|| black_box(generate_curve_points(&outcome, 100).unwrap()));
    });
    c.bench_function("lec/quantiles", |b| {
        b.iter(|| black_box(calculate_quantiles(&outcome)));
    });
}

criterion_group!(benches, simulation);
criterion_main!(benches);
