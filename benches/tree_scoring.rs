//! Benchmarks for the plan-node scoring function and its prior tables.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use overmind::domain::plan::PlannedAction;
use overmind::tree_planner::scoring::{seed_priors, ScoreWeights};

fn bench_score(c: &mut Criterion) {
    let weights = ScoreWeights::new(0.4, 0.3, 0.3, 0.02);

    c.bench_function("score_10k", |bench| {
        bench.iter(|| {
            for depth in 0..10_000u32 {
                black_box(weights.score(0.7, 0.3, 0.5, depth % 20));
            }
        });
    });
}

fn bench_seed_priors(c: &mut Criterion) {
    let action = PlannedAction::tool_call("bash", serde_json::json!({"command": "cargo test"}), "run the test suite");

    c.bench_function("seed_priors_10k", |bench| {
        bench.iter(|| {
            for _ in 0..10_000u32 {
                black_box(seed_priors(&action));
            }
        });
    });
}

criterion_group!(benches, bench_score, bench_seed_priors);
criterion_main!(benches);
