//! Search strategy benchmarks
//!
//! Measures trial throughput of the three strategies against a cheap
//! synthetic objective, so the numbers reflect orchestration and
//! ledger overhead rather than model training cost.
//!
//! Run with: cargo bench --bench search_benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use afinar::ledger::{ParamMap, ParamValue, RunLedger};
use afinar::tuner::{
    ParamDistribution, ParamDistributions, ParamDomain, ParamGrid, ParamSpace, Tuner, TunerConfig,
};

const DATA_LEN: usize = 256;

fn objective(params: &ParamMap, _data: &[f64]) -> anyhow::Result<f64> {
    let x = params["x"].as_f64().unwrap_or(0.0);
    let y = params["y"].as_f64().unwrap_or(0.0);
    Ok(-(x - 3.0) * (x - 3.0) - (y - 0.5) * (y - 0.5))
}

fn square_grid(side: usize) -> ParamGrid {
    let axis = |scale: f64| {
        (0..side)
            .map(|i| ParamValue::Float(i as f64 * scale))
            .collect::<Vec<_>>()
    };
    ParamGrid::new()
        .add("x", axis(1.0))
        .add("y", axis(0.1))
}

/// Grid search throughput at growing grid sizes
fn bench_grid_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("grid_search");
    let data: Vec<f64> = (0..DATA_LEN).map(|i| i as f64).collect();

    for side in [4usize, 8, 16] {
        let grid = square_grid(side);
        group.bench_with_input(
            BenchmarkId::new("trials", side * side),
            &grid,
            |b, grid| {
                b.iter(|| {
                    let ledger = RunLedger::in_memory();
                    let tuner = Tuner::new(&ledger, TunerConfig::new()).unwrap();
                    tuner
                        .grid_search(black_box(grid), &data, objective, |m, _| Ok(*m))
                        .unwrap()
                });
            },
        );
    }

    group.finish();
}

/// Random search throughput at growing budgets
fn bench_random_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("random_search");
    let data: Vec<f64> = (0..DATA_LEN).map(|i| i as f64).collect();

    let dists = ParamDistributions::new()
        .add("x", ParamDistribution::Uniform { low: 0.0, high: 16.0 })
        .add("y", ParamDistribution::Uniform { low: 0.0, high: 1.6 });

    for n_iter in [16usize, 64, 256] {
        group.bench_with_input(BenchmarkId::new("trials", n_iter), &n_iter, |b, &n| {
            b.iter(|| {
                let ledger = RunLedger::in_memory();
                let tuner = Tuner::new(
                    &ledger,
                    TunerConfig::new().n_iter(n).random_state(42),
                )
                .unwrap();
                tuner
                    .random_search(black_box(&dists), &data, objective, |m, _| Ok(*m))
                    .unwrap()
            });
        });
    }

    group.finish();
}

/// Bayesian proposal overhead relative to random search at equal budget
fn bench_bayesian_optimization(c: &mut Criterion) {
    let mut group = c.benchmark_group("bayesian_optimization");
    let data: Vec<f64> = (0..DATA_LEN).map(|i| i as f64).collect();

    let space = ParamSpace::new()
        .add(
            "x",
            ParamDomain::Real {
                low: 0.0,
                high: 16.0,
                log_scale: false,
            },
        )
        .add(
            "y",
            ParamDomain::Real {
                low: 0.0,
                high: 1.6,
                log_scale: false,
            },
        );

    for n_calls in [16usize, 64] {
        group.bench_with_input(BenchmarkId::new("trials", n_calls), &n_calls, |b, &n| {
            b.iter(|| {
                let ledger = RunLedger::in_memory();
                let tuner = Tuner::new(
                    &ledger,
                    TunerConfig::new().n_calls(n).random_state(42),
                )
                .unwrap();
                tuner
                    .bayesian_optimization(black_box(&space), &data, objective, |m, _| Ok(*m))
                    .unwrap()
            });
        });
    }

    group.finish();
}

/// Cross-validation overhead per fold count
fn bench_cross_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("cross_validation");
    let data: Vec<f64> = (0..DATA_LEN).map(|i| i as f64).collect();
    let grid = square_grid(4);

    for folds in [1usize, 5, 10] {
        group.bench_with_input(BenchmarkId::new("folds", folds), &folds, |b, &k| {
            b.iter(|| {
                let ledger = RunLedger::in_memory();
                let tuner = Tuner::new(&ledger, TunerConfig::new().cv_folds(k)).unwrap();
                tuner
                    .grid_search(black_box(&grid), &data, objective, |m, _| Ok(*m))
                    .unwrap()
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_grid_search,
    bench_random_search,
    bench_bayesian_optimization,
    bench_cross_validation
);
criterion_main!(benches);
