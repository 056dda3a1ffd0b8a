//! Performance benchmarks for strategy sessions.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::BTreeMap;
use stratlab::config::SessionConfig;
use stratlab::derived::{DerivedArrays, VolatilityConfig};
use stratlab::engine::Backtest;
use stratlab::executor::{ExecutorConfig, ParallelStrategyExecutor};
use stratlab::indicator::{IndicatorDefinition, IndicatorRegistry};
use stratlab::normalizer::{NormalizerConfig, SignalNormalizer};
use stratlab::rolling::{ewm_mean, expanding_median, rolling_median, rolling_skew, rolling_std};
use stratlab::types::{Matrix, ReturnMatrix};
use chrono::NaiveDate;

/// Generate synthetic percentage returns for benchmarking.
fn generate_returns(rows: usize, cols: usize) -> Matrix {
    let columns = (0..cols)
        .map(|c| {
            (0..rows)
                .map(|t| {
                    let x = t as f32 * (0.31 + 0.05 * c as f32);
                    0.03 + x.sin() * 1.1 + (x * 1.9).cos() * 0.4
                })
                .collect()
        })
        .collect();
    Matrix::from_columns(columns).unwrap()
}

fn generate_series(len: usize) -> Vec<f64> {
    (0..len)
        .map(|t| (t as f64 * 0.37).sin() + (t as f64 * 1.3).cos() * 0.5)
        .collect()
}

/// Benchmark rolling primitives.
fn bench_rolling(c: &mut Criterion) {
    let series = generate_series(5000);
    let mut group = c.benchmark_group("rolling");

    for window in [16, 64, 256].iter() {
        group.bench_with_input(BenchmarkId::new("std", window), window, |b, &w| {
            b.iter(|| rolling_std(black_box(&series), w, w))
        });
        group.bench_with_input(BenchmarkId::new("skew", window), window, |b, &w| {
            b.iter(|| rolling_skew(black_box(&series), w, w))
        });
        group.bench_with_input(BenchmarkId::new("median", window), window, |b, &w| {
            b.iter(|| rolling_median(black_box(&series), w, w))
        });
        group.bench_with_input(BenchmarkId::new("ewm", window), window, |b, &w| {
            b.iter(|| ewm_mean(black_box(&series), w))
        });
    }

    group.bench_function("expanding_median", |b| {
        b.iter(|| expanding_median(black_box(&series), 256))
    });

    group.finish();
}

/// Benchmark derived-array computation.
fn bench_derived(c: &mut Criterion) {
    let mut group = c.benchmark_group("derived");
    let config = VolatilityConfig::default();

    for assets in [1, 8, 32].iter() {
        let returns = generate_returns(2500, *assets);
        group.bench_with_input(BenchmarkId::new("compute", assets), &returns, |b, returns| {
            b.iter(|| DerivedArrays::compute(black_box(returns), &config).unwrap())
        });
    }

    group.finish();
}

/// Benchmark the parallel executor across pool sizes.
fn bench_executor(c: &mut Criterion) {
    let returns = generate_returns(2000, 8);
    let data = DerivedArrays::compute(&returns, &VolatilityConfig::default()).unwrap();
    let assets: Vec<String> = (0..8).map(|i| format!("A{}", i)).collect();

    let registry = IndicatorRegistry::builtin();
    let mut grid = BTreeMap::new();
    grid.insert("short".to_string(), vec![4, 8, 16, 32]);
    grid.insert("long".to_string(), vec![64, 128, 256]);
    let mut definition = IndicatorDefinition::new(
        registry.create("MovingAverageCrossover").unwrap(),
        true,
        grid,
    );
    definition.get_valid_pairs().unwrap();
    let definitions = vec![definition];

    let mut group = c.benchmark_group("executor");
    group.sample_size(20);

    for threads in [1, 4, 8].iter() {
        let executor = ParallelStrategyExecutor::new(
            ExecutorConfig { threads: *threads },
            SignalNormalizer::new(NormalizerConfig::default()),
        );
        group.bench_with_input(BenchmarkId::new("threads", threads), threads, |b, _| {
            b.iter(|| {
                executor
                    .run(black_box(&definitions), &data, &assets, |_, _| {})
                    .unwrap()
            })
        });
    }

    group.finish();
}

/// Benchmark a full session with the example configuration.
fn bench_session(c: &mut Criterion) {
    let config = SessionConfig::from_toml_str(&SessionConfig::example()).unwrap();
    let names = ["GLD", "QQQ", "SPY", "TLT"];
    let start = NaiveDate::from_ymd_opt(2015, 1, 1).unwrap();
    let dates = (0..1500)
        .map(|i| start + chrono::Duration::days(i as i64))
        .collect();
    let returns = ReturnMatrix::new(
        dates,
        names.iter().map(|s| s.to_string()).collect(),
        generate_returns(1500, names.len()),
    )
    .unwrap();
    let session = Backtest::new(config);

    let mut group = c.benchmark_group("session");
    group.sample_size(10);
    group.bench_function("example_config", |b| {
        b.iter(|| session.run(black_box(&returns)).unwrap())
    });
    group.finish();
}

criterion_group!(benches, bench_rolling, bench_derived, bench_executor, bench_session);
criterion_main!(benches);
