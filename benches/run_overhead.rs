//! Run overhead benchmarks
//!
//! Measures what an experiment costs on top of calling the control directly:
//! the disabled pass-through path and the fully observed path with a
//! growing number of candidates.
//!
//! Toyota Way: Genchi Genbutsu (measure, don't guess)
//!
//! Run with: cargo bench --bench run_overhead

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use trueno_science::{DefaultPublisher, Experiment};

fn checksum(n: u64) -> u64 {
    (0..n).fold(0, |acc, x| acc.wrapping_mul(31).wrapping_add(x))
}

fn build(enabled: bool, candidates: usize) -> Experiment<u64> {
    let mut experiment = Experiment::with_publisher("bench", DefaultPublisher::new(enabled));
    experiment
        .use_control(|| Ok(checksum(black_box(256))))
        .expect("fresh experiment");
    for i in 0..candidates {
        experiment
            .try_named(format!("candidate-{i}"), || Ok(checksum(black_box(256))))
            .expect("unique name");
    }
    experiment
}

/// Baseline: control called directly vs. a disabled experiment
fn bench_pass_through(c: &mut Criterion) {
    let mut group = c.benchmark_group("pass_through");

    group.bench_function("direct_call", |b| b.iter(|| checksum(black_box(256))));

    let disabled = build(false, 1);
    group.bench_function("disabled_experiment", |b| {
        b.iter(|| disabled.run().expect("control succeeds"));
    });

    group.finish();
}

/// Fully observed runs: shuffle, capture, compare, publish
fn bench_observed(c: &mut Criterion) {
    let mut group = c.benchmark_group("observed_run");

    for candidates in [1, 4, 16] {
        let experiment = build(true, candidates);
        group.bench_with_input(
            BenchmarkId::new("candidates", candidates),
            &experiment,
            |b, experiment| {
                b.iter(|| experiment.run().expect("control succeeds"));
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_pass_through, bench_observed);
criterion_main!(benches);
