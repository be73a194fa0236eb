use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use lifelike_core::{Boundary, Lattice, Rule, run, run_with_periodicity};
use std::time::Duration;

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn bench_stepping(c: &mut Criterion) {
    let mut group = c.benchmark_group("lattice_step");
    group.sample_size(env_usize("LIFELIKE_BENCH_SAMPLES", 20));
    group.measurement_time(Duration::from_secs(
        env_usize("LIFELIKE_BENCH_MEASURE_SECS", 8) as u64,
    ));
    let steps = env_usize("LIFELIKE_BENCH_STEPS", 100) as u32;
    let sizes: Vec<usize> = std::env::var("LIFELIKE_BENCH_SIZES")
        .ok()
        .map(|s| {
            s.split(',')
                .filter_map(|t| t.trim().parse::<usize>().ok())
                .collect::<Vec<_>>()
        })
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| vec![64_usize, 256]);

    for &size in &sizes {
        for boundary in [Boundary::Wrap, Boundary::Fixed] {
            group.bench_function(format!("run{steps}_{size}x{size}_{boundary}"), |b| {
                b.iter_batched(
                    || Lattice::random(size, size, boundary, 0.3, 42).expect("lattice"),
                    |lattice| run(&lattice, &Rule::LIFE, steps),
                    BatchSize::LargeInput,
                );
            });
        }
        group.bench_function(format!("periodicity{steps}_{size}x{size}"), |b| {
            b.iter_batched(
                || Lattice::random(size, size, Boundary::Wrap, 0.3, 7).expect("lattice"),
                |lattice| run_with_periodicity(&lattice, &Rule::HIGHLIFE, steps, 1000),
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_stepping);
criterion_main!(benches);
