//! Propagation benchmarks
//!
//! Write-then-read costs for common graph shapes, and the effect flush with
//! and without batching.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ripple_core::{Memo, Runtime, Signal};

// =============================================================================
// Graph Builders
// =============================================================================

fn chain(runtime: &Runtime, length: usize) -> (Signal<u64>, Memo<u64>) {
    let cell = runtime.signal(0u64);
    let input = cell.clone();
    let mut tail = runtime.memo(move || input.get() + 1);
    for _ in 1..length {
        let upstream = tail.clone();
        tail = runtime.memo(move || upstream.get() + 1);
    }
    (cell, tail)
}

fn fan_in(runtime: &Runtime, width: usize) -> (Signal<u64>, Memo<u64>) {
    let cell = runtime.signal(0u64);
    let branches: Vec<Memo<u64>> = (0..width as u64)
        .map(|i| {
            let input = cell.clone();
            runtime.memo(move || input.get() + i)
        })
        .collect();
    let sum = runtime.memo(move || branches.iter().map(Memo::get).sum());
    (cell, sum)
}

// =============================================================================
// Memo Benchmarks
// =============================================================================

fn bench_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain");

    for length in [10, 100, 500] {
        let runtime = Runtime::new();
        let (cell, tail) = chain(&runtime, length);
        tail.get();

        group.throughput(Throughput::Elements(length as u64));
        group.bench_with_input(BenchmarkId::new("write_read", length), &length, |b, _| {
            let mut value = 0;
            b.iter(|| {
                value += 1;
                cell.set(value).unwrap();
                black_box(tail.get())
            });
        });
    }

    group.finish();
}

fn bench_diamond(c: &mut Criterion) {
    let mut group = c.benchmark_group("diamond");

    for width in [2, 16, 128] {
        let runtime = Runtime::new();
        let (cell, sum) = fan_in(&runtime, width);
        sum.get();

        group.bench_with_input(BenchmarkId::new("write_read", width), &width, |b, _| {
            let mut value = 0;
            b.iter(|| {
                value += 1;
                cell.set(value).unwrap();
                black_box(sum.get())
            });
        });
    }

    group.finish();
}

fn bench_early_cutoff(c: &mut Criterion) {
    let runtime = Runtime::new();
    let cell = runtime.signal(0u64);
    let input = cell.clone();
    let parity = runtime.memo(move || input.get() % 2 == 0);
    let upstream = parity.clone();
    let downstream = runtime.memo(move || if upstream.get() { 1u64 } else { 0 });
    downstream.get();

    c.bench_function("early_cutoff/write_read", |b| {
        let mut value = 0;
        b.iter(|| {
            value += 2;
            cell.set(value).unwrap();
            black_box(downstream.get())
        });
    });
}

// =============================================================================
// Effect Benchmarks
// =============================================================================

fn bench_effects(c: &mut Criterion) {
    let mut group = c.benchmark_group("effects");

    for count in [1, 10, 100] {
        let runtime = Runtime::new();
        let cell = runtime.signal(0u64);
        let runs = Arc::new(AtomicUsize::new(0));
        let effects: Vec<_> = (0..count)
            .map(|_| {
                let (input, runs) = (cell.clone(), runs.clone());
                runtime
                    .effect(move |_| {
                        black_box(input.get());
                        runs.fetch_add(1, Ordering::Relaxed);
                    })
                    .unwrap()
            })
            .collect();

        group.bench_with_input(BenchmarkId::new("unbatched_x10", count), &count, |b, _| {
            b.iter(|| {
                for value in 0..10 {
                    cell.set(value).unwrap();
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("batched_x10", count), &count, |b, _| {
            b.iter(|| {
                runtime
                    .batch(|| {
                        for value in 0..10 {
                            cell.set(value).unwrap();
                        }
                    })
                    .unwrap();
            });
        });

        for effect in &effects {
            effect.dispose();
        }
    }

    group.finish();
}

fn bench_creation(c: &mut Criterion) {
    c.bench_function("create/signal_memo_effect", |b| {
        let runtime = Runtime::new();
        b.iter(|| {
            let cell = runtime.signal(1u64);
            let input = cell.clone();
            let doubled = runtime.memo(move || input.get() * 2);
            let effect = runtime.effect(move |_| {
                black_box(doubled.get());
            });
            if let Ok(effect) = effect {
                effect.dispose();
            }
        });
    });
}

criterion_group!(
    benches,
    bench_chain,
    bench_diamond,
    bench_early_cutoff,
    bench_effects,
    bench_creation
);
criterion_main!(benches);
