//! Benchmarks for cell reads and invalidation.
//!
//! Layout re-reads geometry cells every frame, so the cached read path
//! dominates. Budgets:
//! - Cached scalar get: < 5ns
//! - Set + pull through a short chain: < 1us
//!
//! Run with: cargo bench -p cadence-reactive --bench cell_bench

use cadence_reactive::{Cell, DoubleCell, IntCell};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;

// =============================================================================
// Cached reads (the hot path)
// =============================================================================

fn bench_cached_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("cell/get_cached");

    let width = DoubleCell::new(640.0);
    group.bench_function("double_constant", |b| b.iter(|| black_box(width.get())));

    let half = DoubleCell::computed({
        let width = width.clone();
        move |cx| cx.read(&width) / 2.0
    });
    let _ = half.get();
    group.bench_function("double_computed", |b| b.iter(|| black_box(half.get())));

    let title = Cell::computed(|_| String::from("measure 12"));
    let _ = title.get();
    group.bench_function("string_get_clone", |b| b.iter(|| black_box(title.get())));
    group.bench_function("string_with_borrow", |b| {
        b.iter(|| black_box(title.with(String::len)))
    });

    group.finish();
}

// =============================================================================
// Set + pull
// =============================================================================

fn bench_set_and_pull(c: &mut Criterion) {
    let mut group = c.benchmark_group("cell/set_pull");

    for depth in [1usize, 4, 16] {
        let root = IntCell::new(0);
        let mut tail = IntCell::computed({
            let root = root.clone();
            move |cx| cx.read(&root)
        });
        for _ in 1..depth {
            let prev = tail.clone();
            tail = IntCell::computed(move |cx| cx.read(&prev) + 1);
        }
        let _ = tail.get();

        let mut n = 0;
        group.bench_with_input(BenchmarkId::new("chain", depth), &depth, |b, _| {
            b.iter(|| {
                n += 1;
                root.set(black_box(n));
                black_box(tail.get())
            })
        });
    }

    group.finish();
}

// =============================================================================
// Fan-out invalidation
// =============================================================================

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("cell/fan_out");

    for width in [8usize, 64, 512] {
        let source = IntCell::new(0);
        let dependents: Vec<IntCell> = (0..width)
            .map(|i| {
                let source = source.clone();
                let offset = i32::try_from(i).unwrap_or(i32::MAX);
                IntCell::computed(move |cx| cx.read(&source) + offset)
            })
            .collect();

        let mut n = 0;
        group.bench_with_input(BenchmarkId::new("invalidate_only", width), &width, |b, _| {
            b.iter(|| {
                for dependent in &dependents {
                    let _ = dependent.get();
                }
                n += 1;
                source.set(black_box(n));
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_cached_get, bench_set_and_pull, bench_fan_out);
criterion_main!(benches);
