//! Benchmarks for the structural diff engine

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use quill_diff::changed_ranges;
use quill_text::Text;
use std::sync::Arc;

fn generate_document(lines: usize) -> String {
    let mut doc = String::new();
    for i in 0..lines {
        doc.push_str(&format!("line {:06} with a fixed amount of padding\n", i));
    }
    doc
}

/// Diff after a single small edit: the structural fast path should make
/// this independent of document size.
fn bench_diff_single_edit(c: &mut Criterion) {
    let mut group = c.benchmark_group("diff_single_edit");
    for size in [1000, 10000, 100000].iter() {
        let a = Text::create(&generate_document(*size));
        let mid = a.len() / 2;
        let b = a.replace(mid, mid + 10, "changed!").unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |bch, _| {
            bch.iter(|| std::hint::black_box(changed_ranges(&a, &b)));
        });
    }
    group.finish();
}

/// Diff after a series of scattered edits.
fn bench_diff_scattered_edits(c: &mut Criterion) {
    let mut group = c.benchmark_group("diff_scattered_edits");
    for size in [10000, 100000].iter() {
        let a = Text::create(&generate_document(*size));
        let mut b = Arc::clone(&a);
        let step = a.len() / 16;
        for i in 1..12 {
            let pos = i * step;
            b = b.replace(pos, pos + 5, "patch").unwrap();
        }
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |bch, _| {
            bch.iter(|| std::hint::black_box(changed_ranges(&a, &b)));
        });
    }
    group.finish();
}

/// Diff of structurally unrelated documents: exercises the bounded
/// fallback rather than full LCS.
fn bench_diff_unrelated(c: &mut Criterion) {
    let mut group = c.benchmark_group("diff_unrelated");
    for size in [10000, 100000].iter() {
        let a = Text::create(&generate_document(*size));
        let b = Text::create(&generate_document(*size).to_uppercase());
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |bch, _| {
            bch.iter(|| std::hint::black_box(changed_ranges(&a, &b)));
        });
    }
    group.finish();
}

/// The no-op case editors hit constantly.
fn bench_diff_identical(c: &mut Criterion) {
    let a = Text::create(&generate_document(100000));
    let b = Arc::clone(&a);
    c.bench_function("diff_identical", |bch| {
        bch.iter(|| std::hint::black_box(changed_ranges(&a, &b)));
    });
}

criterion_group!(
    benches,
    bench_diff_single_edit,
    bench_diff_scattered_edits,
    bench_diff_unrelated,
    bench_diff_identical
);
criterion_main!(benches);
