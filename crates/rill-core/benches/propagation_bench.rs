//! Benchmarks for invalidation and settle cost.
//!
//! Run with: cargo bench -p rill-core -- propagation

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rill_core::{Atom, Prism, Ticker, Value, path, prism, val};
use serde_json::json;
use std::hint::black_box;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn as_i64(v: Option<Value>) -> i64 {
    v.and_then(|v| v.as_i64()).unwrap_or(0)
}

/// `depth` prisms, each reading the previous one.
fn chain(atom: &Atom, depth: usize) -> Prism<i64> {
    let n = atom.pointer().key("n");
    let mut tip = prism(move || Ok(as_i64(val(&n)?)));
    for _ in 1..depth {
        tip = tip.map(|v| v + 1);
    }
    tip
}

/// An atom with `width` keys and one reader prism per key.
fn fan_out(width: usize) -> (Atom, Vec<Prism<i64>>) {
    let entries: Vec<(String, Value)> = (0..width)
        .map(|i| (format!("k{i}"), Value::from(0)))
        .collect();
    let atom = Atom::new(entries.into_iter().collect::<Value>());
    let readers = (0..width)
        .map(|i| {
            let p = atom.pointer().key(&format!("k{i}"));
            prism(move || Ok(as_i64(val(&p)?)))
        })
        .collect();
    (atom, readers)
}

// ---------------------------------------------------------------------------
// 1. Pull through a deep chain
// ---------------------------------------------------------------------------

fn bench_chain_pull(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagation/chain_pull");

    for depth in [10, 100, 1_000] {
        group.throughput(Throughput::Elements(depth as u64));
        let atom = Atom::new(json!({"n": 0}));
        let tip = chain(&atom, depth);
        let _ = tip.get_value();

        let mut i = 0i64;
        group.bench_with_input(BenchmarkId::from_parameter(depth), &(), |b, _| {
            b.iter(|| {
                i += 1;
                atom.set_in(&path!["n"], i);
                black_box(tip.get_value())
            })
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// 2. Path-scoped write into a wide atom
// ---------------------------------------------------------------------------

fn bench_fan_out_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagation/fan_out_write");

    for width in [10, 100, 1_000] {
        let (atom, readers) = fan_out(width);
        for r in &readers {
            let _ = r.get_value();
        }

        let mut i = 0i64;
        group.bench_with_input(BenchmarkId::from_parameter(width), &(), |b, _| {
            b.iter(|| {
                i += 1;
                atom.set_in(&path!["k0"], i);
                black_box(readers[0].get_value())
            })
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// 3. Tick flush over many hot prisms
// ---------------------------------------------------------------------------

fn bench_tick_flush(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagation/tick_flush");

    for width in [10, 100, 1_000] {
        group.throughput(Throughput::Elements(width as u64));
        let (atom, readers) = fan_out(width);
        let ticker = Ticker::new();
        let subs: Vec<_> = readers.iter().map(|r| r.keep_hot(&ticker)).collect();

        let mut i = 0i64;
        group.bench_with_input(BenchmarkId::from_parameter(width), &(), |b, _| {
            b.iter(|| {
                i += 1;
                atom.reduce(|v| {
                    (0..width).fold(v, |acc, k| acc.set_in(&path![format!("k{k}")], Value::from(i)))
                });
                black_box(ticker.tick(i as f64))
            })
        });
        drop(subs);
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_chain_pull,
    bench_fan_out_write,
    bench_tick_flush
);
criterion_main!(benches);
