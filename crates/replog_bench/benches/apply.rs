//! Apply path benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use replog_bench::{document, insert};
use replog_codec::Document;
use replog_core::{
    build_entry, ApplyEngine, ApplyMode, InMemoryCatalog, InMemorySessionTracker, OpDescriptor,
    OpTime, OplogEntry, OplogSlot, Timestamp,
};
use std::sync::Arc;

fn engine() -> ApplyEngine {
    ApplyEngine::new(
        Arc::new(InMemoryCatalog::new()),
        Arc::new(InMemorySessionTracker::new()),
    )
}

fn entry(inc: u32, desc: OpDescriptor) -> OplogEntry {
    let slot = OplogSlot::new(OpTime::new(Timestamp::new(1, inc), 1), 0);
    build_entry(desc, slot).unwrap()
}

/// Benchmark applying fresh inserts.
fn bench_apply_insert(c: &mut Criterion) {
    let entries: Vec<OplogEntry> = (1..=1_000u32)
        .map(|i| entry(i, insert(i64::from(i), 8)))
        .collect();

    c.bench_function("apply_insert_1000", |b| {
        b.iter_batched(
            engine,
            |engine| {
                for e in &entries {
                    engine
                        .apply_operation(e, ApplyMode::SteadyState, engine.stats())
                        .unwrap();
                }
                black_box(engine)
            },
            BatchSize::SmallInput,
        );
    });
}

/// Benchmark replaying the same update against an existing document.
fn bench_apply_update(c: &mut Criterion) {
    let engine = engine();
    let seed = entry(1, insert(1, 8));
    engine
        .apply_operation(&seed, ApplyMode::SteadyState, engine.stats())
        .unwrap();
    let update = entry(
        2,
        OpDescriptor::update(
            "bench.items",
            Document::new().with("$set", document(1, 2)),
            Document::new().with("_id", 1),
        ),
    );

    c.bench_function("apply_update", |b| {
        b.iter(|| {
            engine
                .apply_operation(black_box(&update), ApplyMode::SteadyState, engine.stats())
                .unwrap();
        });
    });
}

criterion_group!(benches, bench_apply_insert, bench_apply_update);
criterion_main!(benches);
