//! Criterion benchmarks for the engine hot paths.
//!
//! Benchmarks:
//! 1. Full runs, base and smart, with pauses recorded instead of slept
//! 2. Error-text classification
//! 3. Input partitioning

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use quotebatch_core::{
    classify_message, partition, BatchConfig, BatchEngine, RecordingSleeper, Sourced,
};

// ── Helpers ──────────────────────────────────────────────────────────

fn engine(batch_size: usize) -> BatchEngine {
    let config = BatchConfig::new()
        .with_batch_size(batch_size)
        .with_max_retries(2)
        .with_jitter_seed(1);
    BatchEngine::new(config)
        .unwrap()
        .with_sleeper(RecordingSleeper::new())
}

fn process(n: &u32) -> Result<Sourced<u32>, String> {
    match n % 20 {
        0 => Err("429 Too Many Requests".to_string()),
        1 => Err("symbol delisted".to_string()),
        k if k < 12 => Ok(Sourced::cached(*n)),
        _ => Ok(Sourced::fresh(*n)),
    }
}

// ── 1. Runs ──────────────────────────────────────────────────────────

fn bench_runs(c: &mut Criterion) {
    let mut group = c.benchmark_group("run");
    for &items in &[100u32, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::new("base", items), &items, |b, &items| {
            b.iter(|| {
                let mut engine = engine(50);
                black_box(engine.process_batch((0..items).collect(), process, "bench"))
            })
        });
        group.bench_with_input(BenchmarkId::new("smart", items), &items, |b, &items| {
            b.iter(|| {
                let mut engine = engine(50);
                black_box(engine.process_batch_smart((0..items).collect(), process, "bench"))
            })
        });
    }
    group.finish();
}

// ── 2. Classification ────────────────────────────────────────────────

fn bench_classify(c: &mut Criterion) {
    let messages = [
        "HTTP 429 Too Many Requests",
        "Connection reset by peer",
        "symbol XYZ not found in reference data",
        "upstream returned malformed payload after a long wait",
    ];
    c.bench_function("classify_message", |b| {
        b.iter(|| {
            for msg in &messages {
                black_box(classify_message(black_box(msg)));
            }
        })
    });
}

// ── 3. Partitioning ──────────────────────────────────────────────────

fn bench_partition(c: &mut Criterion) {
    let items: Vec<u64> = (0..100_000).collect();
    c.bench_function("partition_100k_by_50", |b| {
        b.iter(|| black_box(partition(items.clone(), 50)))
    });
}

criterion_group!(benches, bench_runs, bench_classify, bench_partition);
criterion_main!(benches);
