//! Micro-benchmarks for the append/flush hot path.
//!
//! Uses Criterion for statistically rigorous measurement with regression
//! detection and HTML reports.
//!
//! # Running
//!
//! ```bash
//! cargo bench --bench append_flush
//! ```
//!
//! Reports are generated in `target/criterion/report/index.html`.

use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use duologwal::{Wal, WalConfig};
use tempfile::TempDir;

const VALUE_128B: &[u8; 128] = &[0xAB; 128];
const VALUE_4K: &[u8; 4096] = &[0xCD; 4096];

fn open_wal(dir: &std::path::Path, config: WalConfig) -> Wal {
    Wal::open(dir.join("primary.wal"), dir.join("secondary.wal"), config).expect("open")
}

/// Single `append` without a following `flush` — measures submission cost
/// only, not durability latency.
fn bench_append_submit(c: &mut Criterion) {
    let mut group = c.benchmark_group("append_submit");
    for payload in [VALUE_128B.as_slice(), VALUE_4K.as_slice()] {
        group.throughput(Throughput::Bytes(payload.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(payload.len()), &payload, |b, payload| {
            let dir = TempDir::new().unwrap();
            let mut wal = open_wal(dir.path(), WalConfig::default());
            b.iter(|| {
                black_box(wal.append(payload).unwrap());
            });
            // Drain whatever accumulated so the WAL doesn't grow unbounded
            // across iterations and skew allocator behavior.
            wal.flush().unwrap();
        });
    }
    group.finish();
}

/// `append` immediately followed by `flush` — the end-to-end durable-write
/// latency a caller actually experiences.
fn bench_append_and_flush(c: &mut Criterion) {
    let mut group = c.benchmark_group("append_and_flush");
    for payload in [VALUE_128B.as_slice(), VALUE_4K.as_slice()] {
        group.throughput(Throughput::Bytes(payload.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(payload.len()), &payload, |b, payload| {
            let dir = TempDir::new().unwrap();
            let mut wal = open_wal(dir.path(), WalConfig::default());
            b.iter(|| {
                wal.append(payload).unwrap();
                wal.flush().unwrap();
            });
        });
    }
    group.finish();
}

/// Batched flush: N appends submitted back to back, one flush at the end.
fn bench_batched_flush(c: &mut Criterion) {
    let mut group = c.benchmark_group("batched_flush");
    for batch in [8usize, 64] {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            b.iter_batched(
                || TempDir::new().unwrap(),
                |dir| {
                    let mut wal = open_wal(dir.path(), WalConfig::default());
                    for _ in 0..batch {
                        wal.append(VALUE_128B).unwrap();
                    }
                    wal.flush().unwrap();
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_append_submit, bench_append_and_flush, bench_batched_flush);
criterion_main!(benches);
