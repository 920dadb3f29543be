//! Benchmarks for netzoom caches and tier selection
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use netzoom::*;
use std::sync::Arc;
use std::time::Duration;

fn bench_eviction_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("eviction_cache");

    for capacity in [50usize, 500] {
        group.throughput(Throughput::Elements(1000));

        group.bench_function(format!("set_churn_{}", capacity), |b| {
            let mut cache = EvictionCache::new(capacity);
            b.iter(|| {
                for i in 0..1000i64 {
                    cache.set(ChunkId(i * 60_000_000), black_box(i));
                }
            })
        });

        let mut cache = EvictionCache::new(capacity);
        for i in 0..capacity as i64 {
            cache.set(ChunkId(i), i);
        }
        group.bench_function(format!("get_hit_{}", capacity), |b| {
            b.iter(|| {
                for i in 0..1000i64 {
                    black_box(cache.get(&ChunkId(i % capacity as i64)));
                }
            })
        });
    }

    group.finish();
}

fn bench_state_machine(c: &mut Criterion) {
    let mut group = c.benchmark_group("state_machine");

    let mut machine = ResolutionStateMachine::new(StateMachineConfig {
        min_switch_interval: Duration::ZERO,
        ..Default::default()
    })
    .unwrap();
    let now = tokio::time::Instant::now();
    let spans: Vec<i64> = (0..1000).map(|i| 10_000_000 + i * 10_000_000).collect();

    group.throughput(Throughput::Elements(spans.len() as u64));
    group.bench_function("decide_sweep", |b| {
        b.iter(|| {
            for span in &spans {
                black_box(machine.decide(*span, now));
            }
        })
    });

    group.finish();
}

fn bench_chunk_index(c: &mut Criterion) {
    let index = ChunkIndex::build(0, 24 * MICROS_PER_HOUR, MICROS_PER_MINUTE).unwrap();
    let domain = TimeDomain::new(5 * MICROS_PER_HOUR, 5 * MICROS_PER_HOUR + 30 * MICROS_PER_MINUTE);

    c.bench_function("chunks_for_domain_30m", |b| {
        b.iter(|| black_box(index.chunks_for_domain(black_box(&domain))))
    });
}

fn bench_cached_fine_request(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let provider = InMemoryProvider::synthetic(0, MICROS_PER_HOUR, 10_000);
    let manager = runtime
        .block_on(ResolutionManager::init(
            Arc::new(provider),
            ManagerConfig {
                auto_prefetch_adjacent: false,
                ..Default::default()
            },
        ))
        .unwrap();
    let domain = TimeDomain::new(10 * MICROS_PER_MINUTE, 10 * MICROS_PER_MINUTE + 30 * MICROS_PER_SEC);
    runtime.block_on(manager.get_data_for_domain(domain)).unwrap();

    c.bench_function("fine_request_cached", |b| {
        b.iter(|| {
            runtime
                .block_on(manager.get_data_for_domain(black_box(domain)))
                .unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_eviction_cache,
    bench_state_machine,
    bench_chunk_index,
    bench_cached_fine_request
);
criterion_main!(benches);
