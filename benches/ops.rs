//! Micro-operation benchmarks for the cache core.
//!
//! Run with: `cargo bench --bench ops`
//!
//! Measures per-operation latency (nanoseconds) for get and set across the
//! three map backends under identical conditions.

use std::hint::black_box;
use std::time::Instant;

use arckit::cache::{Cache, CacheBuilder};
use arckit::maps::{BucketedMap, LockedMap, StripedMap};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};

const CAPACITY: i64 = 16_384;
const OPS: u64 = 100_000;

fn filled_cache(backend: &str) -> Cache<u64, u64> {
    let builder = CacheBuilder::new().capacity(CAPACITY);
    let cache = match backend {
        "locked" => builder.map(LockedMap::new()).build(),
        "bucketed" => builder.map(BucketedMap::new(256)).build(),
        "striped" => builder.map(StripedMap::new(256)).build(),
        other => panic!("unknown backend {other}"),
    };
    for i in 0..CAPACITY as u64 {
        cache.set(i, i);
    }
    cache
}

// ============================================================================
// Get Hit Latency (ns/op)
// ============================================================================

fn bench_get_hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("get_hit_ns");
    group.throughput(Throughput::Elements(OPS));

    for backend in ["locked", "bucketed", "striped"] {
        group.bench_function(backend, |b| {
            b.iter_custom(|iters| {
                let cache = filled_cache(backend);
                let start = Instant::now();
                for _ in 0..iters {
                    for i in 0..OPS {
                        let key = i % (CAPACITY as u64);
                        black_box(cache.get(&key));
                    }
                }
                start.elapsed()
            })
        });
    }

    group.finish();
}

// ============================================================================
// Set Latency with Evictions (ns/op)
// ============================================================================

fn bench_set_evicting(c: &mut Criterion) {
    let mut group = c.benchmark_group("set_evicting_ns");
    group.throughput(Throughput::Elements(OPS));

    for backend in ["locked", "bucketed", "striped"] {
        group.bench_function(backend, |b| {
            b.iter_custom(|iters| {
                let cache = filled_cache(backend);
                let start = Instant::now();
                for iter in 0..iters {
                    for i in 0..OPS {
                        // Cycle over twice the capacity so most sets insert
                        // and trigger the eviction pass.
                        let key = (iter * OPS + i) % (2 * CAPACITY as u64);
                        cache.set(key, key);
                    }
                }
                start.elapsed()
            })
        });
    }

    group.finish();
}

// ============================================================================
// Peek Latency (ns/op, no promotion)
// ============================================================================

fn bench_peek(c: &mut Criterion) {
    let mut group = c.benchmark_group("peek_ns");
    group.throughput(Throughput::Elements(OPS));

    for backend in ["locked", "bucketed", "striped"] {
        group.bench_function(backend, |b| {
            b.iter_custom(|iters| {
                let cache = filled_cache(backend);
                let start = Instant::now();
                for _ in 0..iters {
                    for i in 0..OPS {
                        let key = i % (CAPACITY as u64);
                        black_box(cache.peek(&key));
                    }
                }
                start.elapsed()
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_get_hit, bench_set_evicting, bench_peek);
criterion_main!(benches);
