// ==============================================
// CACHE CONCURRENCY TESTS (integration)
// ==============================================
//
// Races get/set/clear across threads and checks that the atomic accounting
// (length, size) stays consistent with what a walk of the cache observes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use arckit::cache::CacheBuilder;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[test]
fn concurrent_get_set_with_evictions() {
    let evicts = Arc::new(AtomicU64::new(0));
    let counter = evicts.clone();
    let cache = Arc::new(
        CacheBuilder::new()
            .capacity(1000)
            .on_evict(move |k: &usize, v: &usize| {
                assert_eq!(*v, *k * 2);
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .build(),
    );

    let kvs: Arc<Vec<(usize, usize)>> = Arc::new((0..10_000).map(|i| (i, i * 2)).collect());

    let handles: Vec<_> = (0..10)
        .map(|seed| {
            let cache = cache.clone();
            let kvs = kvs.clone();
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed);
                for _ in 0..20_000 {
                    let (k, v) = kvs[rng.gen_range(0..kvs.len())];
                    match cache.get(&k) {
                        Some(got) => assert_eq!(got, v),
                        None => cache.set(k, v),
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(evicts.load(Ordering::SeqCst) > 0, "expected evictions");

    // Quiescent invariants: the counters agree with a walk of the cache,
    // and a final pass brings size under capacity.
    assert_eq!(cache.iter().count(), cache.len());
    assert_eq!(cache.size(), cache.len() as i64);

    assert!(!cache.evict());
    assert!(cache.size() <= cache.capacity());
}

#[test]
fn sizer_accounting_survives_replacement_races() {
    let cache = Arc::new(CacheBuilder::new().capacity(1000).build());

    let goroutines = 10;
    for _round in 0..100 {
        let handles: Vec<_> = (0..goroutines)
            .map(|id: u32| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        let size = 1 + id % goroutines;
                        // The value records the size it was stored with.
                        cache.set_sized(1u64, size, size);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let walked: i64 = cache.iter().map(|(_k, v)| i64::from(v)).sum();
        assert_eq!(
            cache.size(),
            walked,
            "cache size diverged from walked size"
        );
    }
}

#[test]
fn concurrent_clear_leaves_consistent_state() {
    let cache = Arc::new(CacheBuilder::new().capacity(80).build());

    let handles: Vec<_> = (0..10)
        .map(|seed| {
            let cache = cache.clone();
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed);
                for _ in 0..100 {
                    cache.set(rng.gen_range(0..100u32), ());
                }
                cache.clear();
                for _ in 0..100 {
                    cache.set(rng.gen_range(0..100u32), ());
                }
                cache.clear();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Every set is followed by a same-thread clear, so the cache ends empty.
    assert_eq!(cache.size(), 0);
    assert_eq!(cache.len(), 0);
    for k in 0..100u32 {
        assert_eq!(cache.get(&k), None);
    }
    assert_eq!(cache.iter().count(), 0);
}

#[test]
fn sized_random_workload_keeps_accounting_exact() {
    let cache = CacheBuilder::new().capacity(1000).build();
    let mut rng = StdRng::seed_from_u64(5);

    for _ in 0..10_000 {
        let jiggle = rng.gen_range(0..1000u32);
        let key = rng.gen_range(0..1000u32);
        let size = rng.gen_range(0..=10u32);
        cache.get(&jiggle); // reorder the policy
        cache.set_sized(key, size.max(1), size);
    }

    let walked: i64 = cache.iter().map(|(_k, v)| i64::from(v)).sum();
    assert_eq!(cache.size(), walked);
    assert!(cache.size() > 0);
    assert_eq!(cache.len(), cache.iter().count());
}
