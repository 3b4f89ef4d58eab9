//! Near cache behaviour under concurrent callers.

use std::sync::{Arc, Barrier};
use std::thread;

use hazelcast_runtime::wire::protocol::Data;
use hazelcast_runtime::{EvictionPolicy, NearCache, NearCacheConfig};

fn key(i: usize) -> Data {
    Data::copy_from_slice(format!("key-{}", i).as_bytes())
}

fn cache(max_size: u32, policy: EvictionPolicy) -> Arc<NearCache<u64>> {
    let config = NearCacheConfig::builder("concurrent")
        .max_size(max_size)
        .eviction_policy(policy)
        .build()
        .unwrap();
    Arc::new(NearCache::new(config))
}

#[test]
fn test_one_reservation_wins_per_key() {
    let cache = cache(10_000, EvictionPolicy::Lru);
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cache.try_reserve_for_update(&key(0))
            })
        })
        .collect();
    let winners: Vec<i64> = handles
        .into_iter()
        .filter_map(|handle| handle.join().unwrap())
        .collect();

    assert_eq!(winners.len(), 1);
    assert_eq!(cache.get(&key(0)), None);
    assert!(cache.try_publish_reserved(&key(0), 7, winners[0]));
    assert_eq!(cache.get(&key(0)), Some(7));
}

#[test]
fn test_invalidation_racing_a_fill_always_wins() {
    let cache = cache(10_000, EvictionPolicy::Lru);

    for round in 0..200 {
        let k = key(round);
        let id = cache.try_reserve_for_update(&k).unwrap();
        let barrier = Arc::new(Barrier::new(2));

        let invalidator = {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            let k = k.clone();
            thread::spawn(move || {
                barrier.wait();
                cache.invalidate(&k);
            })
        };
        barrier.wait();
        cache.try_publish_reserved(&k, 1, id);
        invalidator.join().unwrap();

        assert_eq!(cache.get(&k), None, "round {}", round);
    }
    assert_eq!(cache.size(), 0);
}

#[test]
fn test_reservation_after_publish_starts_a_new_fill() {
    let cache = cache(10_000, EvictionPolicy::Lru);

    let first = cache.try_reserve_for_update(&key(1)).unwrap();
    assert!(cache.try_publish_reserved(&key(1), 10, first));

    let second = cache.try_reserve_for_update(&key(1)).unwrap();
    assert_ne!(first, second);
    assert_eq!(cache.get(&key(1)), None);
    assert!(!cache.try_publish_reserved(&key(1), 20, first));
    assert!(cache.try_publish_reserved(&key(1), 20, second));
    assert_eq!(cache.get(&key(1)), Some(20));
}

#[test]
fn test_size_stays_bounded_under_concurrent_puts() {
    for policy in [EvictionPolicy::Lru, EvictionPolicy::Lfu, EvictionPolicy::Random] {
        let cache = cache(64, policy);
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..500 {
                        cache.put(key(t * 1_000 + i), i as u64);
                        cache.get(&key(t * 1_000 + i / 2));
                        assert!(cache.size() <= 64);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = cache.stats();
        assert!(stats.entry_count() <= 64, "{:?}", policy);
        assert_eq!(stats.evictions(), 2_000 - stats.entry_count() as u64, "{:?}", policy);
    }
}
