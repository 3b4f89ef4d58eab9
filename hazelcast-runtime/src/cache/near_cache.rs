//! Near-cache implementation for client-side caching.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use hazelcast_wire::protocol::Data;
use rand::seq::IteratorRandom;
use tokio::time::Instant;

use super::invalidation::{RecordMetadata, StaleReadDetector};
use super::{EvictionPolicy, NearCacheConfig};
use crate::sync::lock;

/// Status of a record that may be read.
const READ_PERMITTED: i64 = -1;

/// Statistics for near-cache operations.
#[derive(Debug, Clone, Default)]
pub struct NearCacheStats {
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
    entry_count: usize,
}

impl NearCacheStats {
    /// Returns the number of cache hits.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Returns the number of cache misses.
    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Returns the number of entries evicted due to capacity.
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Returns the number of entries expired due to TTL or max-idle.
    pub fn expirations(&self) -> u64 {
        self.expirations
    }

    /// Returns the number of entries held when the statistics were taken.
    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    /// Returns the hit ratio (hits / total lookups).
    ///
    /// Returns `0.0` if no lookups have been performed.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct StatCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl StatCounters {
    fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }
}

struct RecordState<V> {
    value: Option<V>,
    created_at: Instant,
    last_accessed: Instant,
    hits: u64,
    metadata: Option<RecordMetadata>,
}

/// A cached entry. `status` is either [`READ_PERMITTED`] or the id of the
/// reservation that is filling the record.
struct CacheRecord<V> {
    status: AtomicI64,
    state: Mutex<RecordState<V>>,
}

impl<V> CacheRecord<V> {
    fn new(status: i64, value: Option<V>, metadata: Option<RecordMetadata>, now: Instant) -> Self {
        Self {
            status: AtomicI64::new(status),
            state: Mutex::new(RecordState {
                value,
                created_at: now,
                last_accessed: now,
                hits: 0,
                metadata,
            }),
        }
    }

    fn cas_status(&self, expected: i64, new: i64) -> bool {
        self.status
            .compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

struct EvictionCandidate<V> {
    key: Data,
    record: Arc<CacheRecord<V>>,
}

type RecordMap<V> = HashMap<Data, Arc<CacheRecord<V>>>;

/// A client-side near-cache keyed by serialized keys.
///
/// Reads are hits only for published records that are neither expired nor
/// flagged stale by the configured [`StaleReadDetector`]. A caller filling
/// the cache from the cluster first reserves the key with
/// [`try_reserve_for_update`](Self::try_reserve_for_update) and then
/// publishes with [`try_publish_reserved`](Self::try_publish_reserved); the
/// publish is dropped if the record was invalidated or re-reserved in
/// between. A caller whose fetch fails should [`invalidate`](Self::invalidate)
/// the key to release the reservation.
pub struct NearCache<V> {
    config: NearCacheConfig,
    records: Mutex<RecordMap<V>>,
    eviction_pool: Mutex<Vec<EvictionCandidate<V>>>,
    reservation_counter: AtomicI64,
    stale_read_detector: Option<Arc<dyn StaleReadDetector>>,
    stats: StatCounters,
}

impl<V> std::fmt::Debug for NearCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NearCache")
            .field("config", &self.config)
            .field("store_size", &lock(&self.records).len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl<V> NearCache<V>
where
    V: Clone,
{
    /// Creates a near-cache whose records are never considered stale.
    pub fn new(config: NearCacheConfig) -> Self {
        Self::build(config, None)
    }

    /// Creates a near-cache that consults `detector` on every read.
    pub fn with_stale_read_detector(
        config: NearCacheConfig,
        detector: Arc<dyn StaleReadDetector>,
    ) -> Self {
        Self::build(config, Some(detector))
    }

    fn build(config: NearCacheConfig, detector: Option<Arc<dyn StaleReadDetector>>) -> Self {
        Self {
            config,
            records: Mutex::new(HashMap::new()),
            eviction_pool: Mutex::new(Vec::new()),
            reservation_counter: AtomicI64::new(0),
            stale_read_detector: detector,
            stats: StatCounters::default(),
        }
    }

    /// Returns the cache name.
    pub fn name(&self) -> &str {
        self.config.name()
    }

    /// Returns a reference to the cache configuration.
    pub fn config(&self) -> &NearCacheConfig {
        &self.config
    }

    /// Returns a clone of the cached value if it may be read.
    ///
    /// Expired and stale records are removed.
    pub fn get(&self, key: &Data) -> Option<V> {
        let record = lock(&self.records).get(key).cloned();
        let Some(record) = record else {
            self.stats.miss();
            return None;
        };
        if record.status.load(Ordering::Acquire) != READ_PERMITTED {
            self.stats.miss();
            return None;
        }

        let now = Instant::now();
        let mut state = lock(&record.state);

        let stale = match (&self.stale_read_detector, &state.metadata) {
            (Some(detector), Some(metadata)) => detector.is_stale_read(key, metadata),
            _ => false,
        };
        if stale {
            drop(state);
            self.remove_record(key, &record);
            self.stats.miss();
            return None;
        }

        if self.is_expired(&state, now) {
            drop(state);
            if self.remove_record(key, &record) {
                self.stats.expirations.fetch_add(1, Ordering::Relaxed);
            }
            self.stats.miss();
            return None;
        }

        let Some(value) = state.value.clone() else {
            self.stats.miss();
            return None;
        };
        state.last_accessed = now;
        state.hits += 1;
        self.stats.hits.fetch_add(1, Ordering::Relaxed);
        Some(value)
    }

    /// Stores a value, replacing any record for the key.
    pub fn put(&self, key: Data, value: V) {
        let metadata = self.invalidation_metadata(&key);
        let record = Arc::new(CacheRecord::new(
            READ_PERMITTED,
            Some(value),
            metadata,
            Instant::now(),
        ));

        let mut records = lock(&self.records);
        self.evict_if_required(&mut records);
        records.insert(key, record);
    }

    /// Reserves `key` for a fill from the cluster.
    ///
    /// Returns the reservation id, or `None` if another fill holds the key.
    pub fn try_reserve_for_update(&self, key: &Data) -> Option<i64> {
        let reservation_id = self.reservation_counter.fetch_add(1, Ordering::AcqRel);

        let mut records = lock(&self.records);
        if let Some(record) = records.get(key).cloned() {
            drop(records);
            return record
                .cas_status(READ_PERMITTED, reservation_id)
                .then_some(reservation_id);
        }

        self.evict_if_required(&mut records);
        records.insert(
            key.clone(),
            Arc::new(CacheRecord::new(reservation_id, None, None, Instant::now())),
        );
        Some(reservation_id)
    }

    /// Publishes the value fetched under `reservation_id`.
    ///
    /// Returns `false`, leaving the cache untouched, if the record is gone or
    /// no longer reserved under that id.
    pub fn try_publish_reserved(&self, key: &Data, value: V, reservation_id: i64) -> bool {
        let record = lock(&self.records).get(key).cloned();
        let Some(record) = record else {
            return false;
        };

        let metadata = self.invalidation_metadata(key);
        let mut state = lock(&record.state);
        if !record.cas_status(reservation_id, READ_PERMITTED) {
            return false;
        }
        let now = Instant::now();
        state.value = Some(value);
        state.created_at = now;
        state.last_accessed = now;
        state.metadata = metadata;
        true
    }

    /// Removes the record for `key`, releasing any reservation on it.
    pub fn invalidate(&self, key: &Data) {
        lock(&self.records).remove(key);
    }

    /// Removes all entries from the cache.
    pub fn clear(&self) {
        let mut records = lock(&self.records);
        records.clear();
        lock(&self.eviction_pool).clear();
    }

    /// Returns the number of records, reserved ones included.
    pub fn size(&self) -> usize {
        lock(&self.records).len()
    }

    /// Returns a snapshot of the statistics.
    pub fn stats(&self) -> NearCacheStats {
        NearCacheStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            expirations: self.stats.expirations.load(Ordering::Relaxed),
            entry_count: self.size(),
        }
    }

    fn invalidation_metadata(&self, key: &Data) -> Option<RecordMetadata> {
        let detector = self.stale_read_detector.as_ref()?;
        let partition_id = detector.partition_id(key);
        let container = detector.metadata_container(partition_id);
        Some(RecordMetadata {
            partition_id,
            sequence: container.sequence(),
            uuid: container.uuid(),
        })
    }

    fn remove_record(&self, key: &Data, record: &Arc<CacheRecord<V>>) -> bool {
        let mut records = lock(&self.records);
        match records.get(key) {
            Some(current) if Arc::ptr_eq(current, record) => {
                records.remove(key);
                true
            }
            _ => false,
        }
    }

    fn is_expired(&self, state: &RecordState<V>, now: Instant) -> bool {
        let ttl = self.config.time_to_live();
        let max_idle = self.config.max_idle();

        if !ttl.is_zero() && now.saturating_duration_since(state.created_at) > ttl {
            return true;
        }
        !max_idle.is_zero() && now.saturating_duration_since(state.last_accessed) > max_idle
    }

    /// Runs one eviction round if the cache is full.
    fn evict_if_required(&self, records: &mut RecordMap<V>) {
        if self.config.eviction_policy() == EvictionPolicy::None
            || records.len() < self.config.max_size() as usize
        {
            return;
        }

        let now = Instant::now();
        let sample = records
            .iter()
            .choose_multiple(
                &mut rand::thread_rng(),
                self.config.eviction_sampling_count() as usize,
            )
            .into_iter()
            .map(|(key, record)| EvictionCandidate {
                key: key.clone(),
                record: Arc::clone(record),
            })
            .collect::<Vec<_>>();

        let mut survivors = Vec::with_capacity(sample.len());
        let mut expired = 0;
        for candidate in sample {
            if self.is_expired(&lock(&candidate.record.state), now) {
                records.remove(&candidate.key);
                expired += 1;
            } else {
                survivors.push(candidate);
            }
        }
        if expired > 0 {
            self.stats.expirations.fetch_add(expired, Ordering::Relaxed);
            return;
        }

        let mut pool = lock(&self.eviction_pool);
        pool.extend(survivors);
        pool.retain(|c| {
            records
                .get(&c.key)
                .map_or(false, |live| Arc::ptr_eq(live, &c.record))
        });
        match self.config.eviction_policy() {
            EvictionPolicy::Lru => {
                pool.sort_by_cached_key(|c| lock(&c.record.state).last_accessed)
            }
            EvictionPolicy::Lfu => pool.sort_by_cached_key(|c| lock(&c.record.state).hits),
            EvictionPolicy::Random | EvictionPolicy::None => {}
        }
        pool.dedup_by(|a, b| Arc::ptr_eq(&a.record, &b.record));
        pool.truncate(self.config.eviction_sampling_pool_size() as usize);

        if !pool.is_empty() {
            let victim = pool.remove(0);
            records.remove(&victim.key);
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn make_config(name: &str) -> NearCacheConfig {
        NearCacheConfig::builder(name).build().unwrap()
    }

    fn key(name: &str) -> Data {
        Data::copy_from_slice(name.as_bytes())
    }

    #[test]
    fn test_put_and_get() {
        let cache = NearCache::new(make_config("test"));

        cache.put(key("key1"), "value1".to_string());
        assert_eq!(cache.get(&key("key1")), Some("value1".to_string()));
    }

    #[test]
    fn test_get_miss() {
        let cache: NearCache<String> = NearCache::new(make_config("test"));

        assert_eq!(cache.get(&key("nonexistent")), None);
        assert_eq!(cache.stats().misses(), 1);
    }

    #[test]
    fn test_invalidate_and_clear() {
        let cache = NearCache::new(make_config("test"));

        cache.put(key("key1"), 1);
        cache.put(key("key2"), 2);
        cache.invalidate(&key("key1"));
        assert_eq!(cache.get(&key("key1")), None);
        assert_eq!(cache.size(), 1);

        cache.clear();
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_stats_hits_and_misses() {
        let cache = NearCache::new(make_config("test"));
        cache.put(key("key1"), 1);

        cache.get(&key("key1"));
        cache.get(&key("key1"));
        cache.get(&key("missing"));

        let stats = cache.stats();
        assert_eq!(stats.hits(), 2);
        assert_eq!(stats.misses(), 1);
        assert_eq!(stats.entry_count(), 1);
        assert!((stats.hit_ratio() - 2.0 / 3.0).abs() < f64::EPSILON);
        assert_eq!(NearCacheStats::default().hit_ratio(), 0.0);
    }

    #[test]
    fn test_reservation_collapses_concurrent_fills() {
        let cache = NearCache::new(make_config("test"));

        let first = cache.try_reserve_for_update(&key("k")).unwrap();
        assert_eq!(cache.try_reserve_for_update(&key("k")), None);
        assert_eq!(cache.get(&key("k")), None);

        assert!(cache.try_publish_reserved(&key("k"), 7, first));
        assert_eq!(cache.get(&key("k")), Some(7));

        let second = cache.try_reserve_for_update(&key("k")).unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_publish_after_invalidation_is_dropped() {
        let cache = NearCache::new(make_config("test"));

        let reservation = cache.try_reserve_for_update(&key("k")).unwrap();
        cache.invalidate(&key("k"));
        assert!(!cache.try_publish_reserved(&key("k"), 1, reservation));
        assert_eq!(cache.get(&key("k")), None);
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_publish_with_old_reservation_is_dropped() {
        let cache = NearCache::new(make_config("test"));

        let old = cache.try_reserve_for_update(&key("k")).unwrap();
        cache.invalidate(&key("k"));
        let new = cache.try_reserve_for_update(&key("k")).unwrap();

        assert!(!cache.try_publish_reserved(&key("k"), 1, old));
        assert!(cache.try_publish_reserved(&key("k"), 2, new));
        assert_eq!(cache.get(&key("k")), Some(2));
    }

    #[test]
    fn test_put_replaces_reserved_record() {
        let cache = NearCache::new(make_config("test"));

        let reservation = cache.try_reserve_for_update(&key("k")).unwrap();
        cache.put(key("k"), 5);
        assert!(!cache.try_publish_reserved(&key("k"), 6, reservation));
        assert_eq!(cache.get(&key("k")), Some(5));
    }

    #[test]
    fn test_eviction_keeps_size_bounded() {
        for policy in [EvictionPolicy::Lru, EvictionPolicy::Lfu, EvictionPolicy::Random] {
            let config = NearCacheConfig::builder("test")
                .max_size(10)
                .eviction_policy(policy)
                .build()
                .unwrap();
            let cache = NearCache::new(config);

            for i in 0..100 {
                cache.put(key(&format!("key-{}", i)), i);
                assert!(cache.size() <= 10);
            }
            assert_eq!(cache.stats().evictions(), 90);
        }
    }

    #[test]
    fn test_reservations_count_towards_size() {
        let config = NearCacheConfig::builder("test").max_size(2).build().unwrap();
        let cache: NearCache<i32> = NearCache::new(config);

        for i in 0..5 {
            cache.try_reserve_for_update(&key(&format!("key-{}", i)));
            assert!(cache.size() <= 2);
        }
    }

    #[test]
    fn test_lru_evicts_least_recently_used() {
        let config = NearCacheConfig::builder("test")
            .max_size(3)
            .eviction_sampling_count(3)
            .build()
            .unwrap();
        let cache = NearCache::new(config);

        cache.put(key("a"), 1);
        std::thread::sleep(Duration::from_millis(5));
        cache.put(key("b"), 2);
        std::thread::sleep(Duration::from_millis(5));
        cache.put(key("c"), 3);
        std::thread::sleep(Duration::from_millis(5));
        cache.get(&key("a"));

        cache.put(key("d"), 4);
        assert_eq!(cache.get(&key("b")), None);
        assert_eq!(cache.get(&key("a")), Some(1));
        assert_eq!(cache.get(&key("d")), Some(4));
    }

    #[test]
    fn test_lfu_evicts_least_frequently_used() {
        let config = NearCacheConfig::builder("test")
            .max_size(3)
            .eviction_policy(EvictionPolicy::Lfu)
            .eviction_sampling_count(3)
            .build()
            .unwrap();
        let cache = NearCache::new(config);

        cache.put(key("a"), 1);
        cache.put(key("b"), 2);
        cache.put(key("c"), 3);
        for _ in 0..3 {
            cache.get(&key("a"));
            cache.get(&key("c"));
        }
        cache.get(&key("b"));

        cache.put(key("d"), 4);
        assert_eq!(cache.get(&key("b")), None);
        assert_eq!(cache.size(), 3);
    }

    #[test]
    fn test_eviction_none_keeps_growing() {
        let config = NearCacheConfig::builder("test")
            .max_size(2)
            .eviction_policy(EvictionPolicy::None)
            .build()
            .unwrap();
        let cache = NearCache::new(config);

        for i in 0..5 {
            cache.put(key(&format!("key-{}", i)), i);
        }
        assert_eq!(cache.size(), 5);
        assert_eq!(cache.stats().evictions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiration() {
        let config = NearCacheConfig::builder("test")
            .time_to_live(Duration::from_secs(10))
            .build()
            .unwrap();
        let cache = NearCache::new(config);
        cache.put(key("k"), 1);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cache.get(&key("k")), Some(1));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.get(&key("k")), None);
        assert_eq!(cache.stats().expirations(), 1);
        assert_eq!(cache.size(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_idle_expiration() {
        let config = NearCacheConfig::builder("test")
            .max_idle(Duration::from_secs(10))
            .build()
            .unwrap();
        let cache = NearCache::new(config);
        cache.put(key("k"), 1);

        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(8)).await;
            assert_eq!(cache.get(&key("k")), Some(1));
        }

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get(&key("k")), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_sample_short_circuits_eviction() {
        let config = NearCacheConfig::builder("test")
            .max_size(4)
            .time_to_live(Duration::from_secs(10))
            .eviction_sampling_count(4)
            .build()
            .unwrap();
        let cache = NearCache::new(config);
        for i in 0..4 {
            cache.put(key(&format!("old-{}", i)), i);
        }

        tokio::time::advance(Duration::from_secs(11)).await;
        cache.put(key("new"), 99);

        let stats = cache.stats();
        assert_eq!(stats.expirations(), 4);
        assert_eq!(stats.evictions(), 0);
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn test_near_cache_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NearCache<String>>();
        assert_send_sync::<NearCacheStats>();
    }
}
