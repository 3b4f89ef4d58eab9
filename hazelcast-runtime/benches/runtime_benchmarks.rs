//! Benchmarks for the client runtime's hot paths.
//!
//! These cover near-cache reads and eviction, invalidation repair, and
//! member list diffing.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::sync::broadcast;
use uuid::Uuid;

use hazelcast_runtime::wire::protocol::{data_partition_hash, partition_id_for_hash, Data};
use hazelcast_runtime::wire::{HazelcastError, Result};
use hazelcast_runtime::{
    CloseReason, ClusterService, Connection, ConnectionEvent, ConnectionRegistry, EvictionPolicy,
    Member, MetadataStaleReadDetector, NearCache, NearCacheConfig, PartitionTable,
    RepairingHandler, StaleReadDetector,
};

const PARTITION_COUNT: i32 = 271;

#[derive(Debug)]
struct HashPartitions;

impl PartitionTable for HashPartitions {
    fn partition_owner(&self, _partition_id: i32) -> Option<SocketAddr> {
        None
    }

    fn partition_id(&self, key: &Data) -> i32 {
        partition_id_for_hash(data_partition_hash(key), PARTITION_COUNT)
    }

    fn partition_count(&self) -> i32 {
        PARTITION_COUNT
    }
}

#[derive(Debug)]
struct NoConnections(broadcast::Sender<ConnectionEvent>);

#[async_trait]
impl ConnectionRegistry for NoConnections {
    async fn get_or_connect(&self, address: SocketAddr) -> Result<Arc<Connection>> {
        Err(HazelcastError::Transport(format!("no member at {}", address)))
    }

    fn get_connection(&self, _member_uuid: &Uuid) -> Option<Arc<Connection>> {
        None
    }

    fn active_connections(&self) -> HashMap<SocketAddr, Arc<Connection>> {
        HashMap::new()
    }

    fn owner_connection(&self) -> Option<Arc<Connection>> {
        None
    }

    fn close_connection(&self, _connection: &Arc<Connection>, _reason: CloseReason) {}

    fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.0.subscribe()
    }
}

fn key(i: usize) -> Data {
    let mut bytes = vec![0, 0, 0, 0, 0xff, 0xff, 0xff, 0xf9];
    bytes.extend_from_slice(format!("key-{}", i).as_bytes());
    Data::from(bytes)
}

fn near_cache(max_size: u32, policy: EvictionPolicy) -> NearCache<u64> {
    let config = NearCacheConfig::builder("bench")
        .max_size(max_size)
        .eviction_policy(policy)
        .build()
        .unwrap();
    NearCache::new(config)
}

fn benchmark_near_cache_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("near_cache_get");
    group.throughput(Throughput::Elements(1));

    let cache = near_cache(10_000, EvictionPolicy::Lru);
    for i in 0..1_000 {
        cache.put(key(i), i as u64);
    }
    let hit = key(500);
    let miss = key(50_000);

    group.bench_function("hit", |b| b.iter(|| black_box(cache.get(&hit))));
    group.bench_function("miss", |b| b.iter(|| black_box(cache.get(&miss))));

    let detector = Arc::new(MetadataStaleReadDetector::new(Arc::new(HashPartitions)));
    let checked = NearCache::with_stale_read_detector(
        NearCacheConfig::builder("bench").build().unwrap(),
        detector as Arc<dyn StaleReadDetector>,
    );
    checked.put(hit.clone(), 1u64);
    group.bench_function("hit_with_stale_check", |b| {
        b.iter(|| black_box(checked.get(&hit)))
    });

    group.finish();
}

fn benchmark_near_cache_eviction(c: &mut Criterion) {
    let mut group = c.benchmark_group("near_cache_put_at_capacity");
    group.throughput(Throughput::Elements(1));

    for policy in [EvictionPolicy::Lru, EvictionPolicy::Lfu, EvictionPolicy::Random] {
        let cache = near_cache(1_000, policy);
        for i in 0..1_000 {
            cache.put(key(i), i as u64);
        }
        let mut next = 1_000;

        group.bench_with_input(
            BenchmarkId::new("policy", format!("{:?}", policy)),
            &policy,
            |b, _| {
                b.iter(|| {
                    next += 1;
                    cache.put(key(next), next as u64);
                })
            },
        );
    }

    group.finish();
}

fn benchmark_reservation(c: &mut Criterion) {
    let mut group = c.benchmark_group("near_cache_reservation");
    group.throughput(Throughput::Elements(1));

    let cache = near_cache(10_000, EvictionPolicy::Lru);
    let k = key(1);
    group.bench_function("reserve_publish_invalidate", |b| {
        b.iter(|| {
            let id = cache.try_reserve_for_update(&k).unwrap();
            black_box(cache.try_publish_reserved(&k, 1, id));
            cache.invalidate(&k);
        })
    });

    group.finish();
}

fn benchmark_invalidation_repair(c: &mut Criterion) {
    let mut group = c.benchmark_group("invalidation_repair");
    group.throughput(Throughput::Elements(1));

    let detector = Arc::new(MetadataStaleReadDetector::new(Arc::new(HashPartitions)));
    let cache = Arc::new(NearCache::<u64>::with_stale_read_detector(
        NearCacheConfig::builder("bench").build().unwrap(),
        Arc::clone(&detector) as Arc<dyn StaleReadDetector>,
    ));
    let handler = RepairingHandler::new("bench", Some(Uuid::new_v4()), cache, detector);
    let partition_uuid = Some(Uuid::new_v4());
    let source = Some(Uuid::new_v4());
    let keys: Vec<Data> = (0..1_024).map(key).collect();
    let mut sequence = 0i64;

    group.bench_function("in_order", |b| {
        b.iter(|| {
            sequence += 1;
            let k = &keys[sequence as usize % keys.len()];
            handler.handle_invalidation(Some(k), source, partition_uuid, sequence);
        })
    });

    group.finish();
}

fn benchmark_members_view(c: &mut Criterion) {
    let mut group = c.benchmark_group("members_view");

    for size in [3usize, 16, 64] {
        let members: Vec<Member> = (0..size)
            .map(|i| {
                let address: SocketAddr = format!("10.0.0.{}:5701", i + 1).parse().unwrap();
                Member::new(Uuid::new_v4(), address)
            })
            .collect();
        let mut churned = members.clone();
        churned.pop();
        churned.push(Member::new(Uuid::new_v4(), "10.0.1.1:5701".parse().unwrap()));

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("members", size), &size, |b, _| {
            let cluster = ClusterService::new(Arc::new(NoConnections(broadcast::channel(16).0)));
            cluster.handle_members_view(0, members.clone());
            let mut version = 0;
            b.iter(|| {
                version += 2;
                cluster.handle_members_view(version - 1, churned.clone());
                cluster.handle_members_view(version, members.clone());
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_near_cache_get,
    benchmark_near_cache_eviction,
    benchmark_reservation,
    benchmark_invalidation_repair,
    benchmark_members_view,
);
criterion_main!(benches);
