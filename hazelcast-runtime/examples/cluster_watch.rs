//! Example: watching a cluster.
//!
//! Connects, prints the member list and partition table, then logs
//! lifecycle and membership changes until Ctrl-C. A near cache for the
//! "products-*" maps follows the cluster's invalidations meanwhile.
//!
//! Run with: `RUST_LOG=hazelcast_runtime=debug cargo run --example cluster_watch`
//!
//! Requires a Hazelcast cluster running on localhost:5701.

use std::time::Duration;

use hazelcast_runtime::codec::client_ping;
use hazelcast_runtime::{
    ClientConfig, EvictionPolicy, HazelcastClient, MemberEventType, NearCacheConfig,
    PartitionTable,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = ClientConfig::builder()
        .cluster_name("dev")
        .add_address("127.0.0.1:5701".parse()?)
        .network(|n| n.heartbeat_interval(Duration::from_secs(5)))
        .add_near_cache_config(
            NearCacheConfig::builder("products-*")
                .max_size(1_000)
                .eviction_policy(EvictionPolicy::Lfu)
                .time_to_live(Duration::from_secs(300))
                .build()?,
        )
        .build()?;

    let client = HazelcastClient::new(config).await?;
    let mut lifecycle = client.subscribe_lifecycle();
    let mut members = client.cluster().subscribe();

    println!("Connected as {}", client.client_uuid());
    for member in client.cluster().get_members() {
        println!("  {}", member);
    }
    let partitions = client.partitions();
    println!(
        "{} partitions, table version {}",
        partitions.partition_count(),
        partitions.partition_table_version()
    );
    if let Some(owner) = partitions.partition_owner(0) {
        println!("partition 0 is owned by {}", owner);
    }

    let started = std::time::Instant::now();
    client
        .invocations()
        .invoke_on_random_target(client_ping::encode_request())
        .await?;
    println!("ping round trip: {:?}", started.elapsed());

    if let Some(cache) = client.get_near_cache("products-eu").await? {
        println!("near cache '{}' registered for invalidations", cache.name());
    }

    loop {
        tokio::select! {
            event = lifecycle.recv() => match event {
                Ok(event) => println!("lifecycle: {}", event.name()),
                Err(_) => break,
            },
            event = members.recv() => match event {
                Ok(event) => {
                    let verb = match event.event_type {
                        MemberEventType::Added => "joined",
                        MemberEventType::Removed => "left",
                    };
                    println!("{} {} ({} members)", event.member, verb, event.members.len());
                }
                Err(_) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    for (name, stats) in client.near_caches().stats() {
        println!(
            "{}: {} entries, hit ratio {:.2}",
            name,
            stats.entry_count(),
            stats.hit_ratio()
        );
    }
    client.shutdown().await?;
    Ok(())
}
