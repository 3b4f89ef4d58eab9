//! Async runtime core for [Hazelcast](https://hazelcast.com/) clients.
//!
//! This crate holds the machinery every Hazelcast client needs beneath its
//! data-structure proxies. It speaks the Open Binary Client Protocol through
//! [`hazelcast_wire`] and is built on [Tokio](https://tokio.rs/).
//!
//! | Component | Purpose |
//! |-----------|---------|
//! | [`InvocationService`] | correlates requests with responses, routes them to members and retries until the deadline |
//! | [`ClusterService`] | tracks the versioned member list and fires membership events |
//! | [`PartitionService`] | maps keys to partitions and partitions to owners |
//! | [`ListenerService`] | keeps server-side listener registrations alive across connection churn |
//! | [`NearCache`] | client-side cache with reservation-guarded fills and sampled eviction |
//! | [`HazelcastClient`] | wires everything together over a [`ConnectionManager`] |
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use hazelcast_runtime::{ClientConfig, HazelcastClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::builder()
//!         .cluster_name("dev")
//!         .add_address("127.0.0.1:5701".parse()?)
//!         .build()?;
//!     let client = HazelcastClient::new(config).await?;
//!
//!     for member in client.cluster().get_members() {
//!         println!("{}", member);
//!     }
//!
//!     client.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Configuration
//!
//! Use [`ClientConfig::builder()`](ClientConfig::builder) with closure
//! sub-builders for network and retry settings:
//!
//! ```rust,no_run
//! use hazelcast_runtime::{ClientConfig, EvictionPolicy, NearCacheConfig};
//! use std::time::Duration;
//!
//! let config = ClientConfig::builder()
//!     .cluster_name("production")
//!     .add_address("10.0.0.1:5701".parse().unwrap())
//!     .network(|n| n
//!         .smart_routing(true)
//!         .heartbeat_interval(Duration::from_secs(5)))
//!     .retry(|r| r
//!         .initial_backoff(Duration::from_millis(100))
//!         .max_backoff(Duration::from_secs(30))
//!         .multiplier(2.0))
//!     .add_near_cache_config(
//!         NearCacheConfig::builder("products-*")
//!             .max_size(50_000)
//!             .eviction_policy(EvictionPolicy::Lfu)
//!             .build()
//!             .expect("invalid near cache config"),
//!     )
//!     .build()
//!     .expect("invalid config");
//! ```

#![warn(missing_docs)]

pub mod cache;
mod client;
pub mod cluster;
pub mod codec;
pub mod config;
pub mod connection;
pub mod invocation;
pub mod listener;
mod sync;
#[doc(hidden)]
pub mod testing;

pub use cache::{
    EvictionPolicy, MetaDataContainer, MetadataStaleReadDetector, NearCache, NearCacheConfig,
    NearCacheConfigBuilder, NearCacheManager, NearCacheStats, RecordMetadata, RepairingHandler,
    StaleReadDetector,
};
pub use client::HazelcastClient;
pub use cluster::{
    ClusterService, ClusterViewHandler, MemberListSnapshot, Partition, PartitionService,
    DEFAULT_INITIAL_MEMBERS_TIMEOUT,
};
pub use config::{
    ClientConfig, ClientConfigBuilder, ConfigError, InvocationConfig, InvocationConfigBuilder,
    NetworkConfig, NetworkConfigBuilder, RetryConfig, RetryConfigBuilder, SecurityConfig,
    SecurityConfigBuilder,
};
pub use connection::{
    CloseReason, Connection, ConnectionEvent, ConnectionId, ConnectionManager, ConnectionRegistry,
    HeartbeatService,
};
pub use hazelcast_wire as wire;
pub use hazelcast_wire::{HazelcastError, Result};
pub use invocation::{
    EventHandler, InvocationService, InvocationTarget, ListenerCodec, PartitionTable,
};
pub use listener::{
    EventRegistration, InitialMembershipEvent, InitialMembershipListener, LifecycleEvent,
    ListenerId, ListenerService, ListenerStats, Member, MemberEvent, MemberEventType,
    MembershipListener,
};
