//! Per-map near caches and their invalidation listeners.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use hazelcast_wire::protocol::Data;
use hazelcast_wire::Result;
use tracing::instrument;
use uuid::Uuid;

use super::invalidation::{MetadataStaleReadDetector, RepairingHandler, StaleReadDetector};
use super::near_cache::{NearCache, NearCacheStats};
use crate::codec::map_add_near_cache_invalidation_listener::NearCacheInvalidationCodec;
use crate::config::ClientConfig;
use crate::invocation::PartitionTable;
use crate::listener::{ListenerId, ListenerService};
use crate::sync::lock;

struct ManagedNearCache {
    cache: Arc<NearCache<Data>>,
    registration: Option<ListenerId>,
}

/// Creates, looks up and destroys the near caches of a client.
///
/// A map gets a near cache when a configured [`NearCacheConfig`] matches its
/// name. Caches configured with `invalidate_on_change` register an
/// invalidation listener through the [`ListenerService`] and repair their
/// metadata from its events.
///
/// [`NearCacheConfig`]: super::NearCacheConfig
pub struct NearCacheManager {
    config: Arc<ClientConfig>,
    local_uuid: Uuid,
    partitions: Arc<dyn PartitionTable>,
    listeners: Arc<ListenerService>,
    creation: tokio::sync::Mutex<()>,
    caches: Mutex<HashMap<String, ManagedNearCache>>,
}

impl fmt::Debug for NearCacheManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NearCacheManager")
            .field("local_uuid", &self.local_uuid)
            .field("caches", &self.names())
            .finish()
    }
}

impl NearCacheManager {
    /// Creates a manager for the near caches configured in `config`.
    pub fn new(
        config: Arc<ClientConfig>,
        local_uuid: Uuid,
        partitions: Arc<dyn PartitionTable>,
        listeners: Arc<ListenerService>,
    ) -> Self {
        Self {
            config,
            local_uuid,
            partitions,
            listeners,
            creation: tokio::sync::Mutex::new(()),
            caches: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the near cache of map `name`, creating it on first use.
    ///
    /// Returns `None` if no near-cache configuration matches the name.
    #[instrument(name = "near_cache.get_or_create", skip(self))]
    pub async fn get_or_create(&self, name: &str) -> Result<Option<Arc<NearCache<Data>>>> {
        let Some(config) = self.config.find_near_cache(name) else {
            return Ok(None);
        };

        let _creating = self.creation.lock().await;
        if let Some(existing) = self.get(name) {
            return Ok(Some(existing));
        }

        let config = config.clone();
        let (cache, registration) = if config.invalidate_on_change() {
            let detector = Arc::new(MetadataStaleReadDetector::new(Arc::clone(&self.partitions)));
            let cache = Arc::new(NearCache::with_stale_read_detector(
                config,
                Arc::clone(&detector) as Arc<dyn StaleReadDetector>,
            ));
            let handler = RepairingHandler::new(
                name,
                Some(self.local_uuid),
                Arc::clone(&cache),
                detector,
            );
            let id = self
                .listeners
                .register(
                    Arc::new(NearCacheInvalidationCodec::new(name)),
                    Arc::new(handler),
                )
                .await?;
            (cache, Some(id))
        } else {
            (Arc::new(NearCache::new(config)), None)
        };

        tracing::info!(map = name, invalidating = registration.is_some(), "created near cache");
        lock(&self.caches).insert(
            name.to_string(),
            ManagedNearCache {
                cache: Arc::clone(&cache),
                registration,
            },
        );
        Ok(Some(cache))
    }

    /// Returns the near cache of map `name` if it was created.
    pub fn get(&self, name: &str) -> Option<Arc<NearCache<Data>>> {
        lock(&self.caches)
            .get(name)
            .map(|managed| Arc::clone(&managed.cache))
    }

    /// Returns the invalidation listener of map `name`'s near cache.
    pub fn listener_id(&self, name: &str) -> Option<ListenerId> {
        lock(&self.caches)
            .get(name)
            .and_then(|managed| managed.registration)
    }

    /// Returns the names of the maps with a near cache.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.caches).keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the statistics of every near cache, keyed by map name.
    pub fn stats(&self) -> HashMap<String, NearCacheStats> {
        lock(&self.caches)
            .iter()
            .map(|(name, managed)| (name.clone(), managed.cache.stats()))
            .collect()
    }

    /// Clears every near cache.
    pub fn clear_all(&self) {
        for managed in lock(&self.caches).values() {
            managed.cache.clear();
        }
    }

    /// Destroys the near cache of map `name` and removes its listener.
    ///
    /// Returns `false` if the map had no near cache.
    #[instrument(name = "near_cache.destroy", skip(self))]
    pub async fn destroy(&self, name: &str) -> bool {
        let _creating = self.creation.lock().await;
        let Some(managed) = lock(&self.caches).remove(name) else {
            return false;
        };
        managed.cache.clear();
        if let Some(id) = managed.registration {
            self.listeners.deregister(id).await;
        }
        tracing::info!(map = name, "destroyed near cache");
        true
    }

    /// Destroys every near cache.
    pub async fn destroy_all(&self) {
        let _creating = self.creation.lock().await;
        let drained: Vec<(String, ManagedNearCache)> = lock(&self.caches).drain().collect();
        for (name, managed) in drained {
            managed.cache.clear();
            if let Some(id) = managed.registration {
                self.listeners.deregister(id).await;
            }
            tracing::debug!(map = %name, "destroyed near cache");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::NearCacheConfig;
    use crate::cluster::ClusterService;
    use crate::codec::map_add_near_cache_invalidation_listener::{self as invalidation, InvalidationEvent};
    use crate::config::ClientConfigBuilder;
    use crate::invocation::InvocationService;
    use crate::testing::{ListenerMember, NoPartitions, StaticRegistry};
    use std::time::Duration;

    struct Fixture {
        registry: Arc<StaticRegistry>,
        invocations: Arc<InvocationService>,
        listeners: Arc<ListenerService>,
        manager: NearCacheManager,
    }

    fn fixture() -> Fixture {
        let config = Arc::new(
            ClientConfigBuilder::new()
                .invocation_timeout(Duration::from_secs(5))
                .add_near_cache_config(NearCacheConfig::builder("prices-*").build().unwrap())
                .add_near_cache_config(
                    NearCacheConfig::builder("local")
                        .invalidate_on_change(false)
                        .build()
                        .unwrap(),
                )
                .build()
                .unwrap(),
        );
        let registry = Arc::new(StaticRegistry::new());
        let invocations = Arc::new(InvocationService::new(
            &config,
            registry.clone(),
            Arc::new(NoPartitions),
        ));
        let cluster = Arc::new(ClusterService::new(registry.clone()));
        let listeners = Arc::new(ListenerService::new(
            config.network(),
            registry.clone(),
            Arc::clone(&invocations),
            cluster,
        ));
        let manager = NearCacheManager::new(
            config,
            Uuid::new_v4(),
            Arc::new(NoPartitions),
            Arc::clone(&listeners),
        );
        Fixture {
            registry,
            invocations,
            listeners,
            manager,
        }
    }

    fn key(name: &str) -> Data {
        Data::copy_from_slice(name.as_bytes())
    }

    #[tokio::test]
    async fn test_unconfigured_map_has_no_cache() {
        let f = fixture();
        assert!(f.manager.get_or_create("orders").await.unwrap().is_none());
        assert!(f.manager.get("orders").is_none());
    }

    #[tokio::test]
    async fn test_get_or_create_returns_same_instance() {
        let f = fixture();

        let first = f.manager.get_or_create("prices-eu").await.unwrap().unwrap();
        let second = f.manager.get_or_create("prices-eu").await.unwrap().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.name(), "prices-*");
        assert_eq!(f.manager.names(), vec!["prices-eu".to_string()]);
        assert_eq!(f.listeners.listener_count(), 1);
    }

    #[tokio::test]
    async fn test_cache_without_invalidation_registers_nothing() {
        let f = fixture();

        f.manager.get_or_create("local").await.unwrap().unwrap();

        assert_eq!(f.manager.listener_id("local"), None);
        assert_eq!(f.listeners.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_invalidation_events_reach_cache() {
        let f = fixture();
        let (connection, inbound) = f.registry.add("127.0.0.1:5701".parse().unwrap(), Uuid::new_v4());
        let _member =
            ListenerMember::spawn(Arc::clone(&f.invocations), Arc::clone(&connection), inbound);

        let cache = f.manager.get_or_create("prices-eu").await.unwrap().unwrap();
        cache.put(key("a"), key("1"));

        let id = f.manager.listener_id("prices-eu").unwrap();
        let registration = f.listeners.registrations(&id).remove(0);
        let mut event = invalidation::encode_invalidation_event(&InvalidationEvent {
            key: Some(key("a")),
            source_uuid: Some(Uuid::new_v4()),
            partition_uuid: Some(Uuid::new_v4()),
            sequence: 1,
        });
        event.set_correlation_id(registration.correlation_id);
        f.invocations.handle_message(&connection, Ok(event));

        assert_eq!(cache.get(&key("a")), None);
        assert_eq!(f.listeners.stats().events_received(), 1);
    }

    #[tokio::test]
    async fn test_destroy_removes_listener() {
        let f = fixture();
        let cache = f.manager.get_or_create("prices-eu").await.unwrap().unwrap();
        cache.put(key("a"), key("1"));

        assert!(f.manager.destroy("prices-eu").await);
        assert!(!f.manager.destroy("prices-eu").await);
        assert_eq!(cache.size(), 0);
        assert_eq!(f.listeners.listener_count(), 0);
        assert!(f.manager.get("prices-eu").is_none());
    }

    #[tokio::test]
    async fn test_destroy_all_and_stats() {
        let f = fixture();
        let prices = f.manager.get_or_create("prices-eu").await.unwrap().unwrap();
        f.manager.get_or_create("local").await.unwrap().unwrap();
        prices.put(key("a"), key("1"));
        prices.get(&key("a"));

        let stats = f.manager.stats();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats["prices-eu"].hits(), 1);

        f.manager.destroy_all().await;
        assert!(f.manager.names().is_empty());
        assert_eq!(f.listeners.listener_count(), 0);
    }

    #[test]
    fn test_manager_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NearCacheManager>();
    }
}
