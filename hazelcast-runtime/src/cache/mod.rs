//! Client-side near cache for map entries.
//!
//! A [`NearCache`] keeps serialized keys mapped to values close to the
//! caller. Fills go through a reservation so that an invalidation arriving
//! while a value is being fetched wins over the fetched value. With
//! `invalidate_on_change`, a [`RepairingHandler`] applies the cluster's
//! invalidation events and tracks per-partition sequence metadata that the
//! [`MetadataStaleReadDetector`] checks on every read.

mod invalidation;
mod manager;
mod near_cache;

pub use invalidation::{
    MetaDataContainer, MetadataStaleReadDetector, RecordMetadata, RepairingHandler,
    StaleReadDetector,
};
pub use manager::NearCacheManager;
pub use near_cache::{NearCache, NearCacheStats};

use std::time::Duration;

use crate::config::ConfigError;

/// Default time-to-live for near-cache entries (0 = infinite).
const DEFAULT_TTL: Duration = Duration::ZERO;
/// Default max idle time for near-cache entries (0 = infinite).
const DEFAULT_MAX_IDLE: Duration = Duration::ZERO;
/// Default maximum size of the near-cache.
const DEFAULT_MAX_SIZE: u32 = 10_000;
/// Default number of records sampled per eviction round.
const DEFAULT_EVICTION_SAMPLING_COUNT: u32 = 8;
/// Default number of eviction candidates kept between rounds.
const DEFAULT_EVICTION_SAMPLING_POOL_SIZE: u32 = 16;

/// Eviction policy for near-cache when max size is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Least Recently Used - evicts entries that haven't been accessed recently.
    #[default]
    Lru,
    /// Least Frequently Used - evicts entries with the lowest access count.
    Lfu,
    /// Random - evicts a sampled entry regardless of its use.
    Random,
    /// None - no size eviction; entries only leave through expiry or
    /// invalidation.
    None,
}

/// Configuration for a near-cache associated with a distributed map.
#[derive(Debug, Clone)]
pub struct NearCacheConfig {
    name: String,
    time_to_live: Duration,
    max_idle: Duration,
    max_size: u32,
    eviction_policy: EvictionPolicy,
    invalidate_on_change: bool,
    eviction_sampling_count: u32,
    eviction_sampling_pool_size: u32,
}

impl NearCacheConfig {
    /// Creates a new near-cache configuration builder.
    pub fn builder(name: impl Into<String>) -> NearCacheConfigBuilder {
        NearCacheConfigBuilder::new(name)
    }

    /// Returns the name pattern for this near-cache.
    ///
    /// The name can be an exact map name or a wildcard pattern (e.g., "user-*").
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the time-to-live duration for cached entries.
    ///
    /// A value of `Duration::ZERO` means entries never expire based on time.
    pub fn time_to_live(&self) -> Duration {
        self.time_to_live
    }

    /// Returns the maximum idle time for cached entries.
    ///
    /// A value of `Duration::ZERO` means entries never expire based on idle time.
    pub fn max_idle(&self) -> Duration {
        self.max_idle
    }

    /// Returns the maximum number of entries in the near-cache.
    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    /// Returns the eviction policy used when the cache is full.
    pub fn eviction_policy(&self) -> EvictionPolicy {
        self.eviction_policy
    }

    /// Returns whether the near-cache is invalidated on remote changes.
    pub fn invalidate_on_change(&self) -> bool {
        self.invalidate_on_change
    }

    /// Returns how many records one eviction round samples.
    pub fn eviction_sampling_count(&self) -> u32 {
        self.eviction_sampling_count
    }

    /// Returns how many eviction candidates are kept between rounds.
    pub fn eviction_sampling_pool_size(&self) -> u32 {
        self.eviction_sampling_pool_size
    }

    /// Checks if this configuration matches the given map name.
    ///
    /// Supports exact matches and simple wildcard patterns with `*` at the end.
    pub fn matches(&self, map_name: &str) -> bool {
        match self.name.strip_suffix('*') {
            Some(prefix) => map_name.starts_with(prefix),
            None => self.name == map_name,
        }
    }
}

/// Builder for `NearCacheConfig`.
#[derive(Debug, Clone)]
pub struct NearCacheConfigBuilder {
    name: String,
    time_to_live: Option<Duration>,
    max_idle: Option<Duration>,
    max_size: Option<u32>,
    eviction_policy: Option<EvictionPolicy>,
    invalidate_on_change: Option<bool>,
    eviction_sampling_count: Option<u32>,
    eviction_sampling_pool_size: Option<u32>,
}

impl NearCacheConfigBuilder {
    /// Creates a new near-cache configuration builder with the given name pattern.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            time_to_live: None,
            max_idle: None,
            max_size: None,
            eviction_policy: None,
            invalidate_on_change: None,
            eviction_sampling_count: None,
            eviction_sampling_pool_size: None,
        }
    }

    /// Sets the time-to-live duration for cached entries.
    pub fn time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }

    /// Sets the maximum idle time for cached entries.
    pub fn max_idle(mut self, max_idle: Duration) -> Self {
        self.max_idle = Some(max_idle);
        self
    }

    /// Sets the maximum number of entries in the near-cache.
    pub fn max_size(mut self, max_size: u32) -> Self {
        self.max_size = Some(max_size);
        self
    }

    /// Sets the eviction policy.
    pub fn eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = Some(policy);
        self
    }

    /// Sets whether the near-cache should be invalidated on remote changes.
    ///
    /// When enabled, the near-cache registers for cluster events and invalidates
    /// local entries when they are modified remotely.
    pub fn invalidate_on_change(mut self, invalidate: bool) -> Self {
        self.invalidate_on_change = Some(invalidate);
        self
    }

    /// Sets how many records one eviction round samples.
    pub fn eviction_sampling_count(mut self, count: u32) -> Self {
        self.eviction_sampling_count = Some(count);
        self
    }

    /// Sets how many eviction candidates are kept between rounds.
    pub fn eviction_sampling_pool_size(mut self, size: u32) -> Self {
        self.eviction_sampling_pool_size = Some(size);
        self
    }

    /// Builds the near-cache configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - The name is empty
    /// - `max_size` is zero
    /// - the eviction sampling count or pool size is zero
    pub fn build(self) -> Result<NearCacheConfig, ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::new("near-cache name must not be empty"));
        }

        let max_size = self.max_size.unwrap_or(DEFAULT_MAX_SIZE);
        if max_size == 0 {
            return Err(ConfigError::new("near-cache max_size must be greater than zero"));
        }

        let eviction_sampling_count = self
            .eviction_sampling_count
            .unwrap_or(DEFAULT_EVICTION_SAMPLING_COUNT);
        let eviction_sampling_pool_size = self
            .eviction_sampling_pool_size
            .unwrap_or(DEFAULT_EVICTION_SAMPLING_POOL_SIZE);
        if eviction_sampling_count == 0 || eviction_sampling_pool_size == 0 {
            return Err(ConfigError::new(
                "near-cache eviction sampling count and pool size must be greater than zero",
            ));
        }

        Ok(NearCacheConfig {
            name: self.name,
            time_to_live: self.time_to_live.unwrap_or(DEFAULT_TTL),
            max_idle: self.max_idle.unwrap_or(DEFAULT_MAX_IDLE),
            max_size,
            eviction_policy: self.eviction_policy.unwrap_or_default(),
            invalidate_on_change: self.invalidate_on_change.unwrap_or(true),
            eviction_sampling_count,
            eviction_sampling_pool_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_near_cache_config_defaults() {
        let config = NearCacheConfig::builder("test-map").build().unwrap();

        assert_eq!(config.name(), "test-map");
        assert_eq!(config.time_to_live(), Duration::ZERO);
        assert_eq!(config.max_idle(), Duration::ZERO);
        assert_eq!(config.max_size(), 10_000);
        assert_eq!(config.eviction_policy(), EvictionPolicy::Lru);
        assert!(config.invalidate_on_change());
        assert_eq!(config.eviction_sampling_count(), 8);
        assert_eq!(config.eviction_sampling_pool_size(), 16);
    }

    #[test]
    fn test_near_cache_config_custom_values() {
        let config = NearCacheConfig::builder("user-cache")
            .time_to_live(Duration::from_secs(300))
            .max_idle(Duration::from_secs(60))
            .max_size(5000)
            .eviction_policy(EvictionPolicy::Lfu)
            .invalidate_on_change(false)
            .eviction_sampling_count(4)
            .eviction_sampling_pool_size(32)
            .build()
            .unwrap();

        assert_eq!(config.time_to_live(), Duration::from_secs(300));
        assert_eq!(config.max_idle(), Duration::from_secs(60));
        assert_eq!(config.max_size(), 5000);
        assert_eq!(config.eviction_policy(), EvictionPolicy::Lfu);
        assert!(!config.invalidate_on_change());
        assert_eq!(config.eviction_sampling_count(), 4);
        assert_eq!(config.eviction_sampling_pool_size(), 32);
    }

    #[test]
    fn test_near_cache_config_empty_name_fails() {
        let result = NearCacheConfig::builder("").build();
        assert!(result.unwrap_err().to_string().contains("name must not be empty"));
    }

    #[test]
    fn test_near_cache_config_zero_max_size_fails() {
        let result = NearCacheConfig::builder("test").max_size(0).build();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("max_size must be greater than zero"));
    }

    #[test]
    fn test_near_cache_config_zero_sampling_fails() {
        assert!(NearCacheConfig::builder("test")
            .eviction_sampling_count(0)
            .build()
            .is_err());
        assert!(NearCacheConfig::builder("test")
            .eviction_sampling_pool_size(0)
            .build()
            .is_err());
    }

    #[test]
    fn test_near_cache_config_exact_match() {
        let config = NearCacheConfig::builder("user-map").build().unwrap();

        assert!(config.matches("user-map"));
        assert!(!config.matches("user-map-backup"));
        assert!(!config.matches("other-map"));
    }

    #[test]
    fn test_near_cache_config_wildcard_match() {
        let config = NearCacheConfig::builder("user-*").build().unwrap();

        assert!(config.matches("user-"));
        assert!(config.matches("user-map"));
        assert!(config.matches("user-data-store"));
        assert!(!config.matches("other-map"));
        assert!(!config.matches("users"));
    }

    #[test]
    fn test_eviction_policy_default() {
        assert_eq!(EvictionPolicy::default(), EvictionPolicy::Lru);
    }

    #[test]
    fn test_near_cache_config_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NearCacheConfig>();
        assert_send_sync::<NearCacheConfigBuilder>();
        assert_send_sync::<EvictionPolicy>();
    }
}
