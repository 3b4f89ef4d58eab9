//! Client configuration types and builders.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use hazelcast_wire::protocol::{ByteOrder, MIN_FRAGMENT_SIZE};
use hazelcast_wire::HazelcastError;

use crate::cache::NearCacheConfig;

/// Default cluster name.
const DEFAULT_CLUSTER_NAME: &str = "dev";
/// Default member port used when no address is configured.
const DEFAULT_PORT: u16 = 5701;
/// Default connection timeout.
const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);
/// Default heartbeat interval.
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
/// Default heartbeat timeout.
const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(60);
/// Default interval of the listener connection refresh task.
const DEFAULT_LISTENER_REFRESH_INTERVAL: Duration = Duration::from_secs(2);
/// Default maximum inbound frame size.
const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;
/// Default outbound size above which messages are fragmented.
const DEFAULT_FRAGMENTATION_THRESHOLD: usize = 32 * 1024 * 1024;
/// Default invocation timeout.
const DEFAULT_INVOCATION_TIMEOUT: Duration = Duration::from_secs(120);
/// Default pause between slow invocation retries.
const DEFAULT_INVOCATION_RETRY_PAUSE: Duration = Duration::from_secs(1);
/// Default number of retries attempted without a pause.
const DEFAULT_FAST_INVOCATION_COUNT: u32 = 5;
/// Default initial retry backoff.
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(100);
/// Default maximum retry backoff.
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);
/// Default retry multiplier.
const DEFAULT_RETRY_MULTIPLIER: f64 = 2.0;
/// Default retry jitter.
const DEFAULT_RETRY_JITTER: f64 = 0.0;
/// Default maximum cluster connect attempts.
const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Configuration error returned when validation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    message: String,
}

impl ConfigError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the validation message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for HazelcastError {
    fn from(err: ConfigError) -> Self {
        HazelcastError::Configuration(err.message)
    }
}

/// Network configuration for cluster connections.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    addresses: Vec<SocketAddr>,
    connection_timeout: Duration,
    smart_routing: bool,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
    listener_connection_refresh_interval: Duration,
    max_frame_size: usize,
    fragmentation_threshold: usize,
    byte_order: ByteOrder,
}

impl NetworkConfig {
    /// Returns the configured cluster member addresses.
    pub fn addresses(&self) -> &[SocketAddr] {
        &self.addresses
    }

    /// Returns the connection timeout.
    pub fn connection_timeout(&self) -> Duration {
        self.connection_timeout
    }

    /// Returns true if the client connects to every member and routes
    /// partition-bound requests to the owner.
    pub fn smart_routing(&self) -> bool {
        self.smart_routing
    }

    /// Returns the heartbeat interval.
    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Returns the read idleness after which a connection is considered dead.
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_timeout
    }

    /// Returns the period of the listener connection refresh task.
    pub fn listener_connection_refresh_interval(&self) -> Duration {
        self.listener_connection_refresh_interval
    }

    /// Returns the largest frame accepted from a member.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Returns the size above which outgoing messages are fragmented.
    pub fn fragmentation_threshold(&self) -> usize {
        self.fragmentation_threshold
    }

    /// Returns the byte order of the frame envelope.
    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            addresses: vec![default_address()],
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            smart_routing: true,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            listener_connection_refresh_interval: DEFAULT_LISTENER_REFRESH_INTERVAL,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            fragmentation_threshold: DEFAULT_FRAGMENTATION_THRESHOLD,
            byte_order: ByteOrder::Little,
        }
    }
}

fn default_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT))
}

/// Builder for `NetworkConfig`.
#[derive(Debug, Clone, Default)]
pub struct NetworkConfigBuilder {
    addresses: Vec<SocketAddr>,
    connection_timeout: Option<Duration>,
    smart_routing: Option<bool>,
    heartbeat_interval: Option<Duration>,
    heartbeat_timeout: Option<Duration>,
    listener_connection_refresh_interval: Option<Duration>,
    max_frame_size: Option<usize>,
    fragmentation_threshold: Option<usize>,
    byte_order: Option<ByteOrder>,
}

impl NetworkConfigBuilder {
    /// Creates a new network configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a cluster member address.
    pub fn add_address(mut self, address: SocketAddr) -> Self {
        self.addresses.push(address);
        self
    }

    /// Sets the cluster member addresses, replacing any previously configured.
    pub fn addresses(mut self, addresses: impl IntoIterator<Item = SocketAddr>) -> Self {
        self.addresses = addresses.into_iter().collect();
        self
    }

    /// Sets the connection timeout duration.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// Enables or disables smart routing.
    pub fn smart_routing(mut self, enabled: bool) -> Self {
        self.smart_routing = Some(enabled);
        self
    }

    /// Sets the heartbeat interval duration.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = Some(interval);
        self
    }

    /// Sets the heartbeat timeout duration.
    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = Some(timeout);
        self
    }

    /// Sets the period of the listener connection refresh task.
    pub fn listener_connection_refresh_interval(mut self, interval: Duration) -> Self {
        self.listener_connection_refresh_interval = Some(interval);
        self
    }

    /// Sets the largest frame accepted from a member.
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = Some(size);
        self
    }

    /// Sets the size above which outgoing messages are fragmented.
    pub fn fragmentation_threshold(mut self, threshold: usize) -> Self {
        self.fragmentation_threshold = Some(threshold);
        self
    }

    /// Sets the byte order of the frame envelope.
    pub fn byte_order(mut self, order: ByteOrder) -> Self {
        self.byte_order = Some(order);
        self
    }

    /// Builds the network configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - `heartbeat_timeout` does not exceed `heartbeat_interval`
    /// - `fragmentation_threshold` exceeds `max_frame_size`
    /// - `fragmentation_threshold` cannot hold a fragment id and a request header
    /// - any duration or size is zero
    pub fn build(self) -> Result<NetworkConfig, ConfigError> {
        let defaults = NetworkConfig::default();
        let addresses = if self.addresses.is_empty() {
            defaults.addresses
        } else {
            dedup_preserving_order(self.addresses)
        };

        let heartbeat_interval = self.heartbeat_interval.unwrap_or(defaults.heartbeat_interval);
        let heartbeat_timeout = self.heartbeat_timeout.unwrap_or(defaults.heartbeat_timeout);
        if heartbeat_interval.is_zero() {
            return Err(ConfigError::new("heartbeat_interval must be greater than zero"));
        }
        if heartbeat_timeout <= heartbeat_interval {
            return Err(ConfigError::new(
                "heartbeat_timeout must exceed heartbeat_interval",
            ));
        }

        let listener_connection_refresh_interval = self
            .listener_connection_refresh_interval
            .unwrap_or(defaults.listener_connection_refresh_interval);
        if listener_connection_refresh_interval.is_zero() {
            return Err(ConfigError::new(
                "listener_connection_refresh_interval must be greater than zero",
            ));
        }

        let max_frame_size = self.max_frame_size.unwrap_or(defaults.max_frame_size);
        let fragmentation_threshold = self
            .fragmentation_threshold
            .unwrap_or(defaults.fragmentation_threshold);
        if max_frame_size == 0 || fragmentation_threshold == 0 {
            return Err(ConfigError::new("frame sizes must be greater than zero"));
        }
        if fragmentation_threshold < MIN_FRAGMENT_SIZE {
            return Err(ConfigError::new(format!(
                "fragmentation_threshold must be at least {} bytes",
                MIN_FRAGMENT_SIZE
            )));
        }
        if fragmentation_threshold > max_frame_size {
            return Err(ConfigError::new(
                "fragmentation_threshold must not exceed max_frame_size",
            ));
        }

        Ok(NetworkConfig {
            addresses,
            connection_timeout: self.connection_timeout.unwrap_or(defaults.connection_timeout),
            smart_routing: self.smart_routing.unwrap_or(defaults.smart_routing),
            heartbeat_interval,
            heartbeat_timeout,
            listener_connection_refresh_interval,
            max_frame_size,
            fragmentation_threshold,
            byte_order: self.byte_order.unwrap_or(defaults.byte_order),
        })
    }
}

fn dedup_preserving_order(addresses: Vec<SocketAddr>) -> Vec<SocketAddr> {
    let mut seen = HashSet::new();
    addresses.into_iter().filter(|a| seen.insert(*a)).collect()
}

/// Invocation timeout and retry settings.
#[derive(Debug, Clone)]
pub struct InvocationConfig {
    invocation_timeout: Duration,
    invocation_retry_pause: Duration,
    fast_invocation_count: u32,
}

impl InvocationConfig {
    /// Returns the time budget of one logical invocation, retries included.
    pub fn invocation_timeout(&self) -> Duration {
        self.invocation_timeout
    }

    /// Returns the pause between retries once the fast retries are used up.
    pub fn invocation_retry_pause(&self) -> Duration {
        self.invocation_retry_pause
    }

    /// Returns the number of retries attempted without a pause.
    pub fn fast_invocation_count(&self) -> u32 {
        self.fast_invocation_count
    }
}

impl Default for InvocationConfig {
    fn default() -> Self {
        Self {
            invocation_timeout: DEFAULT_INVOCATION_TIMEOUT,
            invocation_retry_pause: DEFAULT_INVOCATION_RETRY_PAUSE,
            fast_invocation_count: DEFAULT_FAST_INVOCATION_COUNT,
        }
    }
}

/// Builder for `InvocationConfig`.
#[derive(Debug, Clone, Default)]
pub struct InvocationConfigBuilder {
    invocation_timeout: Option<Duration>,
    invocation_retry_pause: Option<Duration>,
    fast_invocation_count: Option<u32>,
}

impl InvocationConfigBuilder {
    /// Creates a new invocation configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the invocation timeout.
    pub fn invocation_timeout(mut self, timeout: Duration) -> Self {
        self.invocation_timeout = Some(timeout);
        self
    }

    /// Sets the pause between slow retries.
    pub fn invocation_retry_pause(mut self, pause: Duration) -> Self {
        self.invocation_retry_pause = Some(pause);
        self
    }

    /// Sets the number of retries attempted without a pause.
    pub fn fast_invocation_count(mut self, count: u32) -> Self {
        self.fast_invocation_count = Some(count);
        self
    }

    /// Builds the invocation configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `invocation_timeout` is zero.
    pub fn build(self) -> Result<InvocationConfig, ConfigError> {
        let invocation_timeout = self
            .invocation_timeout
            .unwrap_or(DEFAULT_INVOCATION_TIMEOUT);
        if invocation_timeout.is_zero() {
            return Err(ConfigError::new("invocation_timeout must be greater than zero"));
        }

        Ok(InvocationConfig {
            invocation_timeout,
            invocation_retry_pause: self
                .invocation_retry_pause
                .unwrap_or(DEFAULT_INVOCATION_RETRY_PAUSE),
            fast_invocation_count: self
                .fast_invocation_count
                .unwrap_or(DEFAULT_FAST_INVOCATION_COUNT),
        })
    }
}

/// Backoff settings for the initial cluster connection.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    initial_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
    jitter: f64,
    max_attempts: u32,
}

impl RetryConfig {
    /// Returns the initial backoff duration.
    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    /// Returns the maximum backoff duration.
    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// Returns the backoff multiplier.
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Returns the jitter ratio in `[0, 1]` applied to each backoff.
    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Returns the maximum number of connect attempts.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            multiplier: DEFAULT_RETRY_MULTIPLIER,
            jitter: DEFAULT_RETRY_JITTER,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Builder for `RetryConfig`.
#[derive(Debug, Clone, Default)]
pub struct RetryConfigBuilder {
    initial_backoff: Option<Duration>,
    max_backoff: Option<Duration>,
    multiplier: Option<f64>,
    jitter: Option<f64>,
    max_attempts: Option<u32>,
}

impl RetryConfigBuilder {
    /// Creates a new retry configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the initial backoff duration.
    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = Some(backoff);
        self
    }

    /// Sets the maximum backoff duration.
    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = Some(backoff);
        self
    }

    /// Sets the backoff multiplier.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Sets the jitter ratio.
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Sets the maximum number of connect attempts.
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Builds the retry configuration, returning an error if validation fails.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - `initial_backoff` exceeds `max_backoff`
    /// - `multiplier` is less than 1.0
    /// - `jitter` lies outside `[0, 1]`
    /// - `max_attempts` is zero
    pub fn build(self) -> Result<RetryConfig, ConfigError> {
        let initial_backoff = self.initial_backoff.unwrap_or(DEFAULT_INITIAL_BACKOFF);
        let max_backoff = self.max_backoff.unwrap_or(DEFAULT_MAX_BACKOFF);
        let multiplier = self.multiplier.unwrap_or(DEFAULT_RETRY_MULTIPLIER);
        let jitter = self.jitter.unwrap_or(DEFAULT_RETRY_JITTER);
        let max_attempts = self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);

        if initial_backoff > max_backoff {
            return Err(ConfigError::new(
                "initial_backoff must not exceed max_backoff",
            ));
        }

        if multiplier < 1.0 {
            return Err(ConfigError::new("multiplier must be at least 1.0"));
        }

        if !(0.0..=1.0).contains(&jitter) {
            return Err(ConfigError::new("jitter must be within [0, 1]"));
        }

        if max_attempts == 0 {
            return Err(ConfigError::new("max_attempts must be at least 1"));
        }

        Ok(RetryConfig {
            initial_backoff,
            max_backoff,
            multiplier,
            jitter,
            max_attempts,
        })
    }
}

/// Security configuration for authentication.
#[derive(Debug, Clone, Default)]
pub struct SecurityConfig {
    username: Option<String>,
    password: Option<String>,
}

impl SecurityConfig {
    /// Returns the configured username.
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Returns the configured password.
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Returns true if username/password credentials are configured.
    pub fn has_credentials(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }
}

/// Builder for `SecurityConfig`.
#[derive(Debug, Clone, Default)]
pub struct SecurityConfigBuilder {
    username: Option<String>,
    password: Option<String>,
}

impl SecurityConfigBuilder {
    /// Creates a new security configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the username for authentication.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Sets the password for authentication.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets both username and password for authentication.
    pub fn credentials(self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username(username).password(password)
    }

    /// Builds the security configuration, returning an error if validation fails.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if only one of `username` or `password` is set.
    pub fn build(self) -> Result<SecurityConfig, ConfigError> {
        if self.username.is_some() != self.password.is_some() {
            return Err(ConfigError::new(
                "both username and password must be provided together",
            ));
        }

        Ok(SecurityConfig {
            username: self.username,
            password: self.password,
        })
    }
}

/// Main client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    cluster_name: String,
    instance_name: Option<String>,
    network: NetworkConfig,
    invocation: InvocationConfig,
    retry: RetryConfig,
    security: SecurityConfig,
    near_caches: Vec<NearCacheConfig>,
    labels: Vec<String>,
}

impl ClientConfig {
    /// Creates a new client configuration builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Returns the cluster name.
    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// Returns the client instance name, if configured.
    pub fn instance_name(&self) -> Option<&str> {
        self.instance_name.as_deref()
    }

    /// Returns the network configuration.
    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    /// Returns the invocation configuration.
    pub fn invocation(&self) -> &InvocationConfig {
        &self.invocation
    }

    /// Returns the retry configuration.
    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    /// Returns the security configuration.
    pub fn security(&self) -> &SecurityConfig {
        &self.security
    }

    /// Returns the near-cache configurations.
    pub fn near_caches(&self) -> &[NearCacheConfig] {
        &self.near_caches
    }

    /// Returns the labels sent to the cluster during authentication.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Finds a near-cache configuration matching the given map name.
    ///
    /// An exact name wins over a wildcard pattern.
    pub fn find_near_cache(&self, map_name: &str) -> Option<&NearCacheConfig> {
        self.near_caches
            .iter()
            .find(|nc| nc.name() == map_name)
            .or_else(|| self.near_caches.iter().find(|nc| nc.matches(map_name)))
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            cluster_name: DEFAULT_CLUSTER_NAME.to_string(),
            instance_name: None,
            network: NetworkConfig::default(),
            invocation: InvocationConfig::default(),
            retry: RetryConfig::default(),
            security: SecurityConfig::default(),
            near_caches: Vec::new(),
            labels: Vec::new(),
        }
    }
}

/// Builder for `ClientConfig`.
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    cluster_name: Option<String>,
    instance_name: Option<String>,
    network: NetworkConfigBuilder,
    invocation: InvocationConfigBuilder,
    retry: RetryConfigBuilder,
    security: SecurityConfigBuilder,
    near_caches: Vec<NearCacheConfig>,
    labels: Vec<String>,
}

impl ClientConfigBuilder {
    /// Creates a new client configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cluster name.
    pub fn cluster_name(mut self, name: impl Into<String>) -> Self {
        self.cluster_name = Some(name.into());
        self
    }

    /// Sets the client instance name.
    pub fn instance_name(mut self, name: impl Into<String>) -> Self {
        self.instance_name = Some(name.into());
        self
    }

    /// Configures network settings using a builder function.
    pub fn network<F>(mut self, f: F) -> Self
    where
        F: FnOnce(NetworkConfigBuilder) -> NetworkConfigBuilder,
    {
        self.network = f(self.network);
        self
    }

    /// Configures invocation settings using a builder function.
    pub fn invocation<F>(mut self, f: F) -> Self
    where
        F: FnOnce(InvocationConfigBuilder) -> InvocationConfigBuilder,
    {
        self.invocation = f(self.invocation);
        self
    }

    /// Configures retry settings using a builder function.
    pub fn retry<F>(mut self, f: F) -> Self
    where
        F: FnOnce(RetryConfigBuilder) -> RetryConfigBuilder,
    {
        self.retry = f(self.retry);
        self
    }

    /// Configures security settings using a builder function.
    pub fn security<F>(mut self, f: F) -> Self
    where
        F: FnOnce(SecurityConfigBuilder) -> SecurityConfigBuilder,
    {
        self.security = f(self.security);
        self
    }

    /// Adds a cluster member address.
    pub fn add_address(mut self, address: SocketAddr) -> Self {
        self.network = self.network.add_address(address);
        self
    }

    /// Sets the cluster member addresses.
    pub fn addresses(mut self, addresses: impl IntoIterator<Item = SocketAddr>) -> Self {
        self.network = self.network.addresses(addresses);
        self
    }

    /// Sets the connection timeout.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.network = self.network.connection_timeout(timeout);
        self
    }

    /// Sets the invocation timeout.
    pub fn invocation_timeout(mut self, timeout: Duration) -> Self {
        self.invocation = self.invocation.invocation_timeout(timeout);
        self
    }

    /// Sets credentials for authentication.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.security = self.security.credentials(username, password);
        self
    }

    /// Adds a near-cache configuration.
    ///
    /// Multiple configurations can be added, each matching different map name
    /// patterns.
    pub fn add_near_cache_config(mut self, config: NearCacheConfig) -> Self {
        self.near_caches.push(config);
        self
    }

    /// Adds a client label.
    pub fn add_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    /// Builds the client configuration, returning an error if validation fails.
    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        let cluster_name = self
            .cluster_name
            .unwrap_or_else(|| DEFAULT_CLUSTER_NAME.to_string());

        if cluster_name.is_empty() {
            return Err(ConfigError::new("cluster_name must not be empty"));
        }

        let mut names = HashSet::new();
        for near_cache in &self.near_caches {
            if !names.insert(near_cache.name()) {
                return Err(ConfigError::new(format!(
                    "duplicate near-cache configuration for '{}'",
                    near_cache.name()
                )));
            }
        }

        let network = self.network.build()?;
        let invocation = self.invocation.build()?;
        let retry = self.retry.build()?;
        let security = self.security.build()?;

        Ok(ClientConfig {
            cluster_name,
            instance_name: self.instance_name,
            network,
            invocation,
            retry,
            security,
            near_caches: self.near_caches,
            labels: self.labels,
        })
    }
}
