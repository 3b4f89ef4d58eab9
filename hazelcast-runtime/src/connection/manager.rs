//! Connection pool management and lifecycle handling.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use hazelcast_wire::protocol::exception::decode_exception;
use hazelcast_wire::protocol::{ClientMessage, ClientMessageCodec, CLIENT_PROTOCOL_PREAMBLE};
use hazelcast_wire::{HazelcastError, Result};
use rand::Rng;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::instrument;
use uuid::Uuid;

use super::connection::{spawn_io, Connection, InboundMessage};
use super::{CloseReason, ConnectionEvent, ConnectionRegistry};
use crate::codec::client_authentication::{
    self, AuthenticationRequest, AuthenticationResponse, CLIENT_TYPE, SERIALIZATION_VERSION,
};
use crate::config::ClientConfig;
use crate::sync::lock;

const AUTHENTICATION_CORRELATION_ID: i64 = 1;
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Calculates the next backoff duration with jitter applied.
fn calculate_backoff_with_jitter(
    current_backoff: Duration,
    multiplier: f64,
    max_backoff: Duration,
    jitter: f64,
) -> Duration {
    let base_backoff = current_backoff.as_secs_f64() * multiplier;

    let jitter_factor = if jitter > 0.0 {
        let mut rng = rand::thread_rng();
        1.0 + rng.gen_range(-jitter..=jitter)
    } else {
        1.0
    };

    let jittered_backoff = base_backoff * jitter_factor;

    std::cmp::min(Duration::from_secs_f64(jittered_backoff), max_backoff)
}

/// Authenticated connections keyed by member address, plus the owner.
#[derive(Debug)]
struct ConnectionPool {
    connections: Mutex<HashMap<SocketAddr, Arc<Connection>>>,
    owner: Mutex<Option<Arc<Connection>>>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl ConnectionPool {
    fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            connections: Mutex::new(HashMap::new()),
            owner: Mutex::new(None),
            events,
        }
    }

    fn get(&self, address: &SocketAddr) -> Option<Arc<Connection>> {
        lock(&self.connections)
            .get(address)
            .filter(|c| c.is_alive())
            .cloned()
    }

    fn insert(&self, connection: Arc<Connection>) {
        lock(&self.connections).insert(connection.address(), Arc::clone(&connection));
        {
            let mut owner = lock(&self.owner);
            if owner.as_ref().map_or(true, |o| !o.is_alive()) {
                tracing::debug!(id = %connection.id(), "owner connection assigned");
                *owner = Some(Arc::clone(&connection));
            }
        }
        let _ = self.events.send(ConnectionEvent::Opened(connection));
    }

    /// Removes `connection` if it is still the pooled one for its address.
    /// Returns `false` if another caller already removed it.
    fn remove(&self, connection: &Arc<Connection>, reason: CloseReason) -> bool {
        let removed = {
            let mut connections = lock(&self.connections);
            match connections.get(&connection.address()) {
                Some(current) if Arc::ptr_eq(current, connection) => {
                    connections.remove(&connection.address());
                    true
                }
                _ => false,
            }
        };
        if !removed {
            return false;
        }

        let mut owner = lock(&self.owner);
        if owner.as_ref().is_some_and(|o| Arc::ptr_eq(o, connection)) {
            *owner = lock(&self.connections)
                .values()
                .find(|c| c.is_alive())
                .cloned();
            if let Some(next) = owner.as_ref() {
                tracing::debug!(id = %next.id(), "owner connection reassigned");
            }
        }
        drop(owner);

        let _ = self.events.send(ConnectionEvent::Closed {
            connection: Arc::clone(connection),
            reason,
        });
        true
    }

    fn snapshot(&self) -> HashMap<SocketAddr, Arc<Connection>> {
        lock(&self.connections)
            .iter()
            .filter(|(_, c)| c.is_alive())
            .map(|(address, c)| (*address, Arc::clone(c)))
            .collect()
    }
}

/// Opens, authenticates and tracks connections to cluster members.
#[derive(Debug)]
pub struct ConnectionManager {
    config: Arc<ClientConfig>,
    client_uuid: Uuid,
    pool: Arc<ConnectionPool>,
    inbound: mpsc::UnboundedSender<InboundMessage>,
    connect_locks: Mutex<HashMap<SocketAddr, Arc<tokio::sync::Mutex<()>>>>,
    known_addresses: Mutex<Vec<SocketAddr>>,
    cluster_id: Mutex<Option<Uuid>>,
    partition_count: AtomicI32,
    shutdown: AtomicBool,
}

impl ConnectionManager {
    /// Creates a connection manager. Every message read from any of its
    /// connections is forwarded to `inbound`.
    pub fn new(
        config: Arc<ClientConfig>,
        client_uuid: Uuid,
        inbound: mpsc::UnboundedSender<InboundMessage>,
    ) -> Self {
        let known_addresses = config.network().addresses().to_vec();
        Self {
            config,
            client_uuid,
            pool: Arc::new(ConnectionPool::new()),
            inbound,
            connect_locks: Mutex::new(HashMap::new()),
            known_addresses: Mutex::new(known_addresses),
            cluster_id: Mutex::new(None),
            partition_count: AtomicI32::new(0),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Returns the uuid this client authenticates with.
    pub fn client_uuid(&self) -> Uuid {
        self.client_uuid
    }

    /// Returns the id of the cluster the client is connected to.
    pub fn cluster_id(&self) -> Option<Uuid> {
        *lock(&self.cluster_id)
    }

    /// Returns the partition count reported at authentication, or 0.
    pub fn partition_count(&self) -> i32 {
        self.partition_count.load(Ordering::Acquire)
    }

    /// Returns the number of open connections.
    pub fn connection_count(&self) -> usize {
        self.pool.snapshot().len()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<ConnectionEvent> {
        self.pool.events.clone()
    }

    /// Returns `true` once `shutdown` was called.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Connects to the configured addresses, retrying with backoff until at
    /// least one member accepts the client.
    #[instrument(
        name = "connection_manager.start",
        skip(self),
        fields(cluster = %self.config.cluster_name())
    )]
    pub async fn start(&self) -> Result<()> {
        let addresses = self.config.network().addresses().to_vec();
        self.connect_with_backoff(&addresses).await
    }

    /// Re-establishes at least one connection after the client lost all of
    /// them, trying every address it has connected to before.
    #[instrument(name = "connection_manager.reconnect", skip(self))]
    pub async fn reconnect(&self) -> Result<()> {
        let addresses = lock(&self.known_addresses).clone();
        self.connect_with_backoff(&addresses).await
    }

    async fn connect_with_backoff(&self, addresses: &[SocketAddr]) -> Result<()> {
        let retry = self.config.retry();
        let mut backoff = retry.initial_backoff();

        for attempt in 1..=retry.max_attempts() {
            let mut connected = 0usize;
            for &address in addresses {
                match self.get_or_connect(address).await {
                    Ok(_) => connected += 1,
                    Err(e) => {
                        if self.is_shutdown() {
                            return Err(e);
                        }
                        tracing::warn!(address = %address, attempt = attempt, error = %e, "connection attempt failed");
                    }
                }
            }
            if connected > 0 {
                tracing::info!(connections = connected, "connected to cluster");
                return Ok(());
            }
            if attempt == retry.max_attempts() {
                break;
            }

            tracing::debug!(attempt = attempt, backoff = ?backoff, "no member reachable, backing off");
            tokio::time::sleep(backoff).await;
            backoff = calculate_backoff_with_jitter(
                backoff,
                retry.multiplier(),
                retry.max_backoff(),
                retry.jitter(),
            );
        }

        tracing::error!(addresses = addresses.len(), "unable to connect to any member");
        Err(HazelcastError::Transport(format!(
            "unable to connect to any of {} addresses after {} attempts",
            addresses.len(),
            retry.max_attempts()
        )))
    }

    /// Closes every connection. Later connection attempts are rejected.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let connections = self.pool.snapshot();
        tracing::debug!(connection_count = connections.len(), "closing all connections");
        for connection in connections.values() {
            self.close_connection(connection, CloseReason::ClientShutdown);
        }
        tracing::info!("connection manager shut down");
    }

    fn check_running(&self) -> Result<()> {
        if self.is_shutdown() {
            return Err(HazelcastError::IllegalState(
                "connection manager is shut down".to_string(),
            ));
        }
        Ok(())
    }

    fn connect_lock(&self, address: SocketAddr) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(lock(&self.connect_locks).entry(address).or_default())
    }

    fn codec(&self) -> ClientMessageCodec {
        let network = self.config.network();
        ClientMessageCodec::with_byte_order(network.byte_order())
            .max_frame_size(network.max_frame_size())
            .fragmentation_threshold(network.fragmentation_threshold())
    }

    fn authentication_request(&self) -> AuthenticationRequest {
        let security = self.config.security();
        AuthenticationRequest {
            cluster_name: self.config.cluster_name().to_string(),
            username: security.username().map(str::to_string),
            password: security.password().map(str::to_string),
            client_uuid: self.client_uuid,
            client_type: CLIENT_TYPE.to_string(),
            serialization_version: SERIALIZATION_VERSION,
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            client_name: self
                .config
                .instance_name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("hz.client_{}", self.client_uuid)),
            labels: self.config.labels().to_vec(),
        }
    }

    #[instrument(
        name = "connection_manager.connect",
        skip(self),
        fields(address = %address)
    )]
    async fn connect(&self, address: SocketAddr) -> Result<Arc<Connection>> {
        let connect_timeout = self.config.network().connection_timeout();
        tracing::debug!(timeout = ?connect_timeout, "attempting connection");

        let connection = timeout(connect_timeout, self.open_authenticated(address))
            .await
            .map_err(|_| {
                tracing::warn!(timeout = ?connect_timeout, "connection attempt timed out");
                HazelcastError::Transport(format!(
                    "connection to {} timed out after {:?}",
                    address, connect_timeout
                ))
            })??;

        if self.is_shutdown() {
            connection.close(CloseReason::ClientShutdown);
            return Err(HazelcastError::IllegalState(
                "connection manager shut down while connecting".to_string(),
            ));
        }

        self.pool.insert(Arc::clone(&connection));
        if !connection.is_alive() {
            let reason = connection.close_reason().unwrap_or(CloseReason::RemoteClosed);
            self.pool.remove(&connection, reason);
            return Err(HazelcastError::Transport(format!(
                "connection to {} closed right after authentication",
                address
            )));
        }

        {
            let mut known = lock(&self.known_addresses);
            if !known.contains(&address) {
                known.push(address);
            }
        }
        tracing::info!(
            id = %connection.id(),
            member = ?connection.member_uuid(),
            "connected to cluster member"
        );
        Ok(connection)
    }

    async fn open_authenticated(&self, address: SocketAddr) -> Result<Arc<Connection>> {
        let mut stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        stream.write_all(CLIENT_PROTOCOL_PREAMBLE).await?;

        let (read_half, write_half) = stream.into_split();
        let mut reader = FramedRead::new(read_half, self.codec());
        let mut writer = FramedWrite::new(write_half, self.codec());

        let mut request = client_authentication::encode_request(&self.authentication_request());
        request.set_correlation_id(AUTHENTICATION_CORRELATION_ID);
        writer.send(request).await?;

        let response = match reader.next().await {
            Some(Ok(message)) => message?,
            Some(Err(e)) => return Err(e),
            None => {
                return Err(HazelcastError::Transport(format!(
                    "{} closed the connection during authentication",
                    address
                )))
            }
        };
        let member_uuid = self.verify_authentication(address, &response)?;

        let pool = Arc::clone(&self.pool);
        let connection = spawn_io(
            address,
            reader,
            writer,
            self.inbound.clone(),
            self.pool.events.clone(),
            move |connection, reason| {
                pool.remove(&connection, reason);
            },
        );
        connection.set_member_uuid(member_uuid);
        Ok(connection)
    }

    fn verify_authentication(&self, address: SocketAddr, response: &ClientMessage) -> Result<Uuid> {
        if response.is_exception() {
            return Err(decode_exception(response));
        }
        let auth: AuthenticationResponse = client_authentication::decode_response(response)?;
        if !auth.is_authenticated() {
            tracing::warn!(address = %address, status = %auth.status, "authentication rejected");
            return Err(HazelcastError::IllegalState(format!(
                "authentication to {} failed: {}",
                address, auth.status
            )));
        }
        let member_uuid = auth.member_uuid.ok_or_else(|| {
            HazelcastError::Decode("authentication response without a member uuid".to_string())
        })?;

        let known = self.partition_count.load(Ordering::Acquire);
        if known == 0 {
            self.partition_count.store(auth.partition_count, Ordering::Release);
        } else if known != auth.partition_count {
            return Err(HazelcastError::IllegalState(format!(
                "member {} reports {} partitions, expected {}",
                address, auth.partition_count, known
            )));
        }

        let mut cluster_id = lock(&self.cluster_id);
        if let (Some(current), Some(reported)) = (*cluster_id, auth.cluster_id) {
            if current != reported {
                tracing::info!(old = %current, new = %reported, "connected to a new cluster");
            }
        }
        if auth.cluster_id.is_some() {
            *cluster_id = auth.cluster_id;
        }
        Ok(member_uuid)
    }
}

#[async_trait]
impl ConnectionRegistry for ConnectionManager {
    async fn get_or_connect(&self, address: SocketAddr) -> Result<Arc<Connection>> {
        self.check_running()?;
        if let Some(connection) = self.pool.get(&address) {
            return Ok(connection);
        }
        let connect_lock = self.connect_lock(address);
        let _guard = connect_lock.lock().await;
        if let Some(connection) = self.pool.get(&address) {
            return Ok(connection);
        }
        self.check_running()?;
        self.connect(address).await
    }

    fn get_connection(&self, member_uuid: &Uuid) -> Option<Arc<Connection>> {
        lock(&self.pool.connections)
            .values()
            .find(|c| c.is_alive() && c.member_uuid().as_ref() == Some(member_uuid))
            .cloned()
    }

    fn active_connections(&self) -> HashMap<SocketAddr, Arc<Connection>> {
        self.pool.snapshot()
    }

    fn owner_connection(&self) -> Option<Arc<Connection>> {
        let owner = lock(&self.pool.owner).clone();
        owner
            .filter(|c| c.is_alive())
            .or_else(|| self.pool.snapshot().into_values().next())
    }

    fn close_connection(&self, connection: &Arc<Connection>, reason: CloseReason) {
        connection.close(reason.clone());
        let reason = connection.close_reason().unwrap_or(reason);
        self.pool.remove(connection, reason);
    }

    fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.pool.events.subscribe()
    }
}
