//! Hazelcast client entry point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hazelcast_wire::protocol::Data;
use hazelcast_wire::{HazelcastError, Result};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tracing::instrument;
use uuid::Uuid;

use crate::cache::{NearCache, NearCacheManager};
use crate::cluster::{
    ClusterService, ClusterViewHandler, PartitionService, DEFAULT_INITIAL_MEMBERS_TIMEOUT,
};
use crate::config::ClientConfig;
use crate::connection::{
    CloseReason, Connection, ConnectionEvent, ConnectionId, ConnectionManager, ConnectionRegistry,
    HeartbeatService, InboundMessage,
};
use crate::invocation::{InvocationService, PartitionTable};
use crate::listener::{LifecycleEvent, ListenerService};

const LIFECYCLE_CHANNEL_CAPACITY: usize = 64;

/// The main entry point for connecting to a Hazelcast cluster.
///
/// `HazelcastClient` wires the connection manager, invocation service,
/// membership and partition tracking, listener registry, heartbeat and near
/// caches together and runs the tasks that connect them. Cloning is cheap
/// and every clone drives the same client.
///
/// # Example
///
/// ```no_run
/// use hazelcast_runtime::{ClientConfig, HazelcastClient};
///
/// # async fn run() -> hazelcast_wire::Result<()> {
/// let config = ClientConfig::builder()
///     .cluster_name("dev")
///     .add_address("127.0.0.1:5701".parse().unwrap())
///     .build()?;
///
/// let client = HazelcastClient::new(config).await?;
/// println!("members: {:?}", client.cluster().get_members());
///
/// client.shutdown().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HazelcastClient {
    inner: Arc<ClientInner>,
}

#[derive(Debug)]
struct ClientInner {
    config: Arc<ClientConfig>,
    client_uuid: Uuid,
    connections: Arc<ConnectionManager>,
    invocations: Arc<InvocationService>,
    cluster: Arc<ClusterService>,
    partitions: Arc<PartitionService>,
    listeners: Arc<ListenerService>,
    heartbeat: Arc<HeartbeatService>,
    near_caches: NearCacheManager,
    view_handler: Arc<ClusterViewHandler>,
    view_connection: Mutex<Option<ConnectionId>>,
    connected: AtomicBool,
    reconnecting: AtomicBool,
    lifecycle: broadcast::Sender<LifecycleEvent>,
    shutdown: watch::Sender<bool>,
}

impl HazelcastClient {
    /// Creates a new client and connects to the Hazelcast cluster.
    ///
    /// Returns once at least one member accepted the client and the initial
    /// member list arrived.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No configured member can be reached within the retry budget
    /// - The cluster view listener cannot be registered
    /// - The member list does not arrive in time
    pub async fn new(config: ClientConfig) -> Result<Self> {
        let (lifecycle, _) = broadcast::channel(LIFECYCLE_CHANNEL_CAPACITY);
        Self::with_lifecycle(config, lifecycle).await
    }

    /// Creates a new client that reports its lifecycle to `lifecycle`.
    ///
    /// Subscribe to the sender before calling this to observe
    /// [`LifecycleEvent::Starting`] and [`LifecycleEvent::Started`].
    #[instrument(name = "client.start", skip_all, fields(cluster = %config.cluster_name()))]
    pub async fn with_lifecycle(
        config: ClientConfig,
        lifecycle: broadcast::Sender<LifecycleEvent>,
    ) -> Result<Self> {
        let _ = lifecycle.send(LifecycleEvent::Starting);

        let config = Arc::new(config);
        let client_uuid = Uuid::new_v4();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let connections = Arc::new(ConnectionManager::new(
            Arc::clone(&config),
            client_uuid,
            inbound_tx,
        ));
        let registry: Arc<dyn ConnectionRegistry> = connections.clone();
        let cluster = Arc::new(ClusterService::new(Arc::clone(&registry)));
        let partitions = Arc::new(PartitionService::new(Arc::clone(&cluster)));
        let invocations = Arc::new(InvocationService::new(
            &config,
            Arc::clone(&registry),
            partitions.clone(),
        ));
        let listeners = Arc::new(ListenerService::new(
            config.network(),
            Arc::clone(&registry),
            Arc::clone(&invocations),
            Arc::clone(&cluster),
        ));
        let heartbeat = Arc::new(HeartbeatService::new(
            config.network(),
            Arc::clone(&registry),
            Arc::clone(&invocations),
            connections.event_sender(),
        ));
        let near_caches = NearCacheManager::new(
            Arc::clone(&config),
            client_uuid,
            partitions.clone(),
            Arc::clone(&listeners),
        );
        let view_handler = Arc::new(ClusterViewHandler::new(
            Arc::clone(&cluster),
            Arc::clone(&partitions),
        ));
        let (shutdown, _) = watch::channel(false);

        let inner = Arc::new(ClientInner {
            config,
            client_uuid,
            connections,
            invocations,
            cluster,
            partitions,
            listeners,
            heartbeat,
            near_caches,
            view_handler,
            view_connection: Mutex::new(None),
            connected: AtomicBool::new(false),
            reconnecting: AtomicBool::new(false),
            lifecycle,
            shutdown,
        });

        inner.spawn_dispatch_task(inbound_rx);
        inner.spawn_connection_event_task();

        if let Err(e) = inner.connect().await {
            tracing::error!(error = %e, "client failed to start");
            inner.shutdown();
            return Err(e);
        }

        inner.heartbeat.start();
        inner.listeners.start();

        tracing::info!(
            client = %inner.client_uuid,
            members = inner.cluster.size(),
            partitions = inner.partitions.partition_count(),
            "client started"
        );
        let _ = inner.lifecycle.send(LifecycleEvent::Started);
        Ok(Self { inner })
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Returns the uuid this client authenticated with.
    pub fn client_uuid(&self) -> Uuid {
        self.inner.client_uuid
    }

    /// Returns the membership tracker.
    pub fn cluster(&self) -> &Arc<ClusterService> {
        &self.inner.cluster
    }

    /// Returns the partition table.
    pub fn partitions(&self) -> &Arc<PartitionService> {
        &self.inner.partitions
    }

    /// Returns the invocation service.
    pub fn invocations(&self) -> &Arc<InvocationService> {
        &self.inner.invocations
    }

    /// Returns the listener registry.
    pub fn listeners(&self) -> &Arc<ListenerService> {
        &self.inner.listeners
    }

    /// Returns the connection manager.
    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.inner.connections
    }

    /// Returns the near-cache manager.
    pub fn near_caches(&self) -> &NearCacheManager {
        &self.inner.near_caches
    }

    /// Returns the near cache of map `name`, creating it on first use.
    pub async fn get_near_cache(&self, name: &str) -> Result<Option<Arc<NearCache<Data>>>> {
        self.inner.check_running()?;
        self.inner.near_caches.get_or_create(name).await
    }

    /// Subscribes to lifecycle events.
    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.lifecycle.subscribe()
    }

    /// Returns `true` until [`shutdown`](Self::shutdown) is called.
    pub fn is_running(&self) -> bool {
        !*self.inner.shutdown.borrow()
    }

    /// Shuts the client down.
    ///
    /// Listener registrations are dropped, pending invocations are rejected
    /// and every connection is closed. Calling it again does nothing.
    #[instrument(name = "client.shutdown", skip(self))]
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.shutdown();
        Ok(())
    }
}

impl ClientInner {
    fn check_running(&self) -> Result<()> {
        if *self.shutdown.borrow() {
            return Err(HazelcastError::IllegalState(
                "client is shut down".to_string(),
            ));
        }
        Ok(())
    }

    /// Opens the first connections, then subscribes to the cluster view.
    async fn connect(&self) -> Result<()> {
        self.connections.start().await?;
        self.partitions
            .set_partition_count(self.connections.partition_count());
        self.mark_connected();
        self.register_cluster_view().await?;
        self.cluster
            .wait_initial_member_list(DEFAULT_INITIAL_MEMBERS_TIMEOUT)
            .await
    }

    fn mark_connected(&self) {
        if !self.connected.swap(true, Ordering::AcqRel) {
            let _ = self.lifecycle.send(LifecycleEvent::ClientConnected);
        }
    }

    /// Registers the cluster view listener on the owner connection unless a
    /// live connection already carries it.
    async fn register_cluster_view(&self) -> Result<()> {
        let mut current = self.view_connection.lock().await;
        let active = self.connections.active_connections();
        if let Some(id) = *current {
            if active.values().any(|c| c.id() == id) {
                return Ok(());
            }
        }

        let connection = self.connections.owner_connection().ok_or_else(|| {
            HazelcastError::Transport("no connection for the cluster view listener".to_string())
        })?;
        if current.take().is_some() {
            self.cluster.clear_member_list_version();
        }
        Arc::clone(&self.view_handler)
            .register(&self.invocations, Arc::clone(&connection))
            .await?;
        *current = Some(connection.id());
        Ok(())
    }

    fn spawn_dispatch_task(self: &Arc<Self>, mut inbound: mpsc::UnboundedReceiver<InboundMessage>) {
        let invocations = Arc::clone(&self.invocations);
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    message = inbound.recv() => match message {
                        Some((connection, message)) => invocations.handle_message(&connection, message),
                        None => break,
                    },
                    result = shutdown_rx.changed() => {
                        if result.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("dispatch task stopped");
        });
    }

    fn spawn_connection_event_task(self: &Arc<Self>) {
        let inner = Arc::downgrade(self);
        let mut events = self.connections.subscribe();
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    event = events.recv() => event,
                    result = shutdown_rx.changed() => {
                        if result.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                };
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                match event {
                    Ok(event) => inner.handle_connection_event(event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "client missed connection events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            tracing::debug!("connection event task stopped");
        });
    }

    fn handle_connection_event(self: &Arc<Self>, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Opened(connection) => {
                tracing::debug!(id = %connection.id(), address = %connection.address(), "connection opened");
                self.mark_connected();
                self.spawn_view_registration();
            }
            ConnectionEvent::Closed { connection, reason } => {
                self.on_connection_closed(&connection, &reason);
            }
            ConnectionEvent::HeartbeatStopped(connection) => {
                tracing::debug!(id = %connection.id(), "heartbeat stopped");
            }
            ConnectionEvent::HeartbeatRestored(connection) => {
                tracing::debug!(id = %connection.id(), "heartbeat restored");
            }
        }
    }

    fn on_connection_closed(self: &Arc<Self>, connection: &Arc<Connection>, reason: &CloseReason) {
        tracing::info!(
            id = %connection.id(),
            address = %connection.address(),
            reason = %reason,
            "connection closed"
        );
        self.invocations.on_connection_closed(connection, reason);
        if self.check_running().is_err() {
            return;
        }

        if self.connections.connection_count() == 0 {
            if self.connected.swap(false, Ordering::AcqRel) {
                let _ = self.lifecycle.send(LifecycleEvent::ClientDisconnected);
            }
            self.spawn_reconnect();
        } else {
            self.spawn_view_registration();
        }
    }

    fn spawn_view_registration(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = inner.register_cluster_view().await {
                if inner.check_running().is_ok() {
                    tracing::warn!(error = %e, "cluster view listener registration failed");
                }
            }
        });
    }

    fn spawn_reconnect(self: &Arc<Self>) {
        if self.reconnecting.swap(true, Ordering::AcqRel) {
            return;
        }
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tracing::info!("lost every connection, reconnecting");
            match inner.connections.reconnect().await {
                Ok(()) => {
                    if let Err(e) = inner.register_cluster_view().await {
                        tracing::warn!(error = %e, "cluster view listener registration failed");
                    }
                }
                Err(e) => {
                    if inner.check_running().is_ok() {
                        tracing::error!(error = %e, "unable to reconnect to the cluster");
                    }
                }
            }
            inner.reconnecting.store(false, Ordering::Release);
        });
    }

    fn shutdown(&self) {
        if self.shutdown.send_replace(true) {
            return;
        }
        let _ = self.lifecycle.send(LifecycleEvent::ShuttingDown);

        self.listeners.shutdown();
        self.near_caches.clear_all();
        self.invocations.shutdown();
        self.heartbeat.shutdown();
        self.connections.shutdown();
        self.cluster.reset();
        self.partitions.reset();

        tracing::info!(client = %self.client_uuid, "client shut down");
        let _ = self.lifecycle.send(LifecycleEvent::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HazelcastClient>();
    }
}
