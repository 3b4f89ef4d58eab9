//! Server-side listener registrations kept alive across connection churn.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use hazelcast_wire::protocol::ClientMessage;
use hazelcast_wire::{HazelcastError, Result};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::instrument;
use uuid::Uuid;

use super::{ListenerId, ListenerStats};
use crate::cluster::ClusterService;
use crate::config::NetworkConfig;
use crate::connection::{Connection, ConnectionEvent, ConnectionId, ConnectionRegistry};
use crate::invocation::{EventHandler, InvocationService, ListenerCodec};
use crate::sync::lock;

/// One server-side registration of a listener on one connection.
#[derive(Debug, Clone)]
pub struct EventRegistration {
    /// The registration id the member returned.
    pub server_registration_id: Uuid,
    /// The correlation id events for this registration carry.
    pub correlation_id: i64,
    /// The connection the registration lives on.
    pub connection: Arc<Connection>,
}

struct ListenerRegistrationInfo {
    codec: Arc<dyn ListenerCodec>,
    handler: Arc<dyn EventHandler>,
}

enum StoreOutcome {
    Stored,
    Duplicate,
    Discarded,
}

struct CountingHandler {
    inner: Arc<dyn EventHandler>,
    stats: Arc<ListenerStats>,
}

impl EventHandler for CountingHandler {
    fn handle(&self, event: &ClientMessage) {
        self.stats.record_event();
        self.inner.handle(event);
    }
}

/// Registers listeners on cluster members and keeps them registered.
///
/// With smart routing a listener is registered on every connected member
/// and asks each for its local events only; otherwise it is registered on
/// the owner connection. New connections get the missing registrations,
/// closed connections drop theirs, and registrations that failed on a
/// connection are retried when its heartbeat comes back.
pub struct ListenerService {
    smart_routing: bool,
    refresh_interval: Duration,
    registry: Arc<dyn ConnectionRegistry>,
    invocations: Arc<InvocationService>,
    cluster: Arc<ClusterService>,
    active_registrations: Mutex<HashMap<ListenerId, HashMap<ConnectionId, EventRegistration>>>,
    failed_registrations: Mutex<HashMap<ConnectionId, HashSet<ListenerId>>>,
    registration_info: Mutex<HashMap<ListenerId, ListenerRegistrationInfo>>,
    stats: Arc<ListenerStats>,
    shutdown: watch::Sender<bool>,
}

impl fmt::Debug for ListenerService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerService")
            .field("smart_routing", &self.smart_routing)
            .field("listeners", &self.listener_count())
            .field("stats", &self.stats)
            .finish()
    }
}

impl ListenerService {
    /// Creates the service. Background tasks run after [`start`](Self::start).
    pub fn new(
        network: &NetworkConfig,
        registry: Arc<dyn ConnectionRegistry>,
        invocations: Arc<InvocationService>,
        cluster: Arc<ClusterService>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            smart_routing: network.smart_routing(),
            refresh_interval: network.listener_connection_refresh_interval(),
            registry,
            invocations,
            cluster,
            active_registrations: Mutex::new(HashMap::new()),
            failed_registrations: Mutex::new(HashMap::new()),
            registration_info: Mutex::new(HashMap::new()),
            stats: Arc::new(ListenerStats::new()),
            shutdown,
        }
    }

    /// Returns the registration counters.
    pub fn stats(&self) -> &ListenerStats {
        &self.stats
    }

    /// Returns the number of registered listeners.
    pub fn listener_count(&self) -> usize {
        lock(&self.registration_info).len()
    }

    /// Returns the server-side registrations of a listener.
    pub fn registrations(&self, id: &ListenerId) -> Vec<EventRegistration> {
        lock(&self.active_registrations)
            .get(id)
            .map(|per_connection| per_connection.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the listeners whose registration failed on `connection`.
    pub fn failed_registrations(&self, connection: ConnectionId) -> HashSet<ListenerId> {
        lock(&self.failed_registrations)
            .get(&connection)
            .cloned()
            .unwrap_or_default()
    }

    fn is_running(&self) -> bool {
        !*self.shutdown.borrow()
    }

    /// Registers a listener on the current target connections.
    ///
    /// Returns once every attempt has settled. Failures on individual
    /// connections are recorded and retried later, not returned.
    #[instrument(name = "listener.register", skip_all)]
    pub async fn register(
        &self,
        codec: Arc<dyn ListenerCodec>,
        handler: Arc<dyn EventHandler>,
    ) -> Result<ListenerId> {
        if !self.is_running() {
            return Err(HazelcastError::IllegalState(
                "listener service is shut down".to_string(),
            ));
        }

        let id = ListenerId::new();
        let handler: Arc<dyn EventHandler> = Arc::new(CountingHandler {
            inner: handler,
            stats: Arc::clone(&self.stats),
        });
        lock(&self.registration_info).insert(id, ListenerRegistrationInfo { codec, handler });
        lock(&self.active_registrations).insert(id, HashMap::new());

        if self.smart_routing {
            self.connect_to_all_members().await;
        }

        let targets = self.target_connections();
        tracing::debug!(listener = %id, targets = targets.len(), "registering listener");
        join_all(
            targets
                .into_iter()
                .map(|connection| self.register_on_connection(id, connection)),
        )
        .await;
        Ok(id)
    }

    /// Removes a listener from every member it is registered on.
    ///
    /// Returns `false` if the listener is unknown.
    #[instrument(name = "listener.deregister", skip(self))]
    pub async fn deregister(&self, id: ListenerId) -> bool {
        let Some(info) = lock(&self.registration_info).remove(&id) else {
            return false;
        };
        let registrations = lock(&self.active_registrations)
            .remove(&id)
            .unwrap_or_default();
        for listeners in lock(&self.failed_registrations).values_mut() {
            listeners.remove(&id);
        }

        let removals = registrations.into_values().map(|registration| {
            self.invocations
                .remove_event_handler(registration.correlation_id);
            let codec = Arc::clone(&info.codec);
            async move {
                if !registration.connection.is_alive() {
                    return;
                }
                let request = codec.encode_remove_request(registration.server_registration_id);
                let result = self
                    .invocations
                    .invoke_on_connection(request, Arc::clone(&registration.connection))
                    .await
                    .and_then(|response| codec.decode_remove_response(&response));
                match result {
                    Ok(removed) => tracing::debug!(
                        listener = %id,
                        connection = %registration.connection.id(),
                        removed,
                        "deregistered listener"
                    ),
                    Err(e) => tracing::debug!(
                        listener = %id,
                        connection = %registration.connection.id(),
                        error = %e,
                        "failed to deregister listener"
                    ),
                }
            }
        });
        join_all(removals).await;
        true
    }

    /// Registers every listener missing on a newly opened connection.
    pub async fn on_connection_opened(&self, connection: Arc<Connection>) {
        let missing: Vec<ListenerId> = {
            let active = lock(&self.active_registrations);
            active
                .iter()
                .filter(|(_, per_connection)| {
                    if self.smart_routing {
                        !per_connection.contains_key(&connection.id())
                    } else {
                        per_connection.is_empty()
                    }
                })
                .map(|(id, _)| *id)
                .collect()
        };
        if missing.is_empty() {
            return;
        }
        join_all(
            missing
                .into_iter()
                .map(|id| self.register_on_connection(id, Arc::clone(&connection))),
        )
        .await;
    }

    /// Forgets every registration that lived on a closed connection.
    pub fn on_connection_closed(&self, connection: &Connection) {
        let connection_id = connection.id();
        let mut dropped = Vec::new();
        for per_connection in lock(&self.active_registrations).values_mut() {
            if let Some(registration) = per_connection.remove(&connection_id) {
                dropped.push(registration.correlation_id);
            }
        }
        lock(&self.failed_registrations).remove(&connection_id);

        for correlation_id in dropped {
            self.invocations.remove_event_handler(correlation_id);
        }
    }

    /// Retries the registrations that failed on `connection`.
    pub async fn on_heartbeat_restored(&self, connection: Arc<Connection>) {
        let failed = lock(&self.failed_registrations)
            .remove(&connection.id())
            .unwrap_or_default();
        if failed.is_empty() {
            return;
        }
        tracing::debug!(
            connection = %connection.id(),
            listeners = failed.len(),
            "retrying failed listener registrations"
        );
        join_all(
            failed
                .into_iter()
                .map(|id| self.register_on_connection(id, Arc::clone(&connection))),
        )
        .await;
    }

    /// Spawns the connection event consumer and the connection refresh task.
    pub fn start(self: &Arc<Self>) {
        self.spawn_event_task();
        if self.smart_routing {
            self.spawn_refresh_task();
        }
    }

    /// Stops the background tasks and drops every local registration.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        lock(&self.registration_info).clear();
        lock(&self.failed_registrations).clear();
        let active = std::mem::take(&mut *lock(&self.active_registrations));
        for registration in active.into_values().flat_map(HashMap::into_values) {
            self.invocations
                .remove_event_handler(registration.correlation_id);
        }
    }

    fn spawn_event_task(self: &Arc<Self>) {
        let service = Arc::clone(self);
        let mut events = self.registry.subscribe();
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(event) => service.handle_connection_event(event),
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "listener service missed connection events");
                        }
                        Err(RecvError::Closed) => break,
                    },
                    result = shutdown_rx.changed() => {
                        if result.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("listener event task stopped");
        });
    }

    fn handle_connection_event(self: &Arc<Self>, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Opened(connection) => {
                let service = Arc::clone(self);
                tokio::spawn(async move { service.on_connection_opened(connection).await });
            }
            ConnectionEvent::Closed { connection, .. } => {
                self.on_connection_closed(&connection);
                if !self.smart_routing {
                    if let Some(owner) = self.registry.owner_connection() {
                        let service = Arc::clone(self);
                        tokio::spawn(async move { service.on_connection_opened(owner).await });
                    }
                }
            }
            ConnectionEvent::HeartbeatRestored(connection) => {
                let service = Arc::clone(self);
                tokio::spawn(async move { service.on_heartbeat_restored(connection).await });
            }
            ConnectionEvent::HeartbeatStopped(_) => {}
        }
    }

    fn spawn_refresh_task(self: &Arc<Self>) {
        let service = Arc::clone(self);
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval(service.refresh_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => service.connect_to_all_members().await,
                    result = shutdown_rx.changed() => {
                        if result.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("listener refresh task stopped");
        });
    }

    async fn connect_to_all_members(&self) {
        let unconnected: Vec<_> = self
            .cluster
            .get_members()
            .into_iter()
            .filter(|member| self.registry.get_connection(&member.uuid).is_none())
            .collect();

        let attempts = unconnected.iter().map(|member| async move {
            if let Err(e) = self.registry.get_or_connect(member.address).await {
                tracing::debug!(member = %member, error = %e, "could not connect to member");
            }
        });
        join_all(attempts).await;
    }

    fn target_connections(&self) -> Vec<Arc<Connection>> {
        if self.smart_routing {
            self.registry.active_connections().into_values().collect()
        } else {
            self.registry.owner_connection().into_iter().collect()
        }
    }

    async fn register_on_connection(&self, id: ListenerId, connection: Arc<Connection>) {
        let info = lock(&self.registration_info)
            .get(&id)
            .map(|info| (Arc::clone(&info.codec), Arc::clone(&info.handler)));
        let Some((codec, handler)) = info else {
            return;
        };
        let already_registered = lock(&self.active_registrations)
            .get(&id)
            .map_or(false, |per_connection| per_connection.contains_key(&connection.id()));
        if already_registered {
            return;
        }

        let request = codec.encode_add_request(self.smart_routing);
        let result = self
            .invocations
            .invoke_with_handler(request, Arc::clone(&connection), handler)
            .await;

        let (response, correlation_id) = match result {
            Ok(ok) => ok,
            Err(e) => {
                self.record_failure(id, &connection, &e);
                return;
            }
        };

        let server_registration_id = match codec.decode_add_response(&response) {
            Ok(server_registration_id) => server_registration_id,
            Err(e) => {
                self.invocations.remove_event_handler(correlation_id);
                self.record_failure(id, &connection, &e);
                return;
            }
        };

        let outcome = {
            let mut active = lock(&self.active_registrations);
            match active.get_mut(&id) {
                Some(per_connection) if connection.is_alive() => {
                    if per_connection.contains_key(&connection.id()) {
                        StoreOutcome::Duplicate
                    } else {
                        per_connection.insert(
                            connection.id(),
                            EventRegistration {
                                server_registration_id,
                                correlation_id,
                                connection: Arc::clone(&connection),
                            },
                        );
                        StoreOutcome::Stored
                    }
                }
                _ => StoreOutcome::Discarded,
            }
        };

        match outcome {
            StoreOutcome::Stored => {}
            StoreOutcome::Discarded => {
                self.invocations.remove_event_handler(correlation_id);
                return;
            }
            StoreOutcome::Duplicate => {
                // A concurrent attempt registered on this connection first.
                self.invocations.remove_event_handler(correlation_id);
                let request = codec.encode_remove_request(server_registration_id);
                if let Err(e) = self.invocations.invoke_on_connection(request, connection).await {
                    tracing::debug!(listener = %id, error = %e, "failed to remove duplicate registration");
                }
                return;
            }
        }

        if let Some(failed) = lock(&self.failed_registrations).get_mut(&connection.id()) {
            failed.remove(&id);
        }
        self.stats.record_registration();
        tracing::debug!(
            listener = %id,
            connection = %connection.id(),
            registration = %server_registration_id,
            "registered listener"
        );
    }

    fn record_failure(&self, id: ListenerId, connection: &Connection, error: &HazelcastError) {
        self.stats.record_failure();
        tracing::warn!(
            listener = %id,
            connection = %connection.id(),
            address = %connection.address(),
            error = %error,
            "listener registration failed"
        );
        if connection.is_alive() && lock(&self.registration_info).contains_key(&id) {
            lock(&self.failed_registrations)
                .entry(connection.id())
                .or_default()
                .insert(id);
        }
    }
}
