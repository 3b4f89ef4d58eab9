//! Connection liveness checks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::time::{interval, Instant, MissedTickBehavior};

use super::{ConnectionEvent, ConnectionRegistry};
use crate::codec::client_ping;
use crate::config::NetworkConfig;
use crate::invocation::InvocationService;

/// Pings idle connections and reports connections whose member went quiet.
///
/// A connection that read nothing for `heartbeat_timeout` is marked stopped
/// and a [`ConnectionEvent::HeartbeatStopped`] is published; the next read
/// on it publishes [`ConnectionEvent::HeartbeatRestored`].
#[derive(Debug)]
pub struct HeartbeatService {
    interval: Duration,
    timeout: Duration,
    registry: Arc<dyn ConnectionRegistry>,
    invocations: Arc<InvocationService>,
    events: broadcast::Sender<ConnectionEvent>,
    shutdown: watch::Sender<bool>,
}

impl HeartbeatService {
    /// Creates the service. Nothing runs until [`start`](Self::start).
    pub fn new(
        network: &NetworkConfig,
        registry: Arc<dyn ConnectionRegistry>,
        invocations: Arc<InvocationService>,
        events: broadcast::Sender<ConnectionEvent>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            interval: network.heartbeat_interval(),
            timeout: network.heartbeat_timeout(),
            registry,
            invocations,
            events,
            shutdown,
        }
    }

    /// Spawns the periodic check.
    pub fn start(self: &Arc<Self>) {
        let service = Arc::clone(self);
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval(service.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => service.check_connections(),
                    result = shutdown_rx.changed() => {
                        if result.is_err() || *shutdown_rx.borrow() {
                            tracing::debug!("heartbeat task shutting down");
                            break;
                        }
                    }
                }
            }
        });
    }

    /// Runs one round of checks over every open connection.
    pub fn check_connections(&self) {
        let now = Instant::now();
        for connection in self.registry.active_connections().into_values() {
            if now.saturating_duration_since(connection.last_read_at()) > self.timeout {
                if connection.mark_heartbeat_stopped() {
                    tracing::warn!(
                        id = %connection.id(),
                        address = %connection.address(),
                        timeout = ?self.timeout,
                        "heartbeat stopped"
                    );
                    let _ = self
                        .events
                        .send(ConnectionEvent::HeartbeatStopped(Arc::clone(&connection)));
                }
            }

            if now.saturating_duration_since(connection.last_write_at()) > self.interval {
                let invocations = Arc::clone(&self.invocations);
                tokio::spawn(async move {
                    let id = connection.id();
                    if let Err(e) = invocations
                        .invoke_on_connection(client_ping::encode_request(), connection)
                        .await
                    {
                        tracing::debug!(id = %id, error = %e, "ping failed");
                    }
                });
            }
        }
    }

    /// Stops the periodic check.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}
