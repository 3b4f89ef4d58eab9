//! The invocation engine.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hazelcast_wire::protocol::exception::decode_exception;
use hazelcast_wire::protocol::ClientMessage;
use hazelcast_wire::{HazelcastError, Result};
use rand::seq::IteratorRandom;
use tokio::sync::oneshot;
use tokio::time::{timeout_at, Instant};
use tracing::instrument;

use super::{EventHandler, PartitionTable};
use crate::config::{ClientConfig, InvocationConfig};
use crate::connection::{CloseReason, Connection, ConnectionId, ConnectionRegistry};
use crate::sync::lock;

/// Where an invocation is sent.
#[derive(Debug, Clone)]
pub enum InvocationTarget {
    /// A specific connection. Never rerouted or retried.
    Connection(Arc<Connection>),
    /// The owner of a partition.
    Partition(i32),
    /// A specific member address. Never retried.
    Address(SocketAddr),
    /// Any connected member.
    Any,
}

impl InvocationTarget {
    fn is_bound(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Address(_))
    }
}

impl fmt::Display for InvocationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(c) => write!(f, "connection {}", c.id()),
            Self::Partition(id) => write!(f, "partition {}", id),
            Self::Address(address) => write!(f, "address {}", address),
            Self::Any => write!(f, "any member"),
        }
    }
}

#[derive(Debug)]
struct PendingInvocation {
    connection: ConnectionId,
    sender: oneshot::Sender<Result<ClientMessage>>,
}

struct RegisteredHandler {
    connection: ConnectionId,
    handler: Arc<dyn EventHandler>,
}

/// Correlates requests with responses, routes them to members and retries
/// them within the invocation timeout.
pub struct InvocationService {
    config: InvocationConfig,
    smart_routing: bool,
    registry: Arc<dyn ConnectionRegistry>,
    partitions: Arc<dyn PartitionTable>,
    next_correlation_id: AtomicI64,
    pending: Mutex<HashMap<i64, PendingInvocation>>,
    event_handlers: Mutex<HashMap<i64, RegisteredHandler>>,
    shutdown: AtomicBool,
}

impl fmt::Debug for InvocationService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationService")
            .field("smart_routing", &self.smart_routing)
            .field("pending", &self.pending_count())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

impl InvocationService {
    /// Creates an invocation service routing through `registry` and
    /// `partitions`.
    pub fn new(
        config: &ClientConfig,
        registry: Arc<dyn ConnectionRegistry>,
        partitions: Arc<dyn PartitionTable>,
    ) -> Self {
        Self {
            config: config.invocation().clone(),
            smart_routing: config.network().smart_routing(),
            registry,
            partitions,
            next_correlation_id: AtomicI64::new(1),
            pending: Mutex::new(HashMap::new()),
            event_handlers: Mutex::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Returns the number of invocations awaiting a response.
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Returns the number of registered event handlers.
    pub fn event_handler_count(&self) -> usize {
        lock(&self.event_handlers).len()
    }

    /// Returns `true` once the service was shut down.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Sends `message` to `target` and waits for its response.
    #[instrument(
        name = "invocation.invoke",
        skip(self, message),
        fields(message_type = ?message.message_type(), target = %target)
    )]
    pub async fn invoke(
        &self,
        message: ClientMessage,
        target: InvocationTarget,
    ) -> Result<ClientMessage> {
        self.run(message, target, None)
            .await
            .map(|(response, _)| response)
    }

    /// Sends `message` over `connection`.
    pub async fn invoke_on_connection(
        &self,
        message: ClientMessage,
        connection: Arc<Connection>,
    ) -> Result<ClientMessage> {
        self.invoke(message, InvocationTarget::Connection(connection))
            .await
    }

    /// Sends `message` to the owner of `partition_id`.
    pub async fn invoke_on_partition(
        &self,
        message: ClientMessage,
        partition_id: i32,
    ) -> Result<ClientMessage> {
        let mut message = message;
        message.set_partition_id(partition_id);
        self.invoke(message, InvocationTarget::Partition(partition_id))
            .await
    }

    /// Sends `message` to the member at `address`.
    pub async fn invoke_on_target(
        &self,
        message: ClientMessage,
        address: SocketAddr,
    ) -> Result<ClientMessage> {
        self.invoke(message, InvocationTarget::Address(address))
            .await
    }

    /// Sends `message` to any connected member.
    pub async fn invoke_on_random_target(&self, message: ClientMessage) -> Result<ClientMessage> {
        self.invoke(message, InvocationTarget::Any).await
    }

    /// Sends a listener registration over `connection`. `handler` receives
    /// every event carrying the request's correlation id until
    /// [`remove_event_handler`](Self::remove_event_handler) is called.
    ///
    /// Returns the response and the correlation id the handler is filed
    /// under.
    #[instrument(
        name = "invocation.invoke_with_handler",
        skip(self, message, handler),
        fields(message_type = ?message.message_type(), connection = %connection.id())
    )]
    pub async fn invoke_with_handler(
        &self,
        message: ClientMessage,
        connection: Arc<Connection>,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(ClientMessage, i64)> {
        self.run(message, InvocationTarget::Connection(connection), Some(handler))
            .await
    }

    /// Stops delivering events filed under `correlation_id`.
    pub fn remove_event_handler(&self, correlation_id: i64) -> bool {
        lock(&self.event_handlers).remove(&correlation_id).is_some()
    }

    fn check_running(&self) -> Result<()> {
        if self.is_shutdown() {
            return Err(HazelcastError::IllegalState(
                "invocation service is shut down".to_string(),
            ));
        }
        Ok(())
    }

    async fn run(
        &self,
        mut message: ClientMessage,
        target: InvocationTarget,
        handler: Option<Arc<dyn EventHandler>>,
    ) -> Result<(ClientMessage, i64)> {
        self.check_running()?;
        let timeout = self.config.invocation_timeout();
        let deadline = Instant::now() + timeout;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let correlation_id = self.next_correlation_id.fetch_add(1, Ordering::Relaxed);
            message.set_correlation_id(correlation_id);

            let error = match self
                .attempt(&message, &target, correlation_id, deadline, handler.as_ref())
                .await
            {
                Ok(response) => return Ok((response, correlation_id)),
                Err(e) => e,
            };
            if handler.is_some() {
                self.remove_event_handler(correlation_id);
            }

            if target.is_bound() || !error.is_retryable() || self.is_shutdown() {
                return Err(error);
            }

            let now = Instant::now();
            if now < deadline {
                if attempt < self.config.fast_invocation_count() {
                    tokio::task::yield_now().await;
                } else {
                    let pause = self.config.invocation_retry_pause().min(deadline - now);
                    tokio::time::sleep(pause).await;
                }
            }
            self.check_running()?;
            if Instant::now() >= deadline {
                tracing::debug!(attempts = attempt, error = %error, "retry past the deadline");
                return Err(deadline_exceeded(timeout, attempt, &error));
            }
            tracing::debug!(attempt = attempt, correlation_id = correlation_id, error = %error, "retrying invocation");
        }
    }

    async fn attempt(
        &self,
        message: &ClientMessage,
        target: &InvocationTarget,
        correlation_id: i64,
        deadline: Instant,
        handler: Option<&Arc<dyn EventHandler>>,
    ) -> Result<ClientMessage> {
        let connection = match timeout_at(deadline, self.resolve(target)).await {
            Ok(connection) => connection?,
            Err(_) => {
                return Err(HazelcastError::DeadlineExceeded(format!(
                    "no connection to {} before the deadline",
                    target
                )))
            }
        };

        let (sender, receiver) = oneshot::channel();
        lock(&self.pending).insert(
            correlation_id,
            PendingInvocation {
                connection: connection.id(),
                sender,
            },
        );
        if let Some(handler) = handler {
            lock(&self.event_handlers).insert(
                correlation_id,
                RegisteredHandler {
                    connection: connection.id(),
                    handler: Arc::clone(handler),
                },
            );
        }

        tracing::trace!(correlation_id = correlation_id, connection = %connection.id(), "writing invocation");
        if let Err(e) = connection.write(message.clone()) {
            lock(&self.pending).remove(&correlation_id);
            return Err(e);
        }

        match timeout_at(deadline, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(HazelcastError::Transport(format!(
                "invocation {} was dropped",
                correlation_id
            ))),
            Err(_) => {
                lock(&self.pending).remove(&correlation_id);
                Err(HazelcastError::DeadlineExceeded(format!(
                    "no response to invocation {} on {}",
                    correlation_id,
                    connection.id()
                )))
            }
        }
    }

    async fn resolve(&self, target: &InvocationTarget) -> Result<Arc<Connection>> {
        match target {
            InvocationTarget::Connection(connection) => {
                if connection.is_alive() {
                    Ok(Arc::clone(connection))
                } else {
                    Err(HazelcastError::Transport(format!(
                        "{} to {} is closed",
                        connection.id(),
                        connection.address()
                    )))
                }
            }
            InvocationTarget::Address(address) => self.registry.get_or_connect(*address).await,
            InvocationTarget::Partition(partition_id) => {
                if self.smart_routing {
                    if let Some(owner) = self.partitions.partition_owner(*partition_id) {
                        return self.registry.get_or_connect(owner).await;
                    }
                }
                self.any_connection()
            }
            InvocationTarget::Any => self.any_connection(),
        }
    }

    fn any_connection(&self) -> Result<Arc<Connection>> {
        let connection = if self.smart_routing {
            self.registry
                .active_connections()
                .into_values()
                .choose(&mut rand::thread_rng())
        } else {
            self.registry.owner_connection()
        };
        connection.ok_or_else(|| {
            HazelcastError::Transport("no connection to the cluster is available".to_string())
        })
    }

    /// Delivers one inbound message: completes the matching invocation, or
    /// hands an event to its handler.
    pub fn handle_message(&self, connection: &Arc<Connection>, message: Result<ClientMessage>) {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(id = %connection.id(), error = %e, "dropping undecodable message");
                return;
            }
        };
        let Some(correlation_id) = message.correlation_id() else {
            tracing::warn!(id = %connection.id(), "dropping message without a header");
            return;
        };

        if message.is_event() {
            let handler = lock(&self.event_handlers)
                .get(&correlation_id)
                .map(|registered| Arc::clone(&registered.handler));
            match handler {
                Some(handler) => handler.handle(&message),
                None => tracing::debug!(
                    correlation_id = correlation_id,
                    message_type = ?message.message_type(),
                    "no handler for event"
                ),
            }
            return;
        }

        let pending = lock(&self.pending).remove(&correlation_id);
        let Some(pending) = pending else {
            tracing::debug!(correlation_id = correlation_id, "dropping response for unknown correlation id");
            return;
        };
        let result = if message.is_exception() {
            Err(decode_exception(&message))
        } else {
            Ok(message)
        };
        let _ = pending.sender.send(result);
    }

    /// Fails every invocation waiting on `connection` with a transport
    /// error and drops the event handlers registered through it.
    pub fn on_connection_closed(&self, connection: &Connection, reason: &CloseReason) {
        let id = connection.id();
        let failed: Vec<PendingInvocation> = {
            let mut pending = lock(&self.pending);
            let ids: Vec<i64> = pending
                .iter()
                .filter(|(_, p)| p.connection == id)
                .map(|(correlation_id, _)| *correlation_id)
                .collect();
            ids.iter().filter_map(|c| pending.remove(c)).collect()
        };
        lock(&self.event_handlers).retain(|_, h| h.connection != id);

        if !failed.is_empty() {
            tracing::debug!(id = %id, count = failed.len(), "failing invocations of closed connection");
        }
        for invocation in failed {
            let _ = invocation.sender.send(Err(HazelcastError::Transport(format!(
                "{} to {} closed: {}",
                id,
                connection.address(),
                reason
            ))));
        }
    }

    /// Rejects every in-flight invocation and all later ones.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let drained: Vec<PendingInvocation> =
            lock(&self.pending).drain().map(|(_, p)| p).collect();
        lock(&self.event_handlers).clear();
        tracing::debug!(count = drained.len(), "rejecting pending invocations");
        for invocation in drained {
            let _ = invocation.sender.send(Err(HazelcastError::IllegalState(
                "client is shutting down".to_string(),
            )));
        }
    }
}

fn deadline_exceeded(timeout: Duration, attempts: u32, cause: &HazelcastError) -> HazelcastError {
    HazelcastError::DeadlineExceeded(format!(
        "invocation timed out after {:?} and {} attempts, last error: {}",
        timeout, attempts, cause
    ))
}
