//! Single connection to a Hazelcast cluster member.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::{SinkExt, StreamExt};
use hazelcast_wire::protocol::{ClientMessage, ClientMessageCodec};
use hazelcast_wire::{HazelcastError, Result};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{CloseReason, ConnectionEvent};
use crate::sync::lock;

/// A decoded message, or the decode failure scoped to one message, tagged
/// with the connection it arrived on.
pub type InboundMessage = (Arc<Connection>, Result<ClientMessage>);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generates a new unique connection ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A connection to a single Hazelcast cluster member.
///
/// Writes are queued to a writer task and never block. Reads are performed
/// by a reader task that forwards every decoded message to the client's
/// dispatch channel.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    address: SocketAddr,
    member_uuid: Mutex<Option<Uuid>>,
    outbound: mpsc::UnboundedSender<ClientMessage>,
    closed: CancellationToken,
    close_reason: Mutex<Option<CloseReason>>,
    created_at: Instant,
    last_read_at: Mutex<Instant>,
    last_write_at: Mutex<Instant>,
    heartbeat_healthy: AtomicBool,
}

impl Connection {
    fn new(address: SocketAddr, outbound: mpsc::UnboundedSender<ClientMessage>) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::new(),
            address,
            member_uuid: Mutex::new(None),
            outbound,
            closed: CancellationToken::new(),
            close_reason: Mutex::new(None),
            created_at: now,
            last_read_at: Mutex::new(now),
            last_write_at: Mutex::new(now),
            heartbeat_healthy: AtomicBool::new(true),
        }
    }

    /// Creates a connection that is not backed by a socket.
    ///
    /// Messages written to it are delivered to the returned receiver, and
    /// whoever holds the receiver plays the member side.
    pub fn detached(address: SocketAddr) -> (Arc<Self>, mpsc::UnboundedReceiver<ClientMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self::new(address, tx)), rx)
    }

    /// Returns the connection's unique identifier.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the remote address of this connection.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Returns the uuid of the member behind this connection, once known.
    pub fn member_uuid(&self) -> Option<Uuid> {
        *lock(&self.member_uuid)
    }

    /// Records the uuid the member reported during authentication.
    pub fn set_member_uuid(&self, uuid: Uuid) {
        *lock(&self.member_uuid) = Some(uuid);
    }

    /// Returns when this connection was created.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Returns when data was last read from this connection.
    pub fn last_read_at(&self) -> Instant {
        *lock(&self.last_read_at)
    }

    /// Returns when data was last written to this connection.
    pub fn last_write_at(&self) -> Instant {
        *lock(&self.last_write_at)
    }

    /// Returns `true` until the connection is closed.
    pub fn is_alive(&self) -> bool {
        !self.closed.is_cancelled()
    }

    /// Returns `false` while the heartbeat of this connection is stopped.
    pub fn is_heartbeat_healthy(&self) -> bool {
        self.heartbeat_healthy.load(Ordering::Acquire)
    }

    /// Returns why the connection was closed, if it was.
    pub fn close_reason(&self) -> Option<CloseReason> {
        lock(&self.close_reason).clone()
    }

    /// Queues a message for writing.
    pub fn write(&self, message: ClientMessage) -> Result<()> {
        if !self.is_alive() {
            return Err(HazelcastError::Transport(format!(
                "{} to {} is closed",
                self.id, self.address
            )));
        }
        self.outbound.send(message).map_err(|_| {
            HazelcastError::Transport(format!(
                "writer of {} to {} has stopped",
                self.id, self.address
            ))
        })?;
        *lock(&self.last_write_at) = Instant::now();
        Ok(())
    }

    /// Closes the connection.
    ///
    /// Returns `false` if it was already closed; the first reason wins.
    pub fn close(&self, reason: CloseReason) -> bool {
        {
            let mut current = lock(&self.close_reason);
            if current.is_some() {
                return false;
            }
            *current = Some(reason.clone());
        }
        self.closed.cancel();
        tracing::info!(id = %self.id, address = %self.address, reason = %reason, "connection closed");
        true
    }

    /// Records an inbound read. Returns `true` if this read restored a
    /// stopped heartbeat.
    pub(crate) fn mark_read(&self) -> bool {
        *lock(&self.last_read_at) = Instant::now();
        !self.heartbeat_healthy.swap(true, Ordering::AcqRel)
    }

    /// Marks the heartbeat stopped. Returns `true` on the transition.
    pub(crate) fn mark_heartbeat_stopped(&self) -> bool {
        self.heartbeat_healthy.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

/// Spawns the reader and writer tasks of an authenticated connection.
///
/// `on_close` runs exactly once, after the reader task stops, with the
/// reason the connection was closed.
pub(crate) fn spawn_io<F>(
    address: SocketAddr,
    reader: FramedRead<OwnedReadHalf, ClientMessageCodec>,
    writer: FramedWrite<OwnedWriteHalf, ClientMessageCodec>,
    inbound: mpsc::UnboundedSender<InboundMessage>,
    events: broadcast::Sender<ConnectionEvent>,
    on_close: F,
) -> Arc<Connection>
where
    F: FnOnce(Arc<Connection>, CloseReason) + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let connection = Arc::new(Connection::new(address, tx));

    tokio::spawn(write_loop(Arc::clone(&connection), writer, rx));
    tokio::spawn(read_loop(
        Arc::clone(&connection),
        reader,
        inbound,
        events,
        on_close,
    ));

    connection
}

async fn write_loop(
    connection: Arc<Connection>,
    mut writer: FramedWrite<OwnedWriteHalf, ClientMessageCodec>,
    mut outbound: mpsc::UnboundedReceiver<ClientMessage>,
) {
    let closed = connection.closed_token();
    loop {
        tokio::select! {
            _ = closed.cancelled() => break,
            message = outbound.recv() => {
                let Some(message) = message else { break };
                tracing::trace!(
                    id = %connection.id(),
                    message_type = ?message.message_type(),
                    correlation_id = ?message.correlation_id(),
                    "writing message"
                );
                if let Err(e) = writer.send(message).await {
                    tracing::warn!(id = %connection.id(), error = %e, "write failed");
                    connection.close(CloseReason::WriteError(e.to_string()));
                    break;
                }
            }
        }
    }
}

async fn read_loop<F>(
    connection: Arc<Connection>,
    mut reader: FramedRead<OwnedReadHalf, ClientMessageCodec>,
    inbound: mpsc::UnboundedSender<InboundMessage>,
    events: broadcast::Sender<ConnectionEvent>,
    on_close: F,
) where
    F: FnOnce(Arc<Connection>, CloseReason),
{
    let closed = connection.closed_token();
    let failure = loop {
        tokio::select! {
            _ = closed.cancelled() => break None,
            item = reader.next() => match item {
                Some(Ok(message)) => {
                    if connection.mark_read() {
                        tracing::info!(id = %connection.id(), "heartbeat restored");
                        let _ = events.send(ConnectionEvent::HeartbeatRestored(Arc::clone(&connection)));
                    }
                    if inbound.send((Arc::clone(&connection), message)).is_err() {
                        break Some(CloseReason::ClientShutdown);
                    }
                }
                Some(Err(e)) => break Some(CloseReason::ReadError(e.to_string())),
                None => break Some(CloseReason::RemoteClosed),
            }
        }
    };

    if let Some(reason) = failure {
        connection.close(reason);
    }
    let reason = connection
        .close_reason()
        .unwrap_or(CloseReason::RemoteClosed);
    on_close(connection, reason);
}
