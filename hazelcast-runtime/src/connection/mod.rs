//! Connection management for Hazelcast client.

mod connection;
mod heartbeat;
mod manager;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use hazelcast_wire::Result;
use tokio::sync::broadcast;
use uuid::Uuid;

pub use connection::{Connection, ConnectionId, InboundMessage};
pub use heartbeat::HeartbeatService;
pub use manager::ConnectionManager;

/// Why a connection was closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The client is shutting down.
    ClientShutdown,
    /// The member left the cluster.
    MemberLeft,
    /// The member rejected the authentication request.
    AuthenticationFailed(String),
    /// The member closed the socket.
    RemoteClosed,
    /// Reading from the socket failed or the byte stream could not be framed.
    ReadError(String),
    /// Writing to the socket failed.
    WriteError(String),
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClientShutdown => write!(f, "client shutdown"),
            Self::MemberLeft => write!(f, "member left the cluster"),
            Self::AuthenticationFailed(msg) => write!(f, "authentication failed: {}", msg),
            Self::RemoteClosed => write!(f, "closed by the remote side"),
            Self::ReadError(msg) => write!(f, "read error: {}", msg),
            Self::WriteError(msg) => write!(f, "write error: {}", msg),
        }
    }
}

/// Events emitted during connection lifecycle.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// An authenticated connection was added to the pool.
    Opened(Arc<Connection>),
    /// A connection was removed from the pool.
    Closed {
        /// The closed connection.
        connection: Arc<Connection>,
        /// Why it was closed.
        reason: CloseReason,
    },
    /// Nothing was read from a connection within the heartbeat timeout.
    HeartbeatStopped(Arc<Connection>),
    /// A connection whose heartbeat had stopped received data again.
    HeartbeatRestored(Arc<Connection>),
}

/// The live connection set, as seen by the invocation engine, the
/// membership tracker and the listener registry.
#[async_trait]
pub trait ConnectionRegistry: Send + Sync + std::fmt::Debug {
    /// Returns the connection to `address`, opening and authenticating one
    /// if none exists.
    async fn get_or_connect(&self, address: SocketAddr) -> Result<Arc<Connection>>;

    /// Returns the connection to the member with the given uuid.
    fn get_connection(&self, member_uuid: &Uuid) -> Option<Arc<Connection>>;

    /// Returns every open connection keyed by member address.
    fn active_connections(&self) -> HashMap<SocketAddr, Arc<Connection>>;

    /// Returns the connection used for cluster-wide requests when no
    /// better target is known.
    fn owner_connection(&self) -> Option<Arc<Connection>>;

    /// Closes a connection and removes it from the pool.
    fn close_connection(&self, connection: &Arc<Connection>, reason: CloseReason);

    /// Subscribes to connection lifecycle events.
    fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_reason_display() {
        assert_eq!(CloseReason::MemberLeft.to_string(), "member left the cluster");
        assert_eq!(
            CloseReason::ReadError("eof".into()).to_string(),
            "read error: eof"
        );
    }

    #[test]
    fn test_connection_event_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ConnectionEvent>();
        assert_send_sync::<CloseReason>();
    }
}
