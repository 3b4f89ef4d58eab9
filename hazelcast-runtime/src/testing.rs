//! Test doubles for the collaborator traits.
//!
//! Shared by the crate's unit tests and its integration tests. Nothing here
//! opens a socket: connections are detached and the test plays every member.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hazelcast_wire::protocol::exception::{encode_exception_response, error_codes, ErrorHolder};
use hazelcast_wire::protocol::{ClientMessage, Data};
use hazelcast_wire::{HazelcastError, Result};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::codec::{map_add_near_cache_invalidation_listener as invalidation, map_remove_entry_listener};
use crate::connection::{CloseReason, Connection, ConnectionEvent, ConnectionRegistry};
use crate::invocation::{InvocationService, PartitionTable};
use crate::sync::lock;

/// A registry over detached connections; the test plays every member.
#[derive(Debug)]
pub struct StaticRegistry {
    connections: Mutex<Vec<Arc<Connection>>>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl Default for StaticRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticRegistry {
    /// Creates a registry without connections.
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(Vec::new()),
            events: broadcast::channel(64).0,
        }
    }

    /// Adds a connection to a member at `address` and emits `Opened`.
    ///
    /// The receiver yields every message the client writes to it.
    pub fn add(
        &self,
        address: SocketAddr,
        member_uuid: Uuid,
    ) -> (Arc<Connection>, mpsc::UnboundedReceiver<ClientMessage>) {
        let (connection, rx) = Connection::detached(address);
        connection.set_member_uuid(member_uuid);
        lock(&self.connections).push(Arc::clone(&connection));
        let _ = self.events.send(ConnectionEvent::Opened(Arc::clone(&connection)));
        (connection, rx)
    }

    /// Returns the sender of this registry's connection events.
    pub fn events(&self) -> broadcast::Sender<ConnectionEvent> {
        self.events.clone()
    }
}

#[async_trait]
impl ConnectionRegistry for StaticRegistry {
    async fn get_or_connect(&self, address: SocketAddr) -> Result<Arc<Connection>> {
        lock(&self.connections)
            .iter()
            .find(|c| c.is_alive() && c.address() == address)
            .cloned()
            .ok_or_else(|| HazelcastError::Transport(format!("no member at {}", address)))
    }

    fn get_connection(&self, member_uuid: &Uuid) -> Option<Arc<Connection>> {
        lock(&self.connections)
            .iter()
            .find(|c| c.is_alive() && c.member_uuid().as_ref() == Some(member_uuid))
            .cloned()
    }

    fn active_connections(&self) -> HashMap<SocketAddr, Arc<Connection>> {
        lock(&self.connections)
            .iter()
            .filter(|c| c.is_alive())
            .map(|c| (c.address(), Arc::clone(c)))
            .collect()
    }

    fn owner_connection(&self) -> Option<Arc<Connection>> {
        lock(&self.connections)
            .iter()
            .find(|c| c.is_alive())
            .cloned()
    }

    fn close_connection(&self, connection: &Arc<Connection>, reason: CloseReason) {
        if connection.close(reason.clone()) {
            let _ = self.events.send(ConnectionEvent::Closed {
                connection: Arc::clone(connection),
                reason,
            });
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }
}

/// A partition table that knows no owners.
#[derive(Debug)]
pub struct NoPartitions;

impl PartitionTable for NoPartitions {
    fn partition_owner(&self, _partition_id: i32) -> Option<SocketAddr> {
        None
    }

    fn partition_id(&self, _key: &Data) -> i32 {
        0
    }

    fn partition_count(&self) -> i32 {
        0
    }
}

/// Plays a member answering listener requests over a detached connection.
#[derive(Debug)]
pub struct ListenerMember {
    requests: Arc<Mutex<Vec<ClientMessage>>>,
    registrations: Arc<AtomicU32>,
    reject: Arc<AtomicBool>,
}

impl ListenerMember {
    /// Answers every request written to `connection` until the client drops
    /// it. Listener adds and removes succeed; other requests go unanswered.
    pub fn spawn(
        invocations: Arc<InvocationService>,
        connection: Arc<Connection>,
        mut inbound: mpsc::UnboundedReceiver<ClientMessage>,
    ) -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let registrations = Arc::new(AtomicU32::new(0));
        let reject = Arc::new(AtomicBool::new(false));
        let (log, added, rejecting) = (
            Arc::clone(&requests),
            Arc::clone(&registrations),
            Arc::clone(&reject),
        );

        tokio::spawn(async move {
            while let Some(request) = inbound.recv().await {
                let correlation_id = request.correlation_id().unwrap_or_default();
                let response = match request.message_type() {
                    Some(invalidation::REQUEST_MESSAGE_TYPE) if rejecting.load(Ordering::SeqCst) => {
                        encode_exception_response(
                            correlation_id,
                            &[ErrorHolder::new(
                                error_codes::ILLEGAL_STATE,
                                "java.lang.IllegalStateException",
                                Some("listener rejected".to_string()),
                            )],
                        )
                    }
                    Some(invalidation::REQUEST_MESSAGE_TYPE) => {
                        added.fetch_add(1, Ordering::SeqCst);
                        invalidation::encode_response(Uuid::new_v4())
                    }
                    Some(map_remove_entry_listener::REQUEST_MESSAGE_TYPE) => {
                        map_remove_entry_listener::encode_response(true)
                    }
                    _ => {
                        lock(&log).push(request);
                        continue;
                    }
                };
                lock(&log).push(request);
                let mut response = response;
                response.set_correlation_id(correlation_id);
                invocations.handle_message(&connection, Ok(response));
            }
        });
        Self {
            requests,
            registrations,
            reject,
        }
    }

    /// Returns every request received so far.
    pub fn requests(&self) -> Vec<ClientMessage> {
        lock(&self.requests).clone()
    }

    /// Returns how many listener registrations were accepted.
    pub fn registrations(&self) -> u32 {
        self.registrations.load(Ordering::SeqCst)
    }

    /// Makes the member answer registrations with an exception.
    pub fn reject_registrations(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }
}
