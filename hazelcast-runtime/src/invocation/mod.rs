//! Request/response correlation, routing and retry.
//!
//! The [`InvocationService`] is the single owner of the correlation counter,
//! the pending-invocation table and the event-handler table. Everything
//! else talks to members through it.

mod service;

use std::net::SocketAddr;

use hazelcast_wire::protocol::{ClientMessage, Data};
use hazelcast_wire::Result;
use uuid::Uuid;

pub use service::{InvocationService, InvocationTarget};

/// Receives push events for one registration.
pub trait EventHandler: Send + Sync {
    /// Handles one event message.
    fn handle(&self, event: &ClientMessage);
}

impl<F> EventHandler for F
where
    F: Fn(&ClientMessage) + Send + Sync,
{
    fn handle(&self, event: &ClientMessage) {
        self(event)
    }
}

/// Encodes and decodes the add/remove requests of one kind of listener.
pub trait ListenerCodec: Send + Sync {
    /// Encodes the registration request. `local_only` asks the member to
    /// send only the events it owns.
    fn encode_add_request(&self, local_only: bool) -> ClientMessage;

    /// Extracts the server-side registration id from the response.
    fn decode_add_response(&self, response: &ClientMessage) -> Result<Uuid>;

    /// Encodes the request removing a server-side registration.
    fn encode_remove_request(&self, registration_id: Uuid) -> ClientMessage;

    /// Decodes whether the member removed the registration.
    fn decode_remove_response(&self, response: &ClientMessage) -> Result<bool>;
}

/// Partition ownership, as needed to route keyed requests.
pub trait PartitionTable: Send + Sync + std::fmt::Debug {
    /// Returns the address of the member owning `partition_id`.
    fn partition_owner(&self, partition_id: i32) -> Option<SocketAddr>;

    /// Returns the partition a serialized key belongs to.
    fn partition_id(&self, key: &Data) -> i32;

    /// Returns the number of partitions, or 0 before it is known.
    fn partition_count(&self) -> i32;
}
