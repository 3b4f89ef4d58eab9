//! `Client.Ping`: keeps an idle connection's heartbeat alive.

use hazelcast_wire::protocol::{ClientMessage, PARTITION_ID_ANY};

use super::new_response;

/// Request message type.
pub const REQUEST_MESSAGE_TYPE: i32 = 0x000B00;
/// Response message type.
pub const RESPONSE_MESSAGE_TYPE: i32 = 0x000B01;

/// Encodes a ping request.
pub fn encode_request() -> ClientMessage {
    ClientMessage::create_for_encode(REQUEST_MESSAGE_TYPE, PARTITION_ID_ANY)
}

/// Encodes the member's empty reply.
pub fn encode_response() -> ClientMessage {
    new_response(RESPONSE_MESSAGE_TYPE, 0)
}
