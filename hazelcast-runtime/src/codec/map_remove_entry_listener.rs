//! `Map.RemoveEntryListener`: removes a map listener registration from a
//! member.

use hazelcast_wire::protocol::builtin::{decode_bool, encode_bool, encode_string, encode_uuid};
use hazelcast_wire::protocol::{
    ClientMessage, BOOLEAN_SIZE_IN_BYTES, PARTITION_ID_ANY, REQUEST_HEADER_SIZE,
    RESPONSE_HEADER_SIZE, UUID_SIZE_IN_BYTES,
};
use hazelcast_wire::Result;
use uuid::Uuid;

use super::{initial_content, new_response};

/// Request message type.
pub const REQUEST_MESSAGE_TYPE: i32 = 0x011A00;
/// Response message type.
pub const RESPONSE_MESSAGE_TYPE: i32 = 0x011A01;

const REQUEST_REGISTRATION_ID_OFFSET: usize = REQUEST_HEADER_SIZE;
const REQUEST_INITIAL_FRAME_SIZE: usize = REQUEST_REGISTRATION_ID_OFFSET + UUID_SIZE_IN_BYTES;
const RESPONSE_RESPONSE_OFFSET: usize = RESPONSE_HEADER_SIZE;

/// Encodes a request removing `registration_id` from map `name`.
pub fn encode_request(name: &str, registration_id: Uuid) -> ClientMessage {
    let mut message = ClientMessage::create_with_initial_frame_size(
        REQUEST_MESSAGE_TYPE,
        PARTITION_ID_ANY,
        REQUEST_INITIAL_FRAME_SIZE,
    );
    if let Some(initial) = message.initial_frame_mut() {
        encode_uuid(
            &mut initial.content,
            REQUEST_REGISTRATION_ID_OFFSET,
            Some(registration_id),
        );
    }
    encode_string(&mut message, name);
    message
}

/// Decodes whether the member found and removed the registration.
pub fn decode_response(message: &ClientMessage) -> Result<bool> {
    decode_bool(
        initial_content(message, "remove entry listener response")?,
        RESPONSE_RESPONSE_OFFSET,
    )
}

/// Encodes the member's reply.
pub fn encode_response(removed: bool) -> ClientMessage {
    let mut message = new_response(
        RESPONSE_MESSAGE_TYPE,
        RESPONSE_RESPONSE_OFFSET + BOOLEAN_SIZE_IN_BYTES,
    );
    if let Some(initial) = message.initial_frame_mut() {
        encode_bool(&mut initial.content, RESPONSE_RESPONSE_OFFSET, removed);
    }
    message
}
