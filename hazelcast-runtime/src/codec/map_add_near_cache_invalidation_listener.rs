//! `Map.AddNearCacheInvalidationListener`: subscribes to the invalidation
//! stream of one map, plus the single and batch invalidation events it
//! produces.

use hazelcast_wire::protocol::builtin::{
    decode_bool, decode_data, decode_int, decode_list, decode_long, decode_long_list,
    decode_nullable, decode_string, decode_uuid, decode_uuid_list, encode_bool, encode_data,
    encode_int, encode_list, encode_long, encode_long_list, encode_nullable, encode_string,
    encode_uuid, encode_uuid_list,
};
use hazelcast_wire::protocol::{
    ClientMessage, Data, BOOLEAN_SIZE_IN_BYTES, EVENT_HEADER_SIZE, INT_SIZE_IN_BYTES,
    LONG_SIZE_IN_BYTES, PARTITION_ID_ANY, REQUEST_HEADER_SIZE, RESPONSE_HEADER_SIZE,
    UUID_SIZE_IN_BYTES,
};
use hazelcast_wire::{HazelcastError, Result};
use uuid::Uuid;

use super::{initial_content, map_remove_entry_listener, new_event, new_response};
use crate::invocation::ListenerCodec;

/// Request message type.
pub const REQUEST_MESSAGE_TYPE: i32 = 0x013F00;
/// Response message type.
pub const RESPONSE_MESSAGE_TYPE: i32 = 0x013F01;
/// Single-key invalidation event type.
pub const EVENT_INVALIDATION_MESSAGE_TYPE: i32 = 0x013F02;
/// Batch invalidation event type.
pub const EVENT_BATCH_INVALIDATION_MESSAGE_TYPE: i32 = 0x013F03;

/// Listener flag selecting invalidation events.
pub const INVALIDATION_LISTENER_FLAG: i32 = 1 << 8;

const REQUEST_LISTENER_FLAGS_OFFSET: usize = REQUEST_HEADER_SIZE;
const REQUEST_LOCAL_ONLY_OFFSET: usize = REQUEST_LISTENER_FLAGS_OFFSET + INT_SIZE_IN_BYTES;
const REQUEST_INITIAL_FRAME_SIZE: usize = REQUEST_LOCAL_ONLY_OFFSET + BOOLEAN_SIZE_IN_BYTES;
const RESPONSE_RESPONSE_OFFSET: usize = RESPONSE_HEADER_SIZE;

const EVENT_SOURCE_UUID_OFFSET: usize = EVENT_HEADER_SIZE;
const EVENT_PARTITION_UUID_OFFSET: usize = EVENT_SOURCE_UUID_OFFSET + UUID_SIZE_IN_BYTES;
const EVENT_SEQUENCE_OFFSET: usize = EVENT_PARTITION_UUID_OFFSET + UUID_SIZE_IN_BYTES;
const EVENT_INITIAL_FRAME_SIZE: usize = EVENT_SEQUENCE_OFFSET + LONG_SIZE_IN_BYTES;

/// Invalidation of a single key. A missing key invalidates the whole map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationEvent {
    /// The invalidated key.
    pub key: Option<Data>,
    /// The member that caused the invalidation.
    pub source_uuid: Option<Uuid>,
    /// The uuid of the key's partition on the member.
    pub partition_uuid: Option<Uuid>,
    /// The partition's invalidation sequence after this change.
    pub sequence: i64,
}

/// A batch of invalidations. The four lists are parallel.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BatchInvalidationEvent {
    /// The invalidated keys.
    pub keys: Vec<Data>,
    /// The members that caused each invalidation.
    pub source_uuids: Vec<Uuid>,
    /// The partition uuids of each key.
    pub partition_uuids: Vec<Uuid>,
    /// The partition sequences of each invalidation.
    pub sequences: Vec<i64>,
}

/// Encodes a registration request for map `name`.
pub fn encode_request(name: &str, listener_flags: i32, local_only: bool) -> ClientMessage {
    let mut message = ClientMessage::create_with_initial_frame_size(
        REQUEST_MESSAGE_TYPE,
        PARTITION_ID_ANY,
        REQUEST_INITIAL_FRAME_SIZE,
    );
    if let Some(initial) = message.initial_frame_mut() {
        encode_int(&mut initial.content, REQUEST_LISTENER_FLAGS_OFFSET, listener_flags);
        encode_bool(&mut initial.content, REQUEST_LOCAL_ONLY_OFFSET, local_only);
    }
    encode_string(&mut message, name);
    message
}

/// Decodes the server-side registration id.
pub fn decode_response(message: &ClientMessage) -> Result<Uuid> {
    decode_uuid(
        initial_content(message, "near cache invalidation listener response")?,
        RESPONSE_RESPONSE_OFFSET,
    )?
    .ok_or_else(|| HazelcastError::Decode("listener registration without an id".to_string()))
}

/// Encodes the member's reply carrying the registration id.
pub fn encode_response(registration_id: Uuid) -> ClientMessage {
    let mut message = new_response(
        RESPONSE_MESSAGE_TYPE,
        RESPONSE_RESPONSE_OFFSET + UUID_SIZE_IN_BYTES,
    );
    if let Some(initial) = message.initial_frame_mut() {
        encode_uuid(
            &mut initial.content,
            RESPONSE_RESPONSE_OFFSET,
            Some(registration_id),
        );
    }
    message
}

/// Decodes a single-key invalidation event.
pub fn decode_invalidation_event(message: &ClientMessage) -> Result<InvalidationEvent> {
    let mut iter = message.frame_iter();
    let content = &iter.next_frame()?.content;
    let source_uuid = decode_uuid(content, EVENT_SOURCE_UUID_OFFSET)?;
    let partition_uuid = decode_uuid(content, EVENT_PARTITION_UUID_OFFSET)?;
    let sequence = decode_long(content, EVENT_SEQUENCE_OFFSET)?;
    let key = decode_nullable(&mut iter, decode_data)?;
    Ok(InvalidationEvent {
        key,
        source_uuid,
        partition_uuid,
        sequence,
    })
}

/// Decodes a batch invalidation event.
pub fn decode_batch_invalidation_event(message: &ClientMessage) -> Result<BatchInvalidationEvent> {
    let mut iter = message.frame_iter();
    iter.next_frame()?;
    let keys = decode_list(&mut iter, decode_data)?;
    let source_uuids = decode_uuid_list(&mut iter)?;
    let partition_uuids = decode_uuid_list(&mut iter)?;
    let sequences = decode_long_list(&mut iter)?;
    if source_uuids.len() != keys.len()
        || partition_uuids.len() != keys.len()
        || sequences.len() != keys.len()
    {
        return Err(HazelcastError::Decode(format!(
            "batch invalidation lists differ in length: {} keys, {} sources, {} partitions, {} sequences",
            keys.len(),
            source_uuids.len(),
            partition_uuids.len(),
            sequences.len()
        )));
    }
    Ok(BatchInvalidationEvent {
        keys,
        source_uuids,
        partition_uuids,
        sequences,
    })
}

/// Encodes a single-key invalidation event, as a member pushes it.
pub fn encode_invalidation_event(event: &InvalidationEvent) -> ClientMessage {
    let mut message = new_event(EVENT_INVALIDATION_MESSAGE_TYPE, EVENT_INITIAL_FRAME_SIZE);
    if let Some(initial) = message.initial_frame_mut() {
        encode_uuid(&mut initial.content, EVENT_SOURCE_UUID_OFFSET, event.source_uuid);
        encode_uuid(
            &mut initial.content,
            EVENT_PARTITION_UUID_OFFSET,
            event.partition_uuid,
        );
        encode_long(&mut initial.content, EVENT_SEQUENCE_OFFSET, event.sequence);
    }
    encode_nullable(&mut message, event.key.as_deref(), encode_data);
    message
}

/// Encodes a batch invalidation event, as a member pushes it.
pub fn encode_batch_invalidation_event(event: &BatchInvalidationEvent) -> ClientMessage {
    let mut message = new_event(EVENT_BATCH_INVALIDATION_MESSAGE_TYPE, EVENT_HEADER_SIZE);
    encode_list(&mut message, &event.keys, |m, key| encode_data(m, key));
    encode_uuid_list(&mut message, &event.source_uuids);
    encode_uuid_list(&mut message, &event.partition_uuids);
    encode_long_list(&mut message, &event.sequences);
    message
}

/// Registers and removes near-cache invalidation listeners for one map.
#[derive(Debug, Clone)]
pub struct NearCacheInvalidationCodec {
    name: String,
}

impl NearCacheInvalidationCodec {
    /// Creates the codec for map `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Returns the map name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl ListenerCodec for NearCacheInvalidationCodec {
    fn encode_add_request(&self, local_only: bool) -> ClientMessage {
        encode_request(&self.name, INVALIDATION_LISTENER_FLAG, local_only)
    }

    fn decode_add_response(&self, response: &ClientMessage) -> Result<Uuid> {
        decode_response(response)
    }

    fn encode_remove_request(&self, registration_id: Uuid) -> ClientMessage {
        map_remove_entry_listener::encode_request(&self.name, registration_id)
    }

    fn decode_remove_response(&self, response: &ClientMessage) -> Result<bool> {
        map_remove_entry_listener::decode_response(response)
    }
}

/// Reads the map name from a registration request.
pub fn decode_request_name(message: &ClientMessage) -> Result<String> {
    let mut iter = message.frame_iter();
    iter.next_frame()?;
    decode_string(&mut iter)
}

/// Reads the listener flags and local-only bit from a registration request.
pub fn decode_request_flags(message: &ClientMessage) -> Result<(i32, bool)> {
    let content = initial_content(message, "near cache invalidation listener request")?;
    Ok((
        decode_int(content, REQUEST_LISTENER_FLAGS_OFFSET)?,
        decode_bool(content, REQUEST_LOCAL_ONLY_OFFSET)?,
    ))
}
