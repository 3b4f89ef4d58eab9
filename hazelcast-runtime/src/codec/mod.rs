//! Codecs for the protocol operations the runtime issues on its own behalf.
//!
//! Every codec module exposes the request encoder and response decoder a
//! client needs, plus the member-side counterparts used by mock members in
//! tests. Data-structure codecs live outside this crate.

pub mod client_add_cluster_view_listener;
pub mod client_authentication;
pub mod client_ping;
pub mod custom;
pub mod map_add_near_cache_invalidation_listener;
pub mod map_remove_entry_listener;

use bytes::BytesMut;
use hazelcast_wire::protocol::{
    ClientMessage, Frame, IS_EVENT_FLAG, PARTITION_ID_ANY, RESPONSE_HEADER_SIZE,
    UNFRAGMENTED_MESSAGE,
};
use hazelcast_wire::{HazelcastError, Result};

/// Returns the content of the initial frame, or a decode error naming the
/// message kind.
pub(crate) fn initial_content<'a>(message: &'a ClientMessage, what: &str) -> Result<&'a BytesMut> {
    message
        .initial_frame()
        .map(|frame| &frame.content)
        .ok_or_else(|| HazelcastError::Decode(format!("{} has no initial frame", what)))
}

/// Creates a response whose initial frame holds `initial_frame_size` bytes.
pub(crate) fn new_response(message_type: i32, initial_frame_size: usize) -> ClientMessage {
    let size = initial_frame_size.max(RESPONSE_HEADER_SIZE);
    let mut message =
        ClientMessage::from_frames(vec![Frame::zeroed(size, UNFRAGMENTED_MESSAGE)]);
    message.set_message_type(message_type);
    message
}

/// Creates a push event whose initial frame holds `initial_frame_size` bytes.
pub(crate) fn new_event(message_type: i32, initial_frame_size: usize) -> ClientMessage {
    let mut message = ClientMessage::create_with_initial_frame_size(
        message_type,
        PARTITION_ID_ANY,
        initial_frame_size,
    );
    message.add_initial_flags(IS_EVENT_FLAG);
    message
}
