//! `Client.AddClusterViewListener`: subscribes to the member list and
//! partition table pushed by one member.

use hazelcast_wire::protocol::builtin::{
    decode_int, decode_int_list, decode_list, decode_uuid_list, encode_int, encode_int_list,
    encode_list, encode_uuid_list,
};
use hazelcast_wire::protocol::{
    ClientMessage, EVENT_HEADER_SIZE, INT_SIZE_IN_BYTES, PARTITION_ID_ANY,
};
use hazelcast_wire::{HazelcastError, Result};
use uuid::Uuid;

use super::custom::{decode_member_info, encode_member_info};
use super::{new_event, new_response};
use crate::listener::Member;

/// Request message type.
pub const REQUEST_MESSAGE_TYPE: i32 = 0x000300;
/// Response message type.
pub const RESPONSE_MESSAGE_TYPE: i32 = 0x000301;
/// Member list event type.
pub const EVENT_MEMBERS_VIEW_MESSAGE_TYPE: i32 = 0x000302;
/// Partition table event type.
pub const EVENT_PARTITIONS_VIEW_MESSAGE_TYPE: i32 = 0x000303;

const EVENT_VERSION_OFFSET: usize = EVENT_HEADER_SIZE;
const EVENT_INITIAL_FRAME_SIZE: usize = EVENT_VERSION_OFFSET + INT_SIZE_IN_BYTES;

/// A versioned member list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembersView {
    /// Version of the member list.
    pub version: i32,
    /// Members in join order.
    pub members: Vec<Member>,
}

/// A versioned partition table: owner uuid to owned partition ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionsView {
    /// Version of the partition table.
    pub version: i32,
    /// Partitions owned by each member.
    pub partitions: Vec<(Uuid, Vec<i32>)>,
}

/// Encodes the listener registration request.
pub fn encode_request() -> ClientMessage {
    ClientMessage::create_for_encode(REQUEST_MESSAGE_TYPE, PARTITION_ID_ANY)
}

/// Encodes the member's empty reply to the registration.
pub fn encode_response() -> ClientMessage {
    new_response(RESPONSE_MESSAGE_TYPE, 0)
}

fn decode_version(message: &ClientMessage) -> Result<i32> {
    let initial = message
        .initial_frame()
        .ok_or_else(|| HazelcastError::Decode("cluster view event has no initial frame".into()))?;
    decode_int(&initial.content, EVENT_VERSION_OFFSET)
}

/// Decodes a member list event.
pub fn decode_members_view(message: &ClientMessage) -> Result<MembersView> {
    let version = decode_version(message)?;
    let mut iter = message.frame_iter();
    iter.next_frame()?;
    let members = decode_list(&mut iter, decode_member_info)?;
    Ok(MembersView { version, members })
}

/// Decodes a partition table event.
pub fn decode_partitions_view(message: &ClientMessage) -> Result<PartitionsView> {
    let version = decode_version(message)?;
    let mut iter = message.frame_iter();
    iter.next_frame()?;
    let owned = decode_list(&mut iter, decode_int_list)?;
    let owners = decode_uuid_list(&mut iter)?;
    if owned.len() != owners.len() {
        return Err(HazelcastError::Decode(format!(
            "partition view has {} owners but {} partition lists",
            owners.len(),
            owned.len()
        )));
    }
    Ok(PartitionsView {
        version,
        partitions: owners.into_iter().zip(owned).collect(),
    })
}

/// Encodes a member list event, as a member pushes it.
pub fn encode_members_view(view: &MembersView) -> ClientMessage {
    let mut message = new_event(EVENT_MEMBERS_VIEW_MESSAGE_TYPE, EVENT_INITIAL_FRAME_SIZE);
    if let Some(initial) = message.initial_frame_mut() {
        encode_int(&mut initial.content, EVENT_VERSION_OFFSET, view.version);
    }
    encode_list(&mut message, &view.members, encode_member_info);
    message
}

/// Encodes a partition table event, as a member pushes it.
pub fn encode_partitions_view(view: &PartitionsView) -> ClientMessage {
    let mut message = new_event(EVENT_PARTITIONS_VIEW_MESSAGE_TYPE, EVENT_INITIAL_FRAME_SIZE);
    if let Some(initial) = message.initial_frame_mut() {
        encode_int(&mut initial.content, EVENT_VERSION_OFFSET, view.version);
    }
    encode_list(&mut message, &view.partitions, |m, (_, ids)| {
        encode_int_list(m, ids)
    });
    let owners: Vec<Uuid> = view.partitions.iter().map(|(uuid, _)| *uuid).collect();
    encode_uuid_list(&mut message, &owners);
    message
}
