//! Codecs for the composite types carried by the runtime's own messages.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};

use hazelcast_wire::protocol::builtin::{
    decode_bool, decode_byte, decode_int, decode_string, decode_string_map, decode_uuid,
    encode_bool, encode_byte, encode_int, encode_string, encode_string_map, encode_uuid,
    expect_begin,
};
use hazelcast_wire::protocol::{
    ClientMessage, ForwardFrameIterator, Frame, BOOLEAN_SIZE_IN_BYTES, BYTE_SIZE_IN_BYTES,
    DEFAULT_FLAGS, INT_SIZE_IN_BYTES, UUID_SIZE_IN_BYTES,
};
use hazelcast_wire::{HazelcastError, Result};

use crate::listener::{Member, MemberVersion};

const ADDRESS_PORT_OFFSET: usize = 0;
const ADDRESS_INITIAL_FRAME_SIZE: usize = ADDRESS_PORT_OFFSET + INT_SIZE_IN_BYTES;

const MEMBER_UUID_OFFSET: usize = 0;
const MEMBER_LITE_OFFSET: usize = MEMBER_UUID_OFFSET + UUID_SIZE_IN_BYTES;
const MEMBER_INITIAL_FRAME_SIZE: usize = MEMBER_LITE_OFFSET + BOOLEAN_SIZE_IN_BYTES;

const VERSION_MAJOR_OFFSET: usize = 0;
const VERSION_MINOR_OFFSET: usize = VERSION_MAJOR_OFFSET + BYTE_SIZE_IN_BYTES;
const VERSION_PATCH_OFFSET: usize = VERSION_MINOR_OFFSET + BYTE_SIZE_IN_BYTES;
const VERSION_INITIAL_FRAME_SIZE: usize = VERSION_PATCH_OFFSET + BYTE_SIZE_IN_BYTES;

/// Appends a host/port address structure.
pub fn encode_address(message: &mut ClientMessage, address: &SocketAddr) {
    message.add_frame(Frame::new_begin_frame());
    let mut initial = Frame::zeroed(ADDRESS_INITIAL_FRAME_SIZE, DEFAULT_FLAGS);
    encode_int(&mut initial.content, ADDRESS_PORT_OFFSET, i32::from(address.port()));
    message.add_frame(initial);
    encode_string(message, &address.ip().to_string());
    message.add_frame(Frame::new_end_frame());
}

/// Reads a host/port address structure.
///
/// Host names are resolved; literal IPs are parsed directly.
pub fn decode_address(iter: &mut ForwardFrameIterator<'_>) -> Result<SocketAddr> {
    expect_begin(iter)?;
    let port = decode_int(&iter.next_frame()?.content, ADDRESS_PORT_OFFSET)?;
    let host = decode_string(iter)?;
    iter.fast_forward_to_end_frame()?;

    let port = u16::try_from(port)
        .map_err(|_| HazelcastError::Decode(format!("invalid port {} for host {}", port, host)))?;
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    (host.as_str(), port)
        .to_socket_addrs()
        .map_err(|e| HazelcastError::Decode(format!("cannot resolve {}:{}: {}", host, port, e)))?
        .next()
        .ok_or_else(|| HazelcastError::Decode(format!("{}:{} resolved to nothing", host, port)))
}

fn encode_member_version(message: &mut ClientMessage, version: &MemberVersion) {
    message.add_frame(Frame::new_begin_frame());
    let mut initial = Frame::zeroed(VERSION_INITIAL_FRAME_SIZE, DEFAULT_FLAGS);
    encode_byte(&mut initial.content, VERSION_MAJOR_OFFSET, version.major);
    encode_byte(&mut initial.content, VERSION_MINOR_OFFSET, version.minor);
    encode_byte(&mut initial.content, VERSION_PATCH_OFFSET, version.patch);
    message.add_frame(initial);
    message.add_frame(Frame::new_end_frame());
}

fn decode_member_version(iter: &mut ForwardFrameIterator<'_>) -> Result<MemberVersion> {
    expect_begin(iter)?;
    let content = &iter.next_frame()?.content;
    let version = MemberVersion::new(
        decode_byte(content, VERSION_MAJOR_OFFSET)?,
        decode_byte(content, VERSION_MINOR_OFFSET)?,
        decode_byte(content, VERSION_PATCH_OFFSET)?,
    );
    iter.fast_forward_to_end_frame()?;
    Ok(version)
}

/// Appends a member-info structure.
pub fn encode_member_info(message: &mut ClientMessage, member: &Member) {
    message.add_frame(Frame::new_begin_frame());
    let mut initial = Frame::zeroed(MEMBER_INITIAL_FRAME_SIZE, DEFAULT_FLAGS);
    encode_uuid(&mut initial.content, MEMBER_UUID_OFFSET, Some(member.uuid));
    encode_bool(&mut initial.content, MEMBER_LITE_OFFSET, member.lite_member);
    message.add_frame(initial);
    encode_address(message, &member.address);
    encode_string_map(message, &member.attributes);
    encode_member_version(message, &member.version);
    message.add_frame(Frame::new_end_frame());
}

/// Reads a member-info structure. Fields added by newer members are skipped.
pub fn decode_member_info(iter: &mut ForwardFrameIterator<'_>) -> Result<Member> {
    expect_begin(iter)?;
    let content = &iter.next_frame()?.content;
    let uuid = decode_uuid(content, MEMBER_UUID_OFFSET)?
        .ok_or_else(|| HazelcastError::Decode("member info without a uuid".to_string()))?;
    let lite_member = decode_bool(content, MEMBER_LITE_OFFSET)?;
    let address = decode_address(iter)?;
    let attributes = decode_string_map(iter)?;
    let version = decode_member_version(iter)?;
    iter.fast_forward_to_end_frame()?;
    Ok(Member::with_attributes(
        uuid,
        address,
        attributes,
        lite_member,
        version,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use hazelcast_wire::protocol::builtin::{decode_list, encode_list};
    use hazelcast_wire::protocol::PARTITION_ID_ANY;
    use std::collections::HashMap;
    use uuid::Uuid;

    #[test]
    fn test_member_list_roundtrip() {
        let mut attrs = HashMap::new();
        attrs.insert("zone".to_string(), "a".to_string());
        let members = vec![
            Member::with_attributes(
                Uuid::new_v4(),
                "10.0.0.1:5701".parse().unwrap(),
                attrs,
                false,
                MemberVersion::new(5, 3, 2),
            ),
            Member::new(Uuid::new_v4(), "[::1]:5702".parse().unwrap()),
        ];

        let mut message = ClientMessage::create_for_encode(1, PARTITION_ID_ANY);
        encode_list(&mut message, &members, encode_member_info);
        encode_string(&mut message, "trailer");

        let mut iter = message.frame_iter();
        iter.next_frame().unwrap();
        let decoded = decode_list(&mut iter, decode_member_info).unwrap();
        assert_eq!(decoded, members);
        assert_eq!(decoded[0].attributes.get("zone").map(String::as_str), Some("a"));
        assert_eq!(decoded[0].version, MemberVersion::new(5, 3, 2));
        assert_eq!(decode_string(&mut iter).unwrap(), "trailer");
    }

    #[test]
    fn test_member_info_skips_unknown_trailing_fields() {
        let member = Member::new(Uuid::new_v4(), "10.0.0.2:5701".parse().unwrap());
        let mut message = ClientMessage::create_for_encode(1, PARTITION_ID_ANY);
        encode_member_info(&mut message, &member);
        // Simulate a newer member appending a field inside the structure.
        let mut frames = message.into_frames();
        let end = frames.pop().unwrap();
        frames.push(Frame::with_content(BytesMut::from(&b"extra"[..])));
        frames.push(end);
        let message = ClientMessage::from_frames(frames);

        let mut iter = message.frame_iter();
        iter.next_frame().unwrap();
        assert_eq!(decode_member_info(&mut iter).unwrap(), member);
        assert!(!iter.has_next());
    }

    #[test]
    fn test_invalid_port_is_decode_error() {
        let mut message = ClientMessage::create_for_encode(1, PARTITION_ID_ANY);
        message.add_frame(Frame::new_begin_frame());
        let mut initial = Frame::zeroed(ADDRESS_INITIAL_FRAME_SIZE, DEFAULT_FLAGS);
        encode_int(&mut initial.content, 0, 70_000);
        message.add_frame(initial);
        encode_string(&mut message, "127.0.0.1");
        message.add_frame(Frame::new_end_frame());

        let mut iter = message.frame_iter();
        iter.next_frame().unwrap();
        assert!(matches!(
            decode_address(&mut iter),
            Err(HazelcastError::Decode(_))
        ));
    }
}
