//! Built-in codecs for the field types shared by all protocol messages.
//!
//! Fixed-size fields are packed into a frame's content at known offsets and
//! are always little-endian. Variable-size fields occupy frames of their own;
//! composite values are wrapped in BEGIN/END frames and absent nullable
//! values are written as a single NULL frame.

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

use super::client_message::{ClientMessage, ForwardFrameIterator};
use super::constants::*;
use super::frame::Frame;
use crate::error::{HazelcastError, Result};

/// Serialized bytes of a key or value, opaque to the runtime.
pub type Data = Bytes;

fn slice(content: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    content.get(offset..offset + len).ok_or_else(|| {
        HazelcastError::Decode(format!(
            "field at offset {} needs {} bytes, frame holds {}",
            offset,
            len,
            content.len()
        ))
    })
}

fn put(content: &mut [u8], offset: usize, bytes: &[u8]) {
    if let Some(slot) = content.get_mut(offset..offset + bytes.len()) {
        slot.copy_from_slice(bytes);
    }
}

/// Writes a boolean at `offset`.
pub fn encode_bool(content: &mut [u8], offset: usize, value: bool) {
    put(content, offset, &[u8::from(value)]);
}

/// Reads a boolean at `offset`.
pub fn decode_bool(content: &[u8], offset: usize) -> Result<bool> {
    Ok(slice(content, offset, BOOLEAN_SIZE_IN_BYTES)?[0] != 0)
}

/// Writes a byte at `offset`.
pub fn encode_byte(content: &mut [u8], offset: usize, value: u8) {
    put(content, offset, &[value]);
}

/// Reads a byte at `offset`.
pub fn decode_byte(content: &[u8], offset: usize) -> Result<u8> {
    Ok(slice(content, offset, BYTE_SIZE_IN_BYTES)?[0])
}

/// Writes an int at `offset`.
pub fn encode_int(content: &mut [u8], offset: usize, value: i32) {
    put(content, offset, &value.to_le_bytes());
}

/// Reads an int at `offset`.
pub fn decode_int(content: &[u8], offset: usize) -> Result<i32> {
    let bytes = slice(content, offset, INT_SIZE_IN_BYTES)?;
    Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Writes a long at `offset`.
pub fn encode_long(content: &mut [u8], offset: usize, value: i64) {
    put(content, offset, &value.to_le_bytes());
}

/// Reads a long at `offset`.
pub fn decode_long(content: &[u8], offset: usize) -> Result<i64> {
    let bytes = slice(content, offset, LONG_SIZE_IN_BYTES)?;
    let mut raw = [0u8; LONG_SIZE_IN_BYTES];
    raw.copy_from_slice(bytes);
    Ok(i64::from_le_bytes(raw))
}

/// Writes a nullable UUID at `offset`: a null marker, then the most and
/// least significant halves.
pub fn encode_uuid(content: &mut [u8], offset: usize, value: Option<Uuid>) {
    encode_bool(content, offset, value.is_none());
    if let Some(uuid) = value {
        let (msb, lsb) = uuid.as_u64_pair();
        encode_long(content, offset + BOOLEAN_SIZE_IN_BYTES, msb as i64);
        encode_long(
            content,
            offset + BOOLEAN_SIZE_IN_BYTES + LONG_SIZE_IN_BYTES,
            lsb as i64,
        );
    }
}

/// Reads a nullable UUID at `offset`.
pub fn decode_uuid(content: &[u8], offset: usize) -> Result<Option<Uuid>> {
    if decode_bool(content, offset)? {
        return Ok(None);
    }
    let msb = decode_long(content, offset + BOOLEAN_SIZE_IN_BYTES)?;
    let lsb = decode_long(content, offset + BOOLEAN_SIZE_IN_BYTES + LONG_SIZE_IN_BYTES)?;
    Ok(Some(Uuid::from_u64_pair(msb as u64, lsb as u64)))
}

/// Appends a UTF-8 string frame.
pub fn encode_string(message: &mut ClientMessage, value: &str) {
    message.add_frame(Frame::with_content(BytesMut::from(value.as_bytes())));
}

/// Reads a UTF-8 string frame.
pub fn decode_string(iter: &mut ForwardFrameIterator<'_>) -> Result<String> {
    let frame = iter.next_frame()?;
    String::from_utf8(frame.content.to_vec())
        .map_err(|e| HazelcastError::Decode(format!("invalid UTF-8 in string field: {}", e)))
}

/// Appends a frame holding serialized data.
pub fn encode_data(message: &mut ClientMessage, value: &[u8]) {
    message.add_frame(Frame::with_content(BytesMut::from(value)));
}

/// Reads a frame holding serialized data.
pub fn decode_data(iter: &mut ForwardFrameIterator<'_>) -> Result<Data> {
    Ok(Bytes::copy_from_slice(&iter.next_frame()?.content))
}

/// Serializer type id of a string.
pub const STRING_TYPE_ID: i32 = -11;

/// Serializes a string the way members do: a data header with no explicit
/// partition hash, then the big-endian UTF-8 length and the bytes.
///
/// Members route by object name through this form, so partition lookups for
/// a name must hash it rather than the raw string.
pub fn string_data(value: &str) -> Data {
    let mut buf = BytesMut::with_capacity(12 + value.len());
    buf.put_i32(0);
    buf.put_i32(STRING_TYPE_ID);
    buf.put_i32(value.len() as i32);
    buf.put_slice(value.as_bytes());
    buf.freeze()
}

/// Appends a single frame packing all ints.
pub fn encode_int_list(message: &mut ClientMessage, values: &[i32]) {
    let mut frame = Frame::zeroed(values.len() * INT_SIZE_IN_BYTES, DEFAULT_FLAGS);
    for (i, value) in values.iter().enumerate() {
        encode_int(&mut frame.content, i * INT_SIZE_IN_BYTES, *value);
    }
    message.add_frame(frame);
}

/// Reads a frame packing ints.
pub fn decode_int_list(iter: &mut ForwardFrameIterator<'_>) -> Result<Vec<i32>> {
    let content = &iter.next_frame()?.content;
    (0..content.len() / INT_SIZE_IN_BYTES)
        .map(|i| decode_int(content, i * INT_SIZE_IN_BYTES))
        .collect()
}

/// Appends a single frame packing all longs.
pub fn encode_long_list(message: &mut ClientMessage, values: &[i64]) {
    let mut frame = Frame::zeroed(values.len() * LONG_SIZE_IN_BYTES, DEFAULT_FLAGS);
    for (i, value) in values.iter().enumerate() {
        encode_long(&mut frame.content, i * LONG_SIZE_IN_BYTES, *value);
    }
    message.add_frame(frame);
}

/// Reads a frame packing longs.
pub fn decode_long_list(iter: &mut ForwardFrameIterator<'_>) -> Result<Vec<i64>> {
    let content = &iter.next_frame()?.content;
    (0..content.len() / LONG_SIZE_IN_BYTES)
        .map(|i| decode_long(content, i * LONG_SIZE_IN_BYTES))
        .collect()
}

/// Appends a single frame packing all UUIDs.
pub fn encode_uuid_list(message: &mut ClientMessage, values: &[Uuid]) {
    let mut frame = Frame::zeroed(values.len() * UUID_SIZE_IN_BYTES, DEFAULT_FLAGS);
    for (i, value) in values.iter().enumerate() {
        encode_uuid(&mut frame.content, i * UUID_SIZE_IN_BYTES, Some(*value));
    }
    message.add_frame(frame);
}

/// Reads a frame packing UUIDs. Null entries are dropped.
pub fn decode_uuid_list(iter: &mut ForwardFrameIterator<'_>) -> Result<Vec<Uuid>> {
    let content = &iter.next_frame()?.content;
    let mut values = Vec::with_capacity(content.len() / UUID_SIZE_IN_BYTES);
    for i in 0..content.len() / UUID_SIZE_IN_BYTES {
        if let Some(uuid) = decode_uuid(content, i * UUID_SIZE_IN_BYTES)? {
            values.push(uuid);
        }
    }
    Ok(values)
}

/// Appends a list of variable-size items between BEGIN and END frames.
pub fn encode_list<T>(
    message: &mut ClientMessage,
    items: &[T],
    mut encode: impl FnMut(&mut ClientMessage, &T),
) {
    message.add_frame(Frame::new_begin_frame());
    for item in items {
        encode(message, item);
    }
    message.add_frame(Frame::new_end_frame());
}

/// Reads a list of variable-size items delimited by BEGIN and END frames.
pub fn decode_list<'a, T>(
    iter: &mut ForwardFrameIterator<'a>,
    mut decode: impl FnMut(&mut ForwardFrameIterator<'a>) -> Result<T>,
) -> Result<Vec<T>> {
    expect_begin(iter)?;
    let mut items = Vec::new();
    while !iter.next_is_end_frame() {
        if !iter.has_next() {
            return Err(HazelcastError::Decode("list is missing its END frame".to_string()));
        }
        items.push(decode(iter)?);
    }
    iter.next_frame()?;
    Ok(items)
}

/// Appends string key/value pairs as an entry list.
pub fn encode_string_map(message: &mut ClientMessage, entries: &HashMap<String, String>) {
    message.add_frame(Frame::new_begin_frame());
    let mut sorted: Vec<_> = entries.iter().collect();
    sorted.sort();
    for (key, value) in sorted {
        encode_string(message, key);
        encode_string(message, value);
    }
    message.add_frame(Frame::new_end_frame());
}

/// Reads an entry list of string key/value pairs.
pub fn decode_string_map(iter: &mut ForwardFrameIterator<'_>) -> Result<HashMap<String, String>> {
    expect_begin(iter)?;
    let mut entries = HashMap::new();
    while !iter.next_is_end_frame() {
        let key = decode_string(iter)?;
        let value = decode_string(iter)?;
        entries.insert(key, value);
    }
    iter.next_frame()?;
    Ok(entries)
}

/// Appends `value` with `encode`, or a NULL frame if absent.
pub fn encode_nullable<T: ?Sized>(
    message: &mut ClientMessage,
    value: Option<&T>,
    encode: impl FnOnce(&mut ClientMessage, &T),
) {
    match value {
        Some(value) => encode(message, value),
        None => message.add_frame(Frame::new_null_frame()),
    }
}

/// Reads a value with `decode` unless the next frame is a NULL frame.
pub fn decode_nullable<'a, T>(
    iter: &mut ForwardFrameIterator<'a>,
    decode: impl FnOnce(&mut ForwardFrameIterator<'a>) -> Result<T>,
) -> Result<Option<T>> {
    if iter.next_is_null_frame() {
        return Ok(None);
    }
    decode(iter).map(Some)
}

/// Consumes the BEGIN frame of a nested structure.
pub fn expect_begin(iter: &mut ForwardFrameIterator<'_>) -> Result<()> {
    if iter.next_frame()?.is_begin_frame() {
        Ok(())
    } else {
        Err(HazelcastError::Decode(
            "expected a BEGIN frame at the start of a nested structure".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::client_message::{compute_partition_hash, data_partition_hash};

    #[derive(Debug, Clone, PartialEq)]
    struct Address {
        host: String,
        port: i32,
    }

    fn encode_address(message: &mut ClientMessage, address: &Address) {
        message.add_frame(Frame::new_begin_frame());
        let mut initial = Frame::zeroed(INT_SIZE_IN_BYTES, DEFAULT_FLAGS);
        encode_int(&mut initial.content, 0, address.port);
        message.add_frame(initial);
        encode_string(message, &address.host);
        message.add_frame(Frame::new_end_frame());
    }

    fn decode_address(iter: &mut ForwardFrameIterator<'_>) -> Result<Address> {
        expect_begin(iter)?;
        let port = decode_int(&iter.next_frame()?.content, 0)?;
        let host = decode_string(iter)?;
        iter.fast_forward_to_end_frame()?;
        Ok(Address { host, port })
    }

    fn request() -> ClientMessage {
        ClientMessage::create_with_initial_frame_size(
            0x000100,
            PARTITION_ID_ANY,
            REQUEST_HEADER_SIZE + UUID_SIZE_IN_BYTES + LONG_SIZE_IN_BYTES,
        )
    }

    #[test]
    fn test_composite_roundtrip_leaves_cursor_at_end() {
        let uuid = Uuid::new_v4();
        let addresses = vec![
            Address { host: "10.0.0.1".into(), port: 5701 },
            Address { host: "10.0.0.2".into(), port: 5702 },
        ];
        let mut attributes = HashMap::new();
        attributes.insert("zone".to_string(), "a".to_string());

        let mut message = request();
        let initial = message.initial_frame_mut().unwrap();
        encode_uuid(&mut initial.content, REQUEST_HEADER_SIZE, Some(uuid));
        encode_long(
            &mut initial.content,
            REQUEST_HEADER_SIZE + UUID_SIZE_IN_BYTES,
            -5,
        );
        encode_string(&mut message, "dev");
        encode_nullable(&mut message, None::<&str>, encode_string);
        encode_nullable(&mut message, Some("secret"), encode_string);
        encode_list(&mut message, &addresses, encode_address);
        encode_nullable(&mut message, None::<&Address>, encode_address);
        encode_string_map(&mut message, &attributes);
        encode_long_list(&mut message, &[1, -2, i64::MAX]);
        encode_uuid_list(&mut message, &[uuid]);
        encode_int_list(&mut message, &[7, 8]);
        encode_data(&mut message, b"\x00\x01\x02");

        let mut iter = message.frame_iter();
        let initial = iter.next_frame().unwrap();
        assert_eq!(decode_uuid(&initial.content, REQUEST_HEADER_SIZE).unwrap(), Some(uuid));
        assert_eq!(
            decode_long(&initial.content, REQUEST_HEADER_SIZE + UUID_SIZE_IN_BYTES).unwrap(),
            -5
        );
        assert_eq!(decode_string(&mut iter).unwrap(), "dev");
        assert_eq!(decode_nullable(&mut iter, decode_string).unwrap(), None);
        assert_eq!(
            decode_nullable(&mut iter, decode_string).unwrap().as_deref(),
            Some("secret")
        );
        assert_eq!(decode_list(&mut iter, decode_address).unwrap(), addresses);
        assert_eq!(decode_nullable(&mut iter, decode_address).unwrap(), None);
        assert_eq!(decode_string_map(&mut iter).unwrap(), attributes);
        assert_eq!(decode_long_list(&mut iter).unwrap(), vec![1, -2, i64::MAX]);
        assert_eq!(decode_uuid_list(&mut iter).unwrap(), vec![uuid]);
        assert_eq!(decode_int_list(&mut iter).unwrap(), vec![7, 8]);
        assert_eq!(&decode_data(&mut iter).unwrap()[..], b"\x00\x01\x02");
        assert!(!iter.has_next());
        assert_eq!(iter.position(), message.frame_count());
    }

    #[test]
    fn test_decoder_tolerates_trailing_fields_in_structs() {
        // A newer peer appends a nested field the decoder does not know.
        let mut message = request();
        message.add_frame(Frame::new_begin_frame());
        let mut initial = Frame::zeroed(INT_SIZE_IN_BYTES, DEFAULT_FLAGS);
        encode_int(&mut initial.content, 0, 5701);
        message.add_frame(initial);
        encode_string(&mut message, "host");
        encode_list(&mut message, &["x", "y"], |m, s| encode_string(m, s));
        message.add_frame(Frame::new_end_frame());
        encode_string(&mut message, "after");

        let mut iter = message.frame_iter();
        iter.next_frame().unwrap();
        let address = decode_address(&mut iter).unwrap();
        assert_eq!(address.port, 5701);
        assert_eq!(decode_string(&mut iter).unwrap(), "after");
    }

    #[test]
    fn test_null_uuid() {
        let mut content = vec![0u8; UUID_SIZE_IN_BYTES];
        encode_uuid(&mut content, 0, None);
        assert_eq!(decode_uuid(&content, 0).unwrap(), None);
    }

    #[test]
    fn test_fixed_field_out_of_bounds() {
        let content = [0u8; 3];
        assert!(matches!(
            decode_int(&content, 0),
            Err(HazelcastError::Decode(_))
        ));
        assert!(decode_long(&content, 0).is_err());
        assert!(decode_bool(&content, 3).is_err());
    }

    #[test]
    fn test_invalid_utf8_is_decode_error() {
        let mut message = request();
        message.add_frame(Frame::with_content(BytesMut::from(&[0xff, 0xfe][..])));
        let mut iter = message.frame_iter();
        iter.next_frame().unwrap();
        assert!(matches!(
            decode_string(&mut iter),
            Err(HazelcastError::Decode(_))
        ));
    }

    #[test]
    fn test_unterminated_list_is_decode_error() {
        let mut message = request();
        message.add_frame(Frame::new_begin_frame());
        encode_string(&mut message, "a");

        let mut iter = message.frame_iter();
        iter.next_frame().unwrap();
        assert!(decode_list(&mut iter, decode_string).is_err());
    }

    #[test]
    fn test_string_data_layout() {
        let data = string_data("orders");
        assert_eq!(&data[..4], &[0, 0, 0, 0]);
        assert_eq!(&data[4..8], &STRING_TYPE_ID.to_be_bytes());
        assert_eq!(&data[8..12], &6i32.to_be_bytes());
        assert_eq!(&data[12..], b"orders");
        assert_eq!(
            data_partition_hash(&data),
            compute_partition_hash(&data[8..])
        );
    }
}
