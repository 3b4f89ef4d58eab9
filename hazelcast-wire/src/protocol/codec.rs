//! Codec implementation for encoding/decoding Hazelcast protocol messages.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::constants::*;
use super::fragment::{self, FragmentAssembler};
use super::frame::{ByteOrder, Frame};
use super::ClientMessage;
use crate::error::{HazelcastError, Result};

/// Codec for encoding and decoding Hazelcast client messages.
///
/// Implements the `tokio_util::codec::{Encoder, Decoder}` traits for use
/// with tokio's framed I/O. One codec instance belongs to one connection.
///
/// Decoded items are themselves results: a malformed message yields
/// `Some(Err(HazelcastError::Decode(_)))` and decoding continues with the
/// next message. An `Err` returned from [`Decoder::decode`] means the byte
/// stream can no longer be framed and the connection must be dropped.
#[derive(Debug)]
pub struct ClientMessageCodec {
    byte_order: ByteOrder,
    max_frame_size: usize,
    fragmentation_threshold: usize,
    next_fragment_id: i64,
    /// Frames accumulated while decoding a multi-frame message.
    pending_frames: Vec<Frame>,
    /// Set when a frame of the current message could not be read.
    malformed: Option<String>,
    assembler: FragmentAssembler,
}

impl ClientMessageCodec {
    /// Creates a little-endian codec with default limits.
    pub fn new() -> Self {
        Self::with_byte_order(ByteOrder::Little)
    }

    /// Creates a codec using the given envelope byte order.
    pub fn with_byte_order(byte_order: ByteOrder) -> Self {
        Self {
            byte_order,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            fragmentation_threshold: usize::MAX,
            next_fragment_id: 0,
            pending_frames: Vec::new(),
            malformed: None,
            assembler: FragmentAssembler::new(),
        }
    }

    /// Sets the largest frame accepted from the wire.
    pub fn max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Sets the wire size above which outgoing messages are fragmented.
    pub fn fragmentation_threshold(mut self, threshold: usize) -> Self {
        self.fragmentation_threshold = threshold;
        self
    }

    /// Returns the envelope byte order of this codec.
    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    fn finish_message(&mut self) -> Option<Result<ClientMessage>> {
        let frames = std::mem::take(&mut self.pending_frames);
        if let Some(reason) = self.malformed.take() {
            return Some(Err(HazelcastError::Decode(reason)));
        }

        match self.assembler.accept(ClientMessage::from_frames(frames)) {
            Ok(Some(message)) => Some(message.validate().map(|_| message)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

impl Default for ClientMessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder<ClientMessage> for ClientMessageCodec {
    type Error = HazelcastError;

    fn encode(&mut self, item: ClientMessage, dst: &mut BytesMut) -> Result<()> {
        if item.is_empty() {
            return Err(HazelcastError::IllegalState(
                "cannot encode empty message".to_string(),
            ));
        }

        if item.wire_size() <= self.fragmentation_threshold {
            item.write_to(dst, self.byte_order);
            return Ok(());
        }

        self.next_fragment_id += 1;
        let fragments = fragment::split(item, self.fragmentation_threshold, self.next_fragment_id);
        tracing::trace!(
            fragment_id = self.next_fragment_id,
            fragments = fragments.len(),
            "fragmenting outgoing message"
        );
        for fragment in &fragments {
            fragment.write_to(dst, self.byte_order);
        }
        Ok(())
    }
}

impl Decoder for ClientMessageCodec {
    type Item = Result<ClientMessage>;
    type Error = HazelcastError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            let Some(header) = Frame::peek_header(src, self.byte_order) else {
                return Ok(None);
            };

            if header.length > self.max_frame_size {
                return Err(HazelcastError::Decode(format!(
                    "frame length {} exceeds the maximum of {}",
                    header.length, self.max_frame_size
                )));
            }

            if header.is_impossible() {
                src.advance(FRAME_HEADER_SIZE);
                self.malformed.get_or_insert_with(|| {
                    format!(
                        "frame length {} is shorter than the {}-byte header",
                        header.length, FRAME_HEADER_SIZE
                    )
                });
                if header.flags & IS_FINAL_FLAG != 0 {
                    if let Some(item) = self.finish_message() {
                        return Ok(Some(item));
                    }
                }
                continue;
            }

            if src.len() < header.length {
                src.reserve(header.length - src.len());
                return Ok(None);
            }

            let Some(frame) = Frame::read_from_with_order(src, self.byte_order)? else {
                return Ok(None);
            };

            let is_final = frame.is_final_frame();
            self.pending_frames.push(frame);

            if is_final {
                if let Some(item) = self.finish_message() {
                    return Ok(Some(item));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    fn create_simple_message(message_type: i32) -> ClientMessage {
        let mut message = ClientMessage::create_for_encode(message_type, PARTITION_ID_ANY);
        message.set_correlation_id(11);
        message
    }

    fn decode_one(codec: &mut ClientMessageCodec, buf: &mut BytesMut) -> Result<ClientMessage> {
        codec.decode(buf).unwrap().unwrap()
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut codec = ClientMessageCodec::new();
        let original = create_simple_message(0x000100);

        let mut buf = BytesMut::new();
        codec.encode(original.clone(), &mut buf).unwrap();

        let decoded = decode_one(&mut codec, &mut buf).unwrap();
        assert_eq!(decoded.message_type(), Some(0x000100));
        assert_eq!(decoded.correlation_id(), Some(11));
        assert_eq!(decoded.partition_id(), Some(PARTITION_ID_ANY));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_encode_empty_message_fails() {
        let mut codec = ClientMessageCodec::new();
        let mut buf = BytesMut::new();
        assert!(codec.encode(ClientMessage::new(), &mut buf).is_err());
    }

    #[test]
    fn test_decode_incomplete_header() {
        let mut codec = ClientMessageCodec::new();
        let mut buf = BytesMut::from(&[0x01, 0x02][..]);

        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_partial_then_complete_decode() {
        let mut codec = ClientMessageCodec::new();
        let mut full = BytesMut::new();
        let mut message = create_simple_message(0x000200);
        message.add_frame(Frame::with_content(BytesMut::from(&b"payload"[..])));
        codec.encode(message, &mut full).unwrap();

        let tail = full.split_off(10);
        let mut buf = full;
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&tail);
        let decoded = decode_one(&mut codec, &mut buf).unwrap();
        assert_eq!(decoded.frame_count(), 2);
        assert_eq!(&decoded.frames()[1].content[..], b"payload");
    }

    #[test]
    fn test_decode_multiple_messages() {
        let mut codec = ClientMessageCodec::new();
        let mut buf = BytesMut::new();
        for message_type in [1, 2, 3] {
            codec
                .encode(create_simple_message(message_type), &mut buf)
                .unwrap();
        }

        for expected in [1, 2, 3] {
            let decoded = decode_one(&mut codec, &mut buf).unwrap();
            assert_eq!(decoded.message_type(), Some(expected));
        }
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_unbalanced_message_is_isolated() {
        let mut codec = ClientMessageCodec::new();
        let mut buf = BytesMut::new();

        let mut broken = create_simple_message(5);
        broken.add_frame(Frame::new_begin_frame());
        codec.encode(broken, &mut buf).unwrap();
        codec.encode(create_simple_message(6), &mut buf).unwrap();

        let first = decode_one(&mut codec, &mut buf);
        assert!(matches!(first, Err(HazelcastError::Decode(_))));

        let second = decode_one(&mut codec, &mut buf).unwrap();
        assert_eq!(second.message_type(), Some(6));
    }

    #[test]
    fn test_impossible_frame_length_is_isolated() {
        let mut codec = ClientMessageCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32_le(2);
        buf.put_u16_le(UNFRAGMENTED_MESSAGE | IS_FINAL_FLAG);
        codec.encode(create_simple_message(8), &mut buf).unwrap();

        assert!(matches!(
            decode_one(&mut codec, &mut buf),
            Err(HazelcastError::Decode(_))
        ));
        assert_eq!(
            decode_one(&mut codec, &mut buf).unwrap().message_type(),
            Some(8)
        );
    }

    #[test]
    fn test_oversized_frame_is_fatal() {
        let mut codec = ClientMessageCodec::new().max_frame_size(64);
        let mut buf = BytesMut::new();
        buf.put_u32_le(1024);
        buf.put_u16_le(0);

        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_fragmented_roundtrip() {
        let mut writer = ClientMessageCodec::new().fragmentation_threshold(128);
        let mut reader = ClientMessageCodec::new();

        let mut message = create_simple_message(0x010100);
        for i in 0..8u8 {
            message.add_frame(Frame::with_content(BytesMut::from(&[i; 40][..])));
        }

        let mut buf = BytesMut::new();
        writer.encode(message.clone(), &mut buf).unwrap();
        assert!(buf.len() > message.wire_size());

        let decoded = decode_one(&mut reader, &mut buf).unwrap();
        assert_eq!(decoded.frame_count(), message.frame_count());
        assert_eq!(decoded.correlation_id(), Some(11));
        for (a, b) in decoded.frames().iter().zip(message.frames()) {
            assert_eq!(a.content, b.content);
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_big_endian_codec_roundtrip() {
        let mut codec = ClientMessageCodec::with_byte_order(ByteOrder::Big);
        let mut buf = BytesMut::new();
        codec.encode(create_simple_message(9), &mut buf).unwrap();
        assert_eq!(&buf[..4], &22u32.to_be_bytes());

        let decoded = decode_one(&mut codec, &mut buf).unwrap();
        assert_eq!(decoded.message_type(), Some(9));
    }

    #[test]
    fn test_codec_is_reusable() {
        let mut codec = ClientMessageCodec::new();
        for round in 0..3 {
            let mut buf = BytesMut::new();
            codec.encode(create_simple_message(round), &mut buf).unwrap();
            let decoded = decode_one(&mut codec, &mut buf).unwrap();
            assert_eq!(decoded.message_type(), Some(round));
        }
    }
}
