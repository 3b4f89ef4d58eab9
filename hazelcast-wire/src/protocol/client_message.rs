//! ClientMessage type for multi-frame Hazelcast protocol messages.

use bytes::BytesMut;

use super::constants::*;
use super::frame::{ByteOrder, Frame};
use crate::error::{HazelcastError, Result};

/// A client message composed of one or more frames.
///
/// The first frame is the "initial frame" containing the message header
/// (type, correlation ID, partition ID or backup acks). Additional frames
/// contain the message payload, decoded positionally with a
/// [`ForwardFrameIterator`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientMessage {
    frames: Vec<Frame>,
}

impl ClientMessage {
    /// Creates a new empty client message.
    pub fn new() -> Self {
        Self { frames: Vec::new() }
    }

    /// Creates a request message with the given type and partition ID.
    ///
    /// The correlation ID is left at zero; it is assigned when the message
    /// is invoked.
    pub fn create_for_encode(message_type: i32, partition_id: i32) -> Self {
        Self::create_with_initial_frame_size(message_type, partition_id, REQUEST_HEADER_SIZE)
    }

    /// Creates a request message whose initial frame has room for fixed-size
    /// parameters after the header.
    pub fn create_with_initial_frame_size(
        message_type: i32,
        partition_id: i32,
        initial_frame_size: usize,
    ) -> Self {
        let size = initial_frame_size.max(REQUEST_HEADER_SIZE);
        let mut message = Self {
            frames: vec![Frame::zeroed(size, UNFRAGMENTED_MESSAGE)],
        };
        message.set_message_type(message_type);
        message.set_partition_id(partition_id);
        message
    }

    /// Creates a client message from received frames.
    pub fn from_frames(frames: Vec<Frame>) -> Self {
        Self { frames }
    }

    fn read_header<const N: usize>(&self, offset: usize) -> Option<[u8; N]> {
        let frame = self.frames.first()?;
        let bytes = frame.content.get(offset..offset + N)?;
        bytes.try_into().ok()
    }

    fn write_header(&mut self, offset: usize, bytes: &[u8]) {
        if let Some(frame) = self.frames.first_mut() {
            if let Some(slot) = frame.content.get_mut(offset..offset + bytes.len()) {
                slot.copy_from_slice(bytes);
            }
        }
    }

    /// Returns the message type from the initial frame.
    ///
    /// Returns `None` if there is no initial frame or if the frame content
    /// is too short to contain a message type field.
    pub fn message_type(&self) -> Option<i32> {
        self.read_header(TYPE_FIELD_OFFSET).map(i32::from_le_bytes)
    }

    /// Sets the message type in the initial frame.
    pub fn set_message_type(&mut self, message_type: i32) {
        self.write_header(TYPE_FIELD_OFFSET, &message_type.to_le_bytes());
    }

    /// Returns the correlation ID from the initial frame.
    pub fn correlation_id(&self) -> Option<i64> {
        self.read_header(CORRELATION_ID_OFFSET).map(i64::from_le_bytes)
    }

    /// Sets the correlation ID in the initial frame.
    pub fn set_correlation_id(&mut self, correlation_id: i64) {
        self.write_header(CORRELATION_ID_OFFSET, &correlation_id.to_le_bytes());
    }

    /// Returns the partition ID from the initial frame (requests and events).
    pub fn partition_id(&self) -> Option<i32> {
        self.read_header(PARTITION_ID_OFFSET).map(i32::from_le_bytes)
    }

    /// Sets the partition ID in the initial frame.
    pub fn set_partition_id(&mut self, partition_id: i32) {
        self.write_header(PARTITION_ID_OFFSET, &partition_id.to_le_bytes());
    }

    /// Returns the number of backup acknowledgements a response expects.
    pub fn backup_acks(&self) -> Option<u8> {
        self.read_header::<1>(RESPONSE_BACKUP_ACKS_OFFSET).map(|b| b[0])
    }

    /// Sets flag bits on the initial frame.
    pub fn add_initial_flags(&mut self, flags: u16) {
        if let Some(frame) = self.frames.first_mut() {
            frame.flags |= flags;
        }
    }

    /// Adds a frame to the message.
    pub fn add_frame(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    /// Returns a reference to the initial (first) frame, if present.
    pub fn initial_frame(&self) -> Option<&Frame> {
        self.frames.first()
    }

    /// Returns the initial frame for writing fixed-size parameters.
    pub fn initial_frame_mut(&mut self) -> Option<&mut Frame> {
        self.frames.first_mut()
    }

    /// Returns a reference to all frames.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Consumes the message, returning its frames.
    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }

    /// Returns the number of frames in the message.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Returns true if the message has no frames.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Calculates the total size of the message on the wire.
    pub fn wire_size(&self) -> usize {
        self.frames.iter().map(Frame::wire_size).sum()
    }

    /// Returns a cursor over the frames, starting at the initial frame.
    pub fn frame_iter(&self) -> ForwardFrameIterator<'_> {
        ForwardFrameIterator::new(&self.frames)
    }

    /// Writes all frames to the destination buffer.
    ///
    /// The last frame is written with the IS_FINAL flag set.
    pub fn write_to(&self, dst: &mut BytesMut, order: ByteOrder) {
        dst.reserve(self.wire_size());
        let last = self.frames.len().saturating_sub(1);
        for (index, frame) in self.frames.iter().enumerate() {
            if index == last && !frame.is_final_frame() {
                let mut final_frame = frame.clone();
                final_frame.flags |= IS_FINAL_FLAG;
                final_frame.write_to_with_order(dst, order);
            } else {
                frame.write_to_with_order(dst, order);
            }
        }
    }

    /// Returns true if this message is flagged as an event.
    pub fn is_event(&self) -> bool {
        self.frames.first().is_some_and(Frame::is_event_frame)
    }

    /// Returns true if this message is an exception response.
    pub fn is_exception(&self) -> bool {
        !self.is_event() && self.message_type() == Some(EXCEPTION_MESSAGE_TYPE)
    }

    /// Checks the structural invariants of a received message.
    ///
    /// The initial frame must hold at least a response header, and nested
    /// structure markers must form a balanced tree.
    pub fn validate(&self) -> Result<()> {
        let initial = self
            .frames
            .first()
            .ok_or_else(|| HazelcastError::Decode("message has no frames".to_string()))?;

        if initial.content.len() < RESPONSE_HEADER_SIZE {
            return Err(HazelcastError::Decode(format!(
                "initial frame holds {} bytes, header needs {}",
                initial.content.len(),
                RESPONSE_HEADER_SIZE
            )));
        }

        let mut depth: usize = 0;
        for frame in &self.frames[1..] {
            if frame.is_begin_frame() {
                depth += 1;
            }
            if frame.is_end_frame() {
                depth = depth.checked_sub(1).ok_or_else(|| {
                    HazelcastError::Decode("END frame without matching BEGIN".to_string())
                })?;
            }
        }

        if depth != 0 {
            return Err(HazelcastError::Decode(format!(
                "{} BEGIN frame(s) left unclosed",
                depth
            )));
        }
        Ok(())
    }
}

/// A positional cursor over the frames of a [`ClientMessage`].
///
/// Fields must be read in the exact order they were written.
#[derive(Debug, Clone)]
pub struct ForwardFrameIterator<'a> {
    frames: &'a [Frame],
    position: usize,
}

impl<'a> ForwardFrameIterator<'a> {
    /// Creates a cursor positioned at the first frame.
    pub fn new(frames: &'a [Frame]) -> Self {
        Self {
            frames,
            position: 0,
        }
    }

    /// Returns true if frames remain.
    pub fn has_next(&self) -> bool {
        self.position < self.frames.len()
    }

    /// Returns the next frame without advancing.
    pub fn peek_next(&self) -> Option<&'a Frame> {
        self.frames.get(self.position)
    }

    /// Returns the index of the next frame.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Returns the next frame, or a decode error if the message is exhausted.
    pub fn next_frame(&mut self) -> Result<&'a Frame> {
        self.next().ok_or_else(|| {
            HazelcastError::Decode(format!(
                "message ended after {} frames while more were expected",
                self.frames.len()
            ))
        })
    }

    /// Consumes frames up to and including the END frame that closes the
    /// structure currently being read.
    ///
    /// The structure's BEGIN frame must already have been consumed. Nested
    /// structures are skipped by tracking the depth of BEGIN and END frames.
    pub fn fast_forward_to_end_frame(&mut self) -> Result<()> {
        let mut expected_end_frames: usize = 1;
        while expected_end_frames != 0 {
            let frame = self.next_frame()?;
            if frame.is_end_frame() {
                expected_end_frames -= 1;
            } else if frame.is_begin_frame() {
                expected_end_frames += 1;
            }
        }
        Ok(())
    }

    /// Skips a whole nested structure, leaving the cursor at the next
    /// sibling field.
    ///
    /// A NULL frame standing in for the structure is skipped as well.
    pub fn skip_data_structure(&mut self) -> Result<()> {
        let frame = self.next_frame()?;
        if frame.is_null_frame() {
            return Ok(());
        }
        if !frame.is_begin_frame() {
            return Err(HazelcastError::Decode(
                "expected a BEGIN frame at the start of a nested structure".to_string(),
            ));
        }
        self.fast_forward_to_end_frame()
    }

    /// Consumes the next frame if it is a NULL frame.
    ///
    /// Returns true if a NULL frame was consumed.
    pub fn next_is_null_frame(&mut self) -> bool {
        let is_null = self.peek_next().is_some_and(Frame::is_null_frame);
        if is_null {
            self.position += 1;
        }
        is_null
    }

    /// Returns true if the next frame closes the current structure.
    pub fn next_is_end_frame(&self) -> bool {
        self.peek_next().is_some_and(Frame::is_end_frame)
    }
}

impl<'a> Iterator for ForwardFrameIterator<'a> {
    type Item = &'a Frame;

    fn next(&mut self) -> Option<Self::Item> {
        let frame = self.frames.get(self.position)?;
        self.position += 1;
        Some(frame)
    }
}

/// Size of the serialized data header (partition hash + type id).
pub const DATA_HEADER_SIZE: usize = 8;

/// Computes a partition hash for the given key data.
///
/// Uses MurmurHash3 algorithm compatible with Hazelcast.
pub fn compute_partition_hash(key: &[u8]) -> i32 {
    murmur_hash3_x86_32(key, 0x01000193)
}

/// Computes the partition hash of a serialized key.
///
/// Serialized data carries an explicit partition hash in its first four
/// bytes (big-endian) when the key is partition-aware; otherwise the hash is
/// computed over the payload after the data header.
pub fn data_partition_hash(data: &[u8]) -> i32 {
    if data.len() >= DATA_HEADER_SIZE {
        let explicit = i32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        if explicit != 0 {
            return explicit;
        }
        return compute_partition_hash(&data[DATA_HEADER_SIZE..]);
    }
    compute_partition_hash(data)
}

/// Maps a partition hash onto a partition id.
pub fn partition_id_for_hash(hash: i32, partition_count: i32) -> i32 {
    if partition_count <= 0 {
        return 0;
    }
    if hash == i32::MIN {
        return 0;
    }
    hash.abs() % partition_count
}

/// MurmurHash3 x86 32-bit implementation.
fn murmur_hash3_x86_32(data: &[u8], seed: u32) -> i32 {
    const C1: u32 = 0xcc9e2d51;
    const C2: u32 = 0x1b873593;

    let mix = |k1: u32| k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);

    let mut h1 = seed;
    let mut blocks = data.chunks_exact(4);
    for block in &mut blocks {
        let k1 = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        h1 ^= mix(k1);
        h1 = h1.rotate_left(13).wrapping_mul(5).wrapping_add(0xe6546b64);
    }

    let tail = blocks.remainder();
    if !tail.is_empty() {
        let k1 = tail
            .iter()
            .enumerate()
            .fold(0u32, |acc, (i, b)| acc ^ ((*b as u32) << (8 * i)));
        h1 ^= mix(k1);
    }

    h1 ^= data.len() as u32;
    h1 ^= h1 >> 16;
    h1 = h1.wrapping_mul(0x85ebca6b);
    h1 ^= h1 >> 13;
    h1 = h1.wrapping_mul(0xc2b2ae35);
    h1 ^= h1 >> 16;

    h1 as i32
}
