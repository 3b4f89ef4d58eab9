//! Frame type for the Hazelcast Open Binary Client Protocol.

use bytes::{Buf, BufMut, BytesMut};

use super::constants::*;
use crate::error::{HazelcastError, Result};

/// Byte order of the frame envelope (length and flags fields).
///
/// The order is fixed for the lifetime of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ByteOrder {
    /// Little-endian, the protocol default.
    #[default]
    Little,
    /// Big-endian.
    Big,
}

impl ByteOrder {
    fn put_u32(self, dst: &mut BytesMut, value: u32) {
        match self {
            Self::Little => dst.put_u32_le(value),
            Self::Big => dst.put_u32(value),
        }
    }

    fn put_u16(self, dst: &mut BytesMut, value: u16) {
        match self {
            Self::Little => dst.put_u16_le(value),
            Self::Big => dst.put_u16(value),
        }
    }

    fn read_u32(self, bytes: [u8; 4]) -> u32 {
        match self {
            Self::Little => u32::from_le_bytes(bytes),
            Self::Big => u32::from_be_bytes(bytes),
        }
    }

    fn read_u16(self, bytes: [u8; 2]) -> u16 {
        match self {
            Self::Little => u16::from_le_bytes(bytes),
            Self::Big => u16::from_be_bytes(bytes),
        }
    }
}

/// The length and flags prefix of a frame, read without consuming it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Declared frame length, including the header itself.
    pub length: usize,
    /// Frame flags.
    pub flags: u16,
}

impl FrameHeader {
    /// Returns `true` if the declared length cannot hold the header.
    pub fn is_impossible(&self) -> bool {
        self.length < FRAME_HEADER_SIZE
    }
}

/// A single frame in the Hazelcast protocol.
///
/// Each frame consists of:
/// - A 4-byte length field covering the whole frame
/// - A 2-byte flags field
/// - Variable-length content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The frame content (payload after flags).
    pub content: BytesMut,
    /// Frame flags indicating frame type and properties.
    pub flags: u16,
}

impl Frame {
    /// Creates a new frame with the given content and flags.
    pub fn new(content: BytesMut, flags: u16) -> Self {
        Self { content, flags }
    }

    /// Creates a new frame with content and default flags.
    pub fn with_content(content: BytesMut) -> Self {
        Self::new(content, DEFAULT_FLAGS)
    }

    /// Creates a new empty frame with the given flags.
    pub fn with_flags(flags: u16) -> Self {
        Self::new(BytesMut::new(), flags)
    }

    /// Creates a zero-filled frame of the given size, for fixed-size fields.
    pub fn zeroed(size: usize, flags: u16) -> Self {
        Self::new(BytesMut::zeroed(size), flags)
    }

    /// Creates a frame opening a nested data structure.
    pub fn new_begin_frame() -> Self {
        Self::with_flags(BEGIN_DATA_STRUCTURE_FLAG)
    }

    /// Creates a frame closing a nested data structure.
    pub fn new_end_frame() -> Self {
        Self::with_flags(END_DATA_STRUCTURE_FLAG)
    }

    /// Creates a null frame (represents an absent nullable value).
    pub fn new_null_frame() -> Self {
        Self::with_flags(IS_NULL_FLAG)
    }

    /// Returns true if this frame opens a nested data structure.
    pub fn is_begin_frame(&self) -> bool {
        self.flags & BEGIN_DATA_STRUCTURE_FLAG != 0
    }

    /// Returns true if this frame closes a nested data structure.
    pub fn is_end_frame(&self) -> bool {
        self.flags & END_DATA_STRUCTURE_FLAG != 0
    }

    /// Returns true if this frame has the NULL flag set.
    pub fn is_null_frame(&self) -> bool {
        self.flags & IS_NULL_FLAG != 0
    }

    /// Returns true if this is the last frame of a message.
    pub fn is_final_frame(&self) -> bool {
        self.flags & IS_FINAL_FLAG != 0
    }

    /// Returns true if this frame has the EVENT flag set.
    pub fn is_event_frame(&self) -> bool {
        self.flags & IS_EVENT_FLAG != 0
    }

    /// Returns true if this frame has the BACKUP_EVENT flag set.
    pub fn is_backup_event_frame(&self) -> bool {
        self.flags & BACKUP_EVENT_FLAG != 0
    }

    /// Returns true if this frame starts a fragment.
    pub fn is_begin_fragment(&self) -> bool {
        self.flags & BEGIN_FRAGMENT_FLAG != 0
    }

    /// Returns true if this frame ends a fragmented message.
    pub fn is_end_fragment(&self) -> bool {
        self.flags & END_FRAGMENT_FLAG != 0
    }

    /// Returns true if this frame carries both fragment flags.
    pub fn is_unfragmented(&self) -> bool {
        self.flags & UNFRAGMENTED_MESSAGE == UNFRAGMENTED_MESSAGE
    }

    /// Returns the size of this frame on the wire.
    ///
    /// This is also the value written in the length field.
    pub fn wire_size(&self) -> usize {
        FRAME_HEADER_SIZE + self.content.len()
    }

    /// Writes this frame to the given buffer in little-endian order.
    pub fn write_to(&self, dst: &mut BytesMut) {
        self.write_to_with_order(dst, ByteOrder::Little);
    }

    /// Writes this frame to the given buffer with the given envelope order.
    pub fn write_to_with_order(&self, dst: &mut BytesMut, order: ByteOrder) {
        dst.reserve(self.wire_size());
        order.put_u32(dst, self.wire_size() as u32);
        order.put_u16(dst, self.flags);
        dst.put_slice(&self.content);
    }

    /// Reads the length and flags of the next frame without consuming them.
    ///
    /// Returns `None` if fewer than [`FRAME_HEADER_SIZE`] bytes are buffered.
    pub fn peek_header(src: &[u8], order: ByteOrder) -> Option<FrameHeader> {
        if src.len() < FRAME_HEADER_SIZE {
            return None;
        }
        let length = order.read_u32([src[0], src[1], src[2], src[3]]) as usize;
        let flags = order.read_u16([src[4], src[5]]);
        Some(FrameHeader { length, flags })
    }

    /// Reads a little-endian frame from the given buffer.
    ///
    /// Returns `Ok(None)` if there isn't enough data to read a complete frame.
    pub fn read_from(src: &mut BytesMut) -> Result<Option<Self>> {
        Self::read_from_with_order(src, ByteOrder::Little)
    }

    /// Reads a frame with the given envelope order.
    ///
    /// A declared length shorter than the frame header is a decode error; the
    /// header bytes are consumed so the caller can resynchronize on the next
    /// frame.
    pub fn read_from_with_order(src: &mut BytesMut, order: ByteOrder) -> Result<Option<Self>> {
        let Some(header) = Self::peek_header(src, order) else {
            return Ok(None);
        };

        if header.is_impossible() {
            src.advance(FRAME_HEADER_SIZE);
            return Err(HazelcastError::Decode(format!(
                "frame length {} is shorter than the {}-byte header",
                header.length, FRAME_HEADER_SIZE
            )));
        }

        if src.len() < header.length {
            return Ok(None);
        }

        src.advance(FRAME_HEADER_SIZE);
        let content = src.split_to(header.length - FRAME_HEADER_SIZE);
        Ok(Some(Self::new(content, header.flags)))
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::with_flags(DEFAULT_FLAGS)
    }
}
