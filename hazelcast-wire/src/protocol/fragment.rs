//! Splitting of oversized messages into fragments and their reassembly.
//!
//! Every fragment starts with a frame holding the 8-byte fragment id. The
//! first fragment's id frame carries [`BEGIN_FRAGMENT_FLAG`], the last one
//! [`END_FRAGMENT_FLAG`] and the ones in between no fragment flag. A message
//! that was not split keeps [`UNFRAGMENTED_MESSAGE`] on its initial frame.

use std::collections::HashMap;

use bytes::{BufMut, BytesMut};

use super::client_message::ClientMessage;
use super::constants::*;
use super::frame::Frame;
use crate::error::{HazelcastError, Result};

fn fragment_id_frame(fragment_id: i64, flags: u16) -> Frame {
    let mut content = BytesMut::with_capacity(FRAGMENT_ID_SIZE);
    content.put_i64_le(fragment_id);
    Frame::new(content, flags)
}

/// Splits a message into fragments no larger than `max_fragment_bytes` on
/// the wire, where possible.
///
/// A frame larger than the limit travels alone in its own fragment. Messages
/// that already fit, or that consist of a single frame, are returned
/// unchanged.
pub fn split(message: ClientMessage, max_fragment_bytes: usize, fragment_id: i64) -> Vec<ClientMessage> {
    if message.wire_size() <= max_fragment_bytes || message.frame_count() < 2 {
        return vec![message];
    }

    let id_frame_size = FRAME_HEADER_SIZE + FRAGMENT_ID_SIZE;
    let mut fragments: Vec<Vec<Frame>> = Vec::new();
    let mut current: Vec<Frame> = Vec::new();
    let mut current_size = id_frame_size;

    for mut frame in message.into_frames() {
        frame.flags &= !IS_FINAL_FLAG;
        let size = frame.wire_size();
        if !current.is_empty() && current_size + size > max_fragment_bytes {
            fragments.push(std::mem::take(&mut current));
            current_size = id_frame_size;
        }
        current_size += size;
        current.push(frame);
    }
    if !current.is_empty() {
        fragments.push(current);
    }

    // Two or more frames whose total exceeds the limit never fit one fragment.
    let last = fragments.len() - 1;
    fragments
        .into_iter()
        .enumerate()
        .map(|(index, frames)| {
            let flags = if index == 0 {
                BEGIN_FRAGMENT_FLAG
            } else if index == last {
                END_FRAGMENT_FLAG
            } else {
                DEFAULT_FLAGS
            };
            let mut fragment = ClientMessage::from_frames(Vec::with_capacity(frames.len() + 1));
            fragment.add_frame(fragment_id_frame(fragment_id, flags));
            for frame in frames {
                fragment.add_frame(frame);
            }
            fragment
        })
        .collect()
}

/// Reassembles fragmented messages received on one connection.
#[derive(Debug, Default)]
pub struct FragmentAssembler {
    partial: HashMap<i64, Vec<Frame>>,
}

impl FragmentAssembler {
    /// Creates an empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of messages still waiting for fragments.
    pub fn pending(&self) -> usize {
        self.partial.len()
    }

    /// Accepts one chunk read off the wire.
    ///
    /// Returns the logical message once it is complete, or `None` while more
    /// fragments are expected.
    pub fn accept(&mut self, chunk: ClientMessage) -> Result<Option<ClientMessage>> {
        let Some(first) = chunk.initial_frame() else {
            return Err(HazelcastError::Decode("received an empty message".to_string()));
        };

        if first.is_unfragmented() {
            return Ok(Some(chunk));
        }

        let begin = first.is_begin_fragment();
        let end = first.is_end_fragment();
        let id_bytes: [u8; FRAGMENT_ID_SIZE] = first
            .content
            .get(..FRAGMENT_ID_SIZE)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| {
                HazelcastError::Decode("fragment frame is missing its fragment id".to_string())
            })?;
        let fragment_id = i64::from_le_bytes(id_bytes);

        let frames = chunk.into_frames().into_iter().skip(1).map(|mut frame| {
            frame.flags &= !IS_FINAL_FLAG;
            frame
        });

        if begin {
            if self.partial.insert(fragment_id, frames.collect()).is_some() {
                tracing::warn!(fragment_id, "fragmented message restarted before completion");
            }
            return Ok(None);
        }

        let buffered = self.partial.get_mut(&fragment_id).ok_or_else(|| {
            HazelcastError::Decode(format!("fragment for unknown fragment id {}", fragment_id))
        })?;
        buffered.extend(frames);

        if end {
            let frames = self.partial.remove(&fragment_id).unwrap_or_default();
            return Ok(Some(ClientMessage::from_frames(frames)));
        }
        Ok(None)
    }
}
