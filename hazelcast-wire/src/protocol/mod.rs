//! Hazelcast Open Binary Client Protocol implementation.
//!
//! A message is an ordered list of frames. The initial frame carries the
//! fixed-offset header; the remaining frames hold variable-size fields that
//! are decoded positionally with a [`ForwardFrameIterator`].

pub mod builtin;
mod client_message;
mod codec;
pub mod constants;
pub mod exception;
pub mod fragment;
mod frame;

pub use builtin::Data;
pub use client_message::{
    compute_partition_hash, data_partition_hash, partition_id_for_hash, ClientMessage,
    ForwardFrameIterator, DATA_HEADER_SIZE,
};
pub use codec::ClientMessageCodec;
pub use constants::*;
pub use frame::{ByteOrder, Frame, FrameHeader};
