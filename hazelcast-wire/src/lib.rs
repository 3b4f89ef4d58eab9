//! Wire-level types for the Hazelcast client runtime.
//!
//! This crate holds the binary framing of the Hazelcast Open Binary Client
//! Protocol and the error taxonomy shared by every layer of the client. It
//! has no dependency on an async runtime; the [`protocol::ClientMessageCodec`]
//! plugs into `tokio_util::codec` framed I/O.

#![warn(missing_docs)]

pub mod error;
pub mod protocol;

pub use error::{ErrorCategory, HazelcastError, RemoteError, Result};
pub use protocol::{ClientMessage, ClientMessageCodec, Data, Frame};
