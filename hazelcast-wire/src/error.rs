//! Error types for Hazelcast client operations.

use std::fmt;
use std::io;
use thiserror::Error;

/// Error details decoded from a server-side exception response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    /// Protocol error code reported by the member.
    pub error_code: i32,
    /// Fully qualified class name of the server-side exception.
    pub class_name: String,
    /// Exception message, if the server sent one.
    pub message: Option<String>,
    /// Whether the invocation that produced this error may be retried.
    pub retryable: bool,
}

impl RemoteError {
    /// Creates a new remote error.
    pub fn new(
        error_code: i32,
        class_name: impl Into<String>,
        message: Option<String>,
        retryable: bool,
    ) -> Self {
        Self {
            error_code,
            class_name: class_name.into(),
            message,
            retryable,
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.class_name, self.error_code)?;
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

/// Coarse classification of a [`HazelcastError`], for callers that branch on
/// the kind of failure rather than on its details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Connect or write failures and closed connections.
    Transport,
    /// An exception raised by a cluster member.
    Remote,
    /// The operation outlived its deadline.
    Timeout,
    /// A sequence gap was detected; the caller must resynchronize.
    StaleSequence,
    /// The client was not in a state that permits the operation.
    IllegalState,
    /// A malformed message was received.
    Decode,
    /// Invalid client settings.
    Configuration,
}

/// The main error type for Hazelcast operations.
#[derive(Debug, Error)]
pub enum HazelcastError {
    /// Write or connect failures, and connections closed under an invocation.
    #[error("transport error: {0}")]
    Transport(String),

    /// An exception payload returned by a cluster member.
    #[error("remote error: {0}")]
    Remote(RemoteError),

    /// An invocation outlived its configured timeout.
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// A sequence gap was detected, e.g. on a ring-style read.
    #[error("stale sequence: {0}")]
    StaleSequence(String),

    /// The operation was attempted before connecting or after shutdown.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// A malformed frame or message. Fatal only to that message.
    #[error("decode error: {0}")]
    Decode(String),

    /// Configuration errors (invalid settings).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// I/O errors from the standard library.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl HazelcastError {
    /// Returns the category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Transport(_) | Self::Io(_) => ErrorCategory::Transport,
            Self::Remote(_) => ErrorCategory::Remote,
            Self::DeadlineExceeded(_) => ErrorCategory::Timeout,
            Self::StaleSequence(_) => ErrorCategory::StaleSequence,
            Self::IllegalState(_) => ErrorCategory::IllegalState,
            Self::Decode(_) => ErrorCategory::Decode,
            Self::Configuration(_) => ErrorCategory::Configuration,
        }
    }

    /// Returns `true` if an invocation failing with this error may be retried.
    ///
    /// Transport failures are always retryable; remote errors carry their own
    /// flag derived from the server error code.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Io(_) => true,
            Self::Remote(remote) => remote.retryable,
            _ => false,
        }
    }

    /// Returns the remote error details, if this error came from a member.
    pub fn remote_detail(&self) -> Option<&RemoteError> {
        match self {
            Self::Remote(remote) => Some(remote),
            _ => None,
        }
    }

    /// Creates a copy of this error suitable for delivering to several waiters.
    ///
    /// `io::Error` is not `Clone`, so I/O errors are carried over as transport
    /// errors with the same message.
    pub fn duplicate(&self) -> Self {
        match self {
            Self::Transport(m) => Self::Transport(m.clone()),
            Self::Remote(r) => Self::Remote(r.clone()),
            Self::DeadlineExceeded(m) => Self::DeadlineExceeded(m.clone()),
            Self::StaleSequence(m) => Self::StaleSequence(m.clone()),
            Self::IllegalState(m) => Self::IllegalState(m.clone()),
            Self::Decode(m) => Self::Decode(m.clone()),
            Self::Configuration(m) => Self::Configuration(m.clone()),
            Self::Io(e) => Self::Transport(e.to_string()),
        }
    }
}

/// A specialized `Result` type for Hazelcast operations.
pub type Result<T> = std::result::Result<T, HazelcastError>;
