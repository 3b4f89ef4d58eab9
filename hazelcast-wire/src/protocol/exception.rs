//! Decoding of exception responses into [`HazelcastError`].

use bytes::BytesMut;

use super::builtin::{
    decode_int, decode_list, decode_nullable, decode_string, encode_int, encode_list,
    encode_nullable, encode_string, expect_begin,
};
use super::client_message::{ClientMessage, ForwardFrameIterator};
use super::constants::*;
use super::frame::Frame;
use crate::error::{HazelcastError, RemoteError, Result};

/// Protocol error codes the runtime reacts to.
pub mod error_codes {
    /// Unknown server-side error.
    pub const UNDEFINED: i32 = 0;
    /// Authentication rejected.
    pub const AUTHENTICATION: i32 = 3;
    /// The caller is not a cluster member.
    pub const CALLER_NOT_MEMBER: i32 = 8;
    /// The member is not active (starting or shutting down).
    pub const HAZELCAST_INSTANCE_NOT_ACTIVE: i32 = 19;
    /// Illegal state on the member.
    pub const ILLEGAL_STATE: i32 = 27;
    /// A member left during the operation.
    pub const MEMBER_LEFT: i32 = 33;
    /// The operation timed out on the member.
    pub const OPERATION_TIMEOUT: i32 = 38;
    /// The partition is being migrated.
    pub const PARTITION_MIGRATING: i32 = 39;
    /// Generic retryable error.
    pub const RETRYABLE_HAZELCAST: i32 = 46;
    /// Retryable I/O error.
    pub const RETRYABLE_IO: i32 = 47;
    /// A ring-style read fell behind the head sequence.
    pub const STALE_SEQUENCE: i32 = 51;
    /// The target of the operation disconnected.
    pub const TARGET_DISCONNECTED: i32 = 52;
    /// The target of the operation is not a member.
    pub const TARGET_NOT_MEMBER: i32 = 53;
    /// The operation reached a member that does not own the partition.
    pub const WRONG_TARGET: i32 = 63;
}

/// Returns true if invocations failing with `error_code` may be retried.
pub fn is_retryable_error_code(error_code: i32) -> bool {
    use error_codes::*;
    matches!(
        error_code,
        CALLER_NOT_MEMBER
            | HAZELCAST_INSTANCE_NOT_ACTIVE
            | MEMBER_LEFT
            | PARTITION_MIGRATING
            | RETRYABLE_HAZELCAST
            | RETRYABLE_IO
            | TARGET_DISCONNECTED
            | TARGET_NOT_MEMBER
            | WRONG_TARGET
    )
}

/// One element of a server-side stack trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackTraceElement {
    /// Declaring class of the frame.
    pub class_name: String,
    /// Method name of the frame.
    pub method_name: String,
    /// Source file, if known.
    pub file_name: Option<String>,
    /// Source line.
    pub line_number: i32,
}

/// One exception in the cause chain of an exception response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorHolder {
    /// Protocol error code.
    pub error_code: i32,
    /// Server-side exception class.
    pub class_name: String,
    /// Exception message.
    pub message: Option<String>,
    /// Server-side stack trace.
    pub stack_trace: Vec<StackTraceElement>,
}

impl ErrorHolder {
    /// Creates an error holder without a stack trace.
    pub fn new(error_code: i32, class_name: impl Into<String>, message: Option<String>) -> Self {
        Self {
            error_code,
            class_name: class_name.into(),
            message,
            stack_trace: Vec::new(),
        }
    }

    /// Converts the holder into the error surfaced to callers.
    pub fn into_error(self) -> HazelcastError {
        if self.error_code == error_codes::STALE_SEQUENCE {
            return HazelcastError::StaleSequence(
                self.message.unwrap_or_else(|| self.class_name.clone()),
            );
        }
        let retryable = is_retryable_error_code(self.error_code);
        HazelcastError::Remote(RemoteError::new(
            self.error_code,
            self.class_name,
            self.message,
            retryable,
        ))
    }
}

fn encode_stack_trace_element(message: &mut ClientMessage, element: &StackTraceElement) {
    message.add_frame(Frame::new_begin_frame());
    let mut initial = Frame::zeroed(INT_SIZE_IN_BYTES, DEFAULT_FLAGS);
    encode_int(&mut initial.content, 0, element.line_number);
    message.add_frame(initial);
    encode_string(message, &element.class_name);
    encode_string(message, &element.method_name);
    encode_nullable(message, element.file_name.as_deref(), encode_string);
    message.add_frame(Frame::new_end_frame());
}

fn decode_stack_trace_element(iter: &mut ForwardFrameIterator<'_>) -> Result<StackTraceElement> {
    expect_begin(iter)?;
    let line_number = decode_int(&iter.next_frame()?.content, 0)?;
    let class_name = decode_string(iter)?;
    let method_name = decode_string(iter)?;
    let file_name = decode_nullable(iter, decode_string)?;
    iter.fast_forward_to_end_frame()?;
    Ok(StackTraceElement {
        class_name,
        method_name,
        file_name,
        line_number,
    })
}

fn encode_error_holder(message: &mut ClientMessage, holder: &ErrorHolder) {
    message.add_frame(Frame::new_begin_frame());
    let mut initial = Frame::zeroed(INT_SIZE_IN_BYTES, DEFAULT_FLAGS);
    encode_int(&mut initial.content, 0, holder.error_code);
    message.add_frame(initial);
    encode_string(message, &holder.class_name);
    encode_nullable(message, holder.message.as_deref(), encode_string);
    encode_list(message, &holder.stack_trace, encode_stack_trace_element);
    message.add_frame(Frame::new_end_frame());
}

fn decode_error_holder(iter: &mut ForwardFrameIterator<'_>) -> Result<ErrorHolder> {
    expect_begin(iter)?;
    let error_code = decode_int(&iter.next_frame()?.content, 0)?;
    let class_name = decode_string(iter)?;
    let message = decode_nullable(iter, decode_string)?;
    let stack_trace = decode_list(iter, decode_stack_trace_element)?;
    iter.fast_forward_to_end_frame()?;
    Ok(ErrorHolder {
        error_code,
        class_name,
        message,
        stack_trace,
    })
}

/// Builds an exception response carrying the given cause chain.
pub fn encode_exception_response(correlation_id: i64, errors: &[ErrorHolder]) -> ClientMessage {
    let mut message = ClientMessage::from_frames(vec![Frame::new(
        BytesMut::zeroed(RESPONSE_HEADER_SIZE),
        UNFRAGMENTED_MESSAGE,
    )]);
    message.set_message_type(EXCEPTION_MESSAGE_TYPE);
    message.set_correlation_id(correlation_id);
    encode_list(&mut message, errors, encode_error_holder);
    message
}

/// Decodes the cause chain of an exception response.
pub fn decode_error_holders(message: &ClientMessage) -> Result<Vec<ErrorHolder>> {
    let mut iter = message.frame_iter();
    iter.next_frame()?;
    decode_list(&mut iter, decode_error_holder)
}

/// Decodes an exception response into the error its first cause describes.
///
/// A message that cannot be decoded yields a [`HazelcastError::Decode`].
pub fn decode_exception(message: &ClientMessage) -> HazelcastError {
    match decode_error_holders(message) {
        Ok(holders) => match holders.into_iter().next() {
            Some(holder) => holder.into_error(),
            None => HazelcastError::Remote(RemoteError::new(
                error_codes::UNDEFINED,
                "UndefinedErrorCodeException",
                Some("exception response carried no error".to_string()),
                false,
            )),
        },
        Err(e) => e,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;

    #[test]
    fn test_exception_roundtrip_keeps_cause_chain() {
        let mut top = ErrorHolder::new(
            error_codes::ILLEGAL_STATE,
            "java.lang.IllegalStateException",
            Some("bad state".to_string()),
        );
        top.stack_trace.push(StackTraceElement {
            class_name: "com.hazelcast.Foo".into(),
            method_name: "bar".into(),
            file_name: None,
            line_number: 12,
        });
        let cause = ErrorHolder::new(error_codes::UNDEFINED, "java.lang.Exception", None);

        let message = encode_exception_response(99, &[top.clone(), cause.clone()]);
        assert!(message.is_exception());
        assert_eq!(message.correlation_id(), Some(99));
        assert!(message.validate().is_ok());

        assert_eq!(decode_error_holders(&message).unwrap(), vec![top, cause]);
    }

    #[test]
    fn test_retryable_remote_error() {
        let message = encode_exception_response(
            1,
            &[ErrorHolder::new(
                error_codes::TARGET_NOT_MEMBER,
                "com.hazelcast.spi.exception.TargetNotMemberException",
                None,
            )],
        );
        let err = decode_exception(&message);
        assert_eq!(err.category(), ErrorCategory::Remote);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_non_retryable_remote_error() {
        let message = encode_exception_response(
            1,
            &[ErrorHolder::new(
                error_codes::ILLEGAL_STATE,
                "java.lang.IllegalStateException",
                Some("nope".into()),
            )],
        );
        let err = decode_exception(&message);
        assert!(!err.is_retryable());
        let detail = err.remote_detail().unwrap();
        assert_eq!(detail.message.as_deref(), Some("nope"));
        assert_eq!(detail.class_name, "java.lang.IllegalStateException");
    }

    #[test]
    fn test_stale_sequence_maps_to_dedicated_error() {
        let message = encode_exception_response(
            1,
            &[ErrorHolder::new(
                error_codes::STALE_SEQUENCE,
                "com.hazelcast.ringbuffer.StaleSequenceException",
                Some("sequence 3 is smaller than head 10".into()),
            )],
        );
        assert!(matches!(
            decode_exception(&message),
            HazelcastError::StaleSequence(_)
        ));
    }

    #[test]
    fn test_truncated_exception_is_decode_error() {
        let mut message = encode_exception_response(1, &[]);
        let mut frames = message.clone().into_frames();
        frames.pop();
        message = ClientMessage::from_frames(frames);
        assert!(matches!(
            decode_exception(&message),
            HazelcastError::Decode(_)
        ));
    }

    #[test]
    fn test_retryable_codes() {
        assert!(is_retryable_error_code(error_codes::WRONG_TARGET));
        assert!(is_retryable_error_code(error_codes::MEMBER_LEFT));
        assert!(!is_retryable_error_code(error_codes::AUTHENTICATION));
        assert!(!is_retryable_error_code(error_codes::OPERATION_TIMEOUT));
    }
}
