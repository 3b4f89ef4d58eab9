//! Protocol constants for the Hazelcast Open Binary Client Protocol.

/// Size of the frame length field in bytes.
pub const SIZE_OF_FRAME_LENGTH_FIELD: usize = 4;

/// Size of the frame flags field in bytes.
pub const SIZE_OF_FRAME_FLAGS_FIELD: usize = 2;

/// Total frame header size (length + flags). The declared frame length
/// includes this header.
pub const FRAME_HEADER_SIZE: usize = SIZE_OF_FRAME_LENGTH_FIELD + SIZE_OF_FRAME_FLAGS_FIELD;

/// Marks the first chunk of a (possibly fragmented) message.
pub const BEGIN_FRAGMENT_FLAG: u16 = 1 << 15;

/// Marks the final chunk of a (possibly fragmented) message.
pub const END_FRAGMENT_FLAG: u16 = 1 << 14;

/// Marks the last frame of a message on the wire.
pub const IS_FINAL_FLAG: u16 = 1 << 13;

/// Opens a nested data structure.
pub const BEGIN_DATA_STRUCTURE_FLAG: u16 = 1 << 12;

/// Closes a nested data structure.
pub const END_DATA_STRUCTURE_FLAG: u16 = 1 << 11;

/// Stands in for an absent nullable field.
pub const IS_NULL_FLAG: u16 = 1 << 10;

/// Set on the initial frame of server push events.
pub const IS_EVENT_FLAG: u16 = 1 << 9;

/// Set on requests whose response carries a backup-ack count.
pub const BACKUP_AWARE_FLAG: u16 = 1 << 8;

/// Set on backup acknowledgement events.
pub const BACKUP_EVENT_FLAG: u16 = 1 << 7;

/// Flags of an initial frame that is not part of a fragmented message.
pub const UNFRAGMENTED_MESSAGE: u16 = BEGIN_FRAGMENT_FLAG | END_FRAGMENT_FLAG;

/// Default frame flags (no special flags set).
pub const DEFAULT_FLAGS: u16 = 0;

/// Offset of message type in initial frame content.
pub const TYPE_FIELD_OFFSET: usize = 0;

/// Offset of correlation ID in initial frame content.
pub const CORRELATION_ID_OFFSET: usize = TYPE_FIELD_OFFSET + INT_SIZE_IN_BYTES;

/// Offset of partition ID in request and event initial frames.
pub const PARTITION_ID_OFFSET: usize = CORRELATION_ID_OFFSET + LONG_SIZE_IN_BYTES;

/// Size of the request initial frame header.
pub const REQUEST_HEADER_SIZE: usize = PARTITION_ID_OFFSET + INT_SIZE_IN_BYTES;

/// Size of the event initial frame header.
pub const EVENT_HEADER_SIZE: usize = REQUEST_HEADER_SIZE;

/// Offset of backup acks count in response initial frame.
pub const RESPONSE_BACKUP_ACKS_OFFSET: usize = CORRELATION_ID_OFFSET + LONG_SIZE_IN_BYTES;

/// Size of the response initial frame header.
pub const RESPONSE_HEADER_SIZE: usize = RESPONSE_BACKUP_ACKS_OFFSET + BYTE_SIZE_IN_BYTES;

/// Size of the fragment id carried by the first frame of every fragment.
pub const FRAGMENT_ID_SIZE: usize = LONG_SIZE_IN_BYTES;

/// Smallest usable fragmentation threshold: a fragment id frame plus a
/// request initial frame.
pub const MIN_FRAGMENT_SIZE: usize =
    FRAME_HEADER_SIZE + FRAGMENT_ID_SIZE + FRAME_HEADER_SIZE + REQUEST_HEADER_SIZE;

/// Partition ID indicating no specific partition (-1).
pub const PARTITION_ID_ANY: i32 = -1;

/// Message type of exception responses.
pub const EXCEPTION_MESSAGE_TYPE: i32 = 0;

/// Connection preamble identifying the client protocol.
pub const CLIENT_PROTOCOL_PREAMBLE: &[u8; 3] = b"CP2";

/// Default upper bound for a single frame accepted from the wire.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Size of a boolean field.
pub const BOOLEAN_SIZE_IN_BYTES: usize = 1;

/// Size of a byte field.
pub const BYTE_SIZE_IN_BYTES: usize = 1;

/// Size of an int field.
pub const INT_SIZE_IN_BYTES: usize = 4;

/// Size of a long field.
pub const LONG_SIZE_IN_BYTES: usize = 8;

/// Size of a UUID field: a null marker followed by two longs.
pub const UUID_SIZE_IN_BYTES: usize = BOOLEAN_SIZE_IN_BYTES + 2 * LONG_SIZE_IN_BYTES;
