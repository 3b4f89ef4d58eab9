//! `Client.Authentication`: the first request on every connection.

use std::net::SocketAddr;

use hazelcast_wire::protocol::builtin::{
    decode_bool, decode_byte, decode_int, decode_list, decode_nullable, decode_string,
    decode_uuid, encode_bool, encode_byte, encode_int, encode_list, encode_nullable,
    encode_string, encode_uuid,
};
use hazelcast_wire::protocol::{
    ClientMessage, BOOLEAN_SIZE_IN_BYTES, BYTE_SIZE_IN_BYTES, INT_SIZE_IN_BYTES,
    PARTITION_ID_ANY, REQUEST_HEADER_SIZE, RESPONSE_HEADER_SIZE, UUID_SIZE_IN_BYTES,
};
use hazelcast_wire::{HazelcastError, Result};
use uuid::Uuid;

use super::custom::{decode_address, encode_address};
use super::{initial_content, new_response};

/// Request message type.
pub const REQUEST_MESSAGE_TYPE: i32 = 0x000100;
/// Response message type.
pub const RESPONSE_MESSAGE_TYPE: i32 = 0x000101;

/// Serialization version spoken by this client.
pub const SERIALIZATION_VERSION: u8 = 1;
/// Client type reported to members.
pub const CLIENT_TYPE: &str = "RST";

const REQUEST_UUID_OFFSET: usize = REQUEST_HEADER_SIZE;
const REQUEST_SERIALIZATION_VERSION_OFFSET: usize = REQUEST_UUID_OFFSET + UUID_SIZE_IN_BYTES;
const REQUEST_INITIAL_FRAME_SIZE: usize =
    REQUEST_SERIALIZATION_VERSION_OFFSET + BYTE_SIZE_IN_BYTES;

const RESPONSE_STATUS_OFFSET: usize = RESPONSE_HEADER_SIZE;
const RESPONSE_MEMBER_UUID_OFFSET: usize = RESPONSE_STATUS_OFFSET + BYTE_SIZE_IN_BYTES;
const RESPONSE_SERIALIZATION_VERSION_OFFSET: usize =
    RESPONSE_MEMBER_UUID_OFFSET + UUID_SIZE_IN_BYTES;
const RESPONSE_PARTITION_COUNT_OFFSET: usize =
    RESPONSE_SERIALIZATION_VERSION_OFFSET + BYTE_SIZE_IN_BYTES;
const RESPONSE_CLUSTER_ID_OFFSET: usize = RESPONSE_PARTITION_COUNT_OFFSET + INT_SIZE_IN_BYTES;
const RESPONSE_FAILOVER_SUPPORTED_OFFSET: usize = RESPONSE_CLUSTER_ID_OFFSET + UUID_SIZE_IN_BYTES;
const RESPONSE_INITIAL_FRAME_SIZE: usize =
    RESPONSE_FAILOVER_SUPPORTED_OFFSET + BOOLEAN_SIZE_IN_BYTES;

/// Outcome reported by the member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationStatus {
    /// The client may use the connection.
    Authenticated,
    /// The credentials were rejected.
    CredentialsFailed,
    /// The member speaks a different serialization version.
    SerializationVersionMismatch,
    /// The member refuses clients of this cluster name or type.
    NotAllowedInCluster,
}

impl AuthenticationStatus {
    /// Returns the status for a wire code.
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Self::Authenticated),
            1 => Ok(Self::CredentialsFailed),
            2 => Ok(Self::SerializationVersionMismatch),
            3 => Ok(Self::NotAllowedInCluster),
            other => Err(HazelcastError::Decode(format!(
                "unknown authentication status {}",
                other
            ))),
        }
    }

    /// Returns the wire code.
    pub fn code(self) -> u8 {
        match self {
            Self::Authenticated => 0,
            Self::CredentialsFailed => 1,
            Self::SerializationVersionMismatch => 2,
            Self::NotAllowedInCluster => 3,
        }
    }
}

impl std::fmt::Display for AuthenticationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Authenticated => write!(f, "authenticated"),
            Self::CredentialsFailed => write!(f, "credentials failed"),
            Self::SerializationVersionMismatch => write!(f, "serialization version mismatch"),
            Self::NotAllowedInCluster => write!(f, "client not allowed in cluster"),
        }
    }
}

/// Parameters of an authentication request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationRequest {
    /// Name of the cluster the client expects.
    pub cluster_name: String,
    /// Optional username.
    pub username: Option<String>,
    /// Optional password.
    pub password: Option<String>,
    /// Uuid identifying this client instance.
    pub client_uuid: Uuid,
    /// Client type code.
    pub client_type: String,
    /// Serialization version of the client.
    pub serialization_version: u8,
    /// Version string of the client.
    pub client_version: String,
    /// Instance name of the client.
    pub client_name: String,
    /// Labels attached to the client.
    pub labels: Vec<String>,
}

/// Response to an authentication request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationResponse {
    /// Status code of the attempt.
    pub status: AuthenticationStatus,
    /// Address of the member, if reported.
    pub address: Option<SocketAddr>,
    /// Uuid of the member.
    pub member_uuid: Option<Uuid>,
    /// Serialization version of the member.
    pub serialization_version: u8,
    /// Version string of the member.
    pub server_version: String,
    /// Partition count of the cluster.
    pub partition_count: i32,
    /// Uuid of the cluster.
    pub cluster_id: Option<Uuid>,
    /// Whether the cluster supports blue/green failover.
    pub failover_supported: bool,
}

impl AuthenticationResponse {
    /// Returns `true` if the member accepted the client.
    pub fn is_authenticated(&self) -> bool {
        self.status == AuthenticationStatus::Authenticated
    }
}

/// Encodes an authentication request.
pub fn encode_request(request: &AuthenticationRequest) -> ClientMessage {
    let mut message = ClientMessage::create_with_initial_frame_size(
        REQUEST_MESSAGE_TYPE,
        PARTITION_ID_ANY,
        REQUEST_INITIAL_FRAME_SIZE,
    );
    if let Some(initial) = message.initial_frame_mut() {
        encode_uuid(&mut initial.content, REQUEST_UUID_OFFSET, Some(request.client_uuid));
        encode_byte(
            &mut initial.content,
            REQUEST_SERIALIZATION_VERSION_OFFSET,
            request.serialization_version,
        );
    }
    encode_string(&mut message, &request.cluster_name);
    encode_nullable(&mut message, request.username.as_deref(), encode_string);
    encode_nullable(&mut message, request.password.as_deref(), encode_string);
    encode_string(&mut message, &request.client_type);
    encode_string(&mut message, &request.client_version);
    encode_string(&mut message, &request.client_name);
    encode_list(&mut message, &request.labels, |m, label| encode_string(m, label));
    message
}

/// Decodes an authentication request, as a member reads it.
pub fn decode_request(message: &ClientMessage) -> Result<AuthenticationRequest> {
    let mut iter = message.frame_iter();
    let content = &iter.next_frame()?.content;
    let client_uuid = decode_uuid(content, REQUEST_UUID_OFFSET)?
        .ok_or_else(|| HazelcastError::Decode("authentication without a client uuid".into()))?;
    let serialization_version = decode_byte(content, REQUEST_SERIALIZATION_VERSION_OFFSET)?;
    Ok(AuthenticationRequest {
        cluster_name: decode_string(&mut iter)?,
        username: decode_nullable(&mut iter, decode_string)?,
        password: decode_nullable(&mut iter, decode_string)?,
        client_uuid,
        client_type: decode_string(&mut iter)?,
        serialization_version,
        client_version: decode_string(&mut iter)?,
        client_name: decode_string(&mut iter)?,
        labels: decode_list(&mut iter, decode_string)?,
    })
}

/// Decodes an authentication response.
pub fn decode_response(message: &ClientMessage) -> Result<AuthenticationResponse> {
    if message.message_type() != Some(RESPONSE_MESSAGE_TYPE) {
        return Err(HazelcastError::Decode(format!(
            "expected an authentication response, got message type {:?}",
            message.message_type()
        )));
    }
    let mut iter = message.frame_iter();
    let content = &iter.next_frame()?.content;
    let status = AuthenticationStatus::from_code(decode_byte(content, RESPONSE_STATUS_OFFSET)?)?;
    let member_uuid = decode_uuid(content, RESPONSE_MEMBER_UUID_OFFSET)?;
    let serialization_version = decode_byte(content, RESPONSE_SERIALIZATION_VERSION_OFFSET)?;
    let partition_count = decode_int(content, RESPONSE_PARTITION_COUNT_OFFSET)?;
    let cluster_id = decode_uuid(content, RESPONSE_CLUSTER_ID_OFFSET)?;
    let failover_supported = decode_bool(content, RESPONSE_FAILOVER_SUPPORTED_OFFSET)?;
    let address = decode_nullable(&mut iter, decode_address)?;
    let server_version = decode_string(&mut iter)?;
    Ok(AuthenticationResponse {
        status,
        address,
        member_uuid,
        serialization_version,
        server_version,
        partition_count,
        cluster_id,
        failover_supported,
    })
}

/// Encodes an authentication response, as a member sends it.
pub fn encode_response(response: &AuthenticationResponse, correlation_id: i64) -> ClientMessage {
    let mut message = new_response(RESPONSE_MESSAGE_TYPE, RESPONSE_INITIAL_FRAME_SIZE);
    message.set_correlation_id(correlation_id);
    if let Some(initial) = message.initial_frame_mut() {
        let content = &mut initial.content;
        encode_byte(content, RESPONSE_STATUS_OFFSET, response.status.code());
        encode_uuid(content, RESPONSE_MEMBER_UUID_OFFSET, response.member_uuid);
        encode_byte(
            content,
            RESPONSE_SERIALIZATION_VERSION_OFFSET,
            response.serialization_version,
        );
        encode_int(content, RESPONSE_PARTITION_COUNT_OFFSET, response.partition_count);
        encode_uuid(content, RESPONSE_CLUSTER_ID_OFFSET, response.cluster_id);
        encode_bool(
            content,
            RESPONSE_FAILOVER_SUPPORTED_OFFSET,
            response.failover_supported,
        );
    }
    encode_nullable(&mut message, response.address.as_ref(), encode_address);
    encode_string(&mut message, &response.server_version);
    message
}
