//! Authentication handshake frames.
//!
//! The first frame on every connection is an authentication request carrying
//! the credentials and the client identity; the response seeds the cluster
//! uuid and the partition count. Both directions are encoded here so that
//! in-process cluster simulations speak exactly the client's dialect.

use uuid::Uuid;

use gridcast_core::protocol::constants::CLIENT_AUTHENTICATION;
use gridcast_core::{
    DataInput, DataOutput, GridError, Message, ObjectDataInput, ObjectDataOutput, Result,
};

/// Authentication status byte in the response.
pub const AUTH_STATUS_OK: u8 = 0;
/// The server rejected the supplied credentials.
pub const AUTH_STATUS_CREDENTIALS_FAILED: u8 = 1;
/// The server refused the client (wrong cluster name or incompatible client).
pub const AUTH_STATUS_NOT_ALLOWED: u8 = 2;

/// The authentication request payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationRequest {
    /// The cluster name the client expects to join.
    pub cluster_name: String,
    /// Optional username credential.
    pub username: Option<String>,
    /// Optional password credential.
    pub password: Option<String>,
    /// The client instance name.
    pub client_name: String,
    /// The client instance uuid.
    pub client_uuid: Uuid,
    /// The client library version string.
    pub client_version: String,
    /// Client labels, visible to the cluster.
    pub labels: Vec<String>,
}

impl AuthenticationRequest {
    /// Encodes this request into a frame.
    pub fn encode(&self) -> Result<Message> {
        let mut out = ObjectDataOutput::new();
        out.write_string(&self.cluster_name)?;
        out.write_nullable_string(self.username.as_deref())?;
        out.write_nullable_string(self.password.as_deref())?;
        out.write_string(&self.client_name)?;
        out.write_uuid(self.client_uuid)?;
        out.write_string(&self.client_version)?;
        out.write_int(self.labels.len() as i32)?;
        for label in &self.labels {
            out.write_string(label)?;
        }
        Ok(Message::with_payload(CLIENT_AUTHENTICATION, out.into_buffer()))
    }

    /// Decodes a request from a frame payload.
    pub fn decode(message: &Message) -> Result<Self> {
        let mut input = ObjectDataInput::new(message.payload());
        let cluster_name = input.read_string()?;
        let username = input.read_nullable_string()?;
        let password = input.read_nullable_string()?;
        let client_name = input.read_string()?;
        let client_uuid = input.read_uuid()?;
        let client_version = input.read_string()?;
        let label_count = input.read_int()?;
        let mut labels = Vec::with_capacity(label_count.max(0) as usize);
        for _ in 0..label_count {
            labels.push(input.read_string()?);
        }
        Ok(Self {
            cluster_name,
            username,
            password,
            client_name,
            client_uuid,
            client_version,
            labels,
        })
    }
}

/// The authentication response payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticationResponse {
    /// The status byte; non-zero means the handshake failed.
    pub status: u8,
    /// The uuid of the authenticated member.
    pub member_uuid: Uuid,
    /// The cluster uuid; all connections must agree on it.
    pub cluster_uuid: Uuid,
    /// The cluster's fixed partition count.
    pub partition_count: i32,
    /// The uuid of the member owning the connected address.
    pub owner_uuid: Uuid,
}

impl AuthenticationResponse {
    /// Encodes this response as the payload of a frame answering `request`.
    pub fn encode(&self, correlation_id: i64) -> Result<Message> {
        let mut out = ObjectDataOutput::new();
        out.write_bytes(&[self.status])?;
        out.write_uuid(self.member_uuid)?;
        out.write_uuid(self.cluster_uuid)?;
        out.write_int(self.partition_count)?;
        out.write_uuid(self.owner_uuid)?;
        let mut message = Message::with_payload(CLIENT_AUTHENTICATION, out.into_buffer());
        message.set_correlation_id(correlation_id);
        Ok(message)
    }

    /// Decodes a response from a frame payload.
    pub fn decode(message: &Message) -> Result<Self> {
        let mut input = ObjectDataInput::new(message.payload());
        let status = input.read_byte()? as u8;
        let member_uuid = input.read_uuid()?;
        let cluster_uuid = input.read_uuid()?;
        let partition_count = input.read_int()?;
        let owner_uuid = input.read_uuid()?;
        Ok(Self {
            status,
            member_uuid,
            cluster_uuid,
            partition_count,
            owner_uuid,
        })
    }

    /// Converts a non-OK status into the matching error.
    pub fn check(&self) -> Result<()> {
        match self.status {
            AUTH_STATUS_OK => Ok(()),
            AUTH_STATUS_CREDENTIALS_FAILED => Err(GridError::Authentication(
                "credentials rejected by cluster".to_string(),
            )),
            AUTH_STATUS_NOT_ALLOWED => Err(GridError::Authentication(
                "client not allowed in cluster".to_string(),
            )),
            other => Err(GridError::Authentication(format!(
                "authentication failed with status {}",
                other
            ))),
        }
    }
}
