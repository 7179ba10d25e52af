//! Cluster view frames: member-list and partition-table events.
//!
//! The cluster pushes these as server-initiated event frames on the
//! connection that registered the cluster view listener.

use std::collections::HashMap;
use std::net::SocketAddr;

use uuid::Uuid;

use gridcast_core::protocol::constants::{EVENT_MEMBERS_VIEW, EVENT_PARTITIONS_VIEW};
use gridcast_core::{
    DataInput, DataOutput, GridError, Message, ObjectDataInput, ObjectDataOutput, Result,
};

use super::Member;

/// A versioned full member list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembersView {
    /// The member-list version.
    pub version: i32,
    /// The full member list at this version.
    pub members: Vec<Member>,
}

impl MembersView {
    /// Encodes this view as an event frame for the given subscription.
    pub fn encode(&self, correlation_id: i64) -> Result<Message> {
        let mut out = ObjectDataOutput::new();
        out.write_int(self.version)?;
        out.write_int(self.members.len() as i32)?;
        for member in &self.members {
            out.write_uuid(member.uuid)?;
            out.write_string(&member.address.to_string())?;
            out.write_string(&member.version)?;
            out.write_bool(member.lite)?;
        }
        let mut message = Message::with_payload(EVENT_MEMBERS_VIEW, out.into_buffer());
        message.set_correlation_id(correlation_id);
        Ok(message)
    }

    /// Decodes a member-list view from an event frame.
    pub fn decode(message: &Message) -> Result<Self> {
        let mut input = ObjectDataInput::new(message.payload());
        let version = input.read_int()?;
        let count = input.read_int()?;
        let mut members = Vec::with_capacity(count.max(0) as usize);
        for _ in 0..count {
            let uuid = input.read_uuid()?;
            let address: SocketAddr = input.read_string()?.parse().map_err(|e| {
                GridError::Serialization(format!("invalid member address: {}", e))
            })?;
            let server_version = input.read_string()?;
            let lite = input.read_bool()?;
            members.push(Member::with_details(uuid, address, server_version, lite));
        }
        Ok(Self { version, members })
    }
}

/// A versioned partition ownership table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionsView {
    /// The partition-table version.
    pub version: i32,
    /// Partition id to owning member uuid.
    pub owners: HashMap<i32, Uuid>,
}

impl PartitionsView {
    /// Encodes this view as an event frame for the given subscription.
    pub fn encode(&self, correlation_id: i64) -> Result<Message> {
        let mut out = ObjectDataOutput::new();
        out.write_int(self.version)?;
        out.write_int(self.owners.len() as i32)?;
        for (partition_id, owner) in &self.owners {
            out.write_int(*partition_id)?;
            out.write_uuid(*owner)?;
        }
        let mut message = Message::with_payload(EVENT_PARTITIONS_VIEW, out.into_buffer());
        message.set_correlation_id(correlation_id);
        Ok(message)
    }

    /// Decodes a partition-table view from an event frame.
    pub fn decode(message: &Message) -> Result<Self> {
        let mut input = ObjectDataInput::new(message.payload());
        let version = input.read_int()?;
        let count = input.read_int()?;
        let mut owners = HashMap::with_capacity(count.max(0) as usize);
        for _ in 0..count {
            let partition_id = input.read_int()?;
            let owner = input.read_uuid()?;
            owners.insert(partition_id, owner);
        }
        Ok(Self { version, owners })
    }
}
