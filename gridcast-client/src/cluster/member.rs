//! Cluster member identity and membership events.

use std::net::SocketAddr;

use uuid::Uuid;

/// A member of the grid cluster.
///
/// Members are immutable snapshots: a `Member` value describes the member as
/// it appeared in one member-list version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Unique identifier of the member.
    pub uuid: Uuid,
    /// Network address of the member.
    pub address: SocketAddr,
    /// Server version string advertised by the member.
    pub version: String,
    /// Whether this member runs a lite configuration (owns no partitions).
    pub lite: bool,
}

impl Member {
    /// Creates a new data member.
    pub fn new(uuid: Uuid, address: SocketAddr) -> Self {
        Self {
            uuid,
            address,
            version: String::new(),
            lite: false,
        }
    }

    /// Creates a member with an explicit version and lite flag.
    pub fn with_details(uuid: Uuid, address: SocketAddr, version: String, lite: bool) -> Self {
        Self {
            uuid,
            address,
            version,
            lite,
        }
    }

    /// Returns the member's UUID.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Returns the member's network address.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Returns whether this is a lite member.
    pub fn is_lite(&self) -> bool {
        self.lite
    }
}

impl std::fmt::Display for Member {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Member[uuid={}, address={}]", self.uuid, self.address)
    }
}

/// Type of membership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MembershipEventType {
    /// A member joined the cluster.
    Added,
    /// A member left the cluster.
    Removed,
}

impl std::fmt::Display for MembershipEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Added => write!(f, "ADDED"),
            Self::Removed => write!(f, "REMOVED"),
        }
    }
}

/// An event fired when a cluster member joins or leaves.
#[derive(Debug, Clone)]
pub struct MembershipEvent {
    /// The member that triggered the event.
    pub member: Member,
    /// The type of membership change.
    pub event_type: MembershipEventType,
}

impl MembershipEvent {
    /// Creates a member-added event.
    pub fn added(member: Member) -> Self {
        Self {
            member,
            event_type: MembershipEventType::Added,
        }
    }

    /// Creates a member-removed event.
    pub fn removed(member: Member) -> Self {
        Self {
            member,
            event_type: MembershipEventType::Removed,
        }
    }
}

impl std::fmt::Display for MembershipEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MembershipEvent[{} {}]", self.event_type, self.member)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:5701".parse().unwrap()
    }

    #[test]
    fn test_member_creation() {
        let uuid = Uuid::new_v4();
        let member = Member::new(uuid, addr());
        assert_eq!(member.uuid(), uuid);
        assert_eq!(member.address(), addr());
        assert!(!member.is_lite());
    }

    #[test]
    fn test_member_with_details() {
        let member = Member::with_details(Uuid::new_v4(), addr(), "5.3.1".to_string(), true);
        assert_eq!(member.version, "5.3.1");
        assert!(member.is_lite());
    }

    #[test]
    fn test_member_display() {
        let uuid = Uuid::new_v4();
        let member = Member::new(uuid, addr());
        let display = member.to_string();
        assert!(display.contains(&uuid.to_string()));
        assert!(display.contains("127.0.0.1:5701"));
    }

    #[test]
    fn test_membership_event_constructors() {
        let member = Member::new(Uuid::new_v4(), addr());
        assert_eq!(
            MembershipEvent::added(member.clone()).event_type,
            MembershipEventType::Added
        );
        assert_eq!(
            MembershipEvent::removed(member).event_type,
            MembershipEventType::Removed
        );
    }

    #[test]
    fn test_member_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Member>();
        assert_send_sync::<MembershipEvent>();
    }
}
