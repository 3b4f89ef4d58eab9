//! Membership listener infrastructure for cluster member events.

use std::collections::HashMap;
use std::net::SocketAddr;

use uuid::Uuid;

/// Type of membership event fired when cluster topology changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum MemberEventType {
    /// A new member joined the cluster.
    Added = 1,
    /// A member left the cluster.
    Removed = 2,
}

impl MemberEventType {
    /// Returns the wire format value for this event type.
    pub fn value(self) -> i32 {
        self as i32
    }
}

impl std::fmt::Display for MemberEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Added => write!(f, "ADDED"),
            Self::Removed => write!(f, "REMOVED"),
        }
    }
}

/// Codebase version a member runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MemberVersion {
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
    /// Patch version.
    pub patch: u8,
}

impl MemberVersion {
    /// Creates a member version.
    pub fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl std::fmt::Display for MemberVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Represents a member of the Hazelcast cluster.
///
/// Two members are equal when both their uuid and address match; a member
/// that restarts on a new address is a different member.
#[derive(Debug, Clone)]
pub struct Member {
    /// Unique identifier of the member.
    pub uuid: Uuid,
    /// Network address of the member.
    pub address: SocketAddr,
    /// Custom attributes associated with the member.
    pub attributes: HashMap<String, String>,
    /// Whether this member runs a lite configuration.
    pub lite_member: bool,
    /// Codebase version of the member.
    pub version: MemberVersion,
}

impl Member {
    /// Creates a new cluster member.
    pub fn new(uuid: Uuid, address: SocketAddr) -> Self {
        Self {
            uuid,
            address,
            attributes: HashMap::new(),
            lite_member: false,
            version: MemberVersion::default(),
        }
    }

    /// Creates a new cluster member with attributes.
    pub fn with_attributes(
        uuid: Uuid,
        address: SocketAddr,
        attributes: HashMap<String, String>,
        lite_member: bool,
        version: MemberVersion,
    ) -> Self {
        Self {
            uuid,
            address,
            attributes,
            lite_member,
            version,
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

    /// Returns the member's attributes.
    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    /// Returns whether this is a lite member.
    pub fn is_lite_member(&self) -> bool {
        self.lite_member
    }

    /// Returns the member's codebase version.
    pub fn version(&self) -> MemberVersion {
        self.version
    }
}

impl PartialEq for Member {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid && self.address == other.address
    }
}

impl Eq for Member {}

impl std::hash::Hash for Member {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.uuid.hash(state);
    }
}

impl std::fmt::Display for Member {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Member[uuid={}, address={}]", self.uuid, self.address)?;
        if self.lite_member {
            write!(f, " lite")?;
        }
        Ok(())
    }
}

/// An event delivered to an initial membership listener with the member
/// list current at the time it is fired.
#[derive(Debug, Clone)]
pub struct InitialMembershipEvent {
    /// The current members of the cluster.
    pub members: Vec<Member>,
}

impl InitialMembershipEvent {
    /// Creates a new initial membership event.
    pub fn new(members: Vec<Member>) -> Self {
        Self { members }
    }

    /// Returns the current cluster members.
    pub fn members(&self) -> &[Member] {
        &self.members
    }
}

impl std::fmt::Display for InitialMembershipEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "InitialMembershipEvent[members={}]", self.members.len())
    }
}

/// An event fired when a cluster member joins or leaves.
#[derive(Debug, Clone)]
pub struct MemberEvent {
    /// The member that triggered the event.
    pub member: Member,
    /// The type of membership change.
    pub event_type: MemberEventType,
    /// The member list after the change was applied.
    pub members: Vec<Member>,
}

impl MemberEvent {
    /// Creates a new membership event.
    pub fn new(member: Member, event_type: MemberEventType, members: Vec<Member>) -> Self {
        Self {
            member,
            event_type,
            members,
        }
    }

    /// Creates an event for a member that joined the cluster.
    pub fn member_added(member: Member, members: Vec<Member>) -> Self {
        Self::new(member, MemberEventType::Added, members)
    }

    /// Creates an event for a member that left the cluster.
    pub fn member_removed(member: Member, members: Vec<Member>) -> Self {
        Self::new(member, MemberEventType::Removed, members)
    }
}

impl std::fmt::Display for MemberEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MemberEvent[{} {}]", self.member, self.event_type)
    }
}

/// Trait for listening to cluster membership changes.
pub trait MembershipListener: Send + Sync {
    /// Called when a new member joins the cluster.
    fn member_added(&self, event: &MemberEvent);

    /// Called when a member leaves the cluster.
    fn member_removed(&self, event: &MemberEvent);
}

/// Trait for listening to cluster membership changes with initial state.
///
/// `init` is called with the full member list instead of a burst of
/// `member_added` calls, either when the first member list arrives or
/// immediately on registration if one is already known.
pub trait InitialMembershipListener: MembershipListener {
    /// Called with the member list current at delivery time.
    fn init(&self, event: &InitialMembershipEvent);
}
