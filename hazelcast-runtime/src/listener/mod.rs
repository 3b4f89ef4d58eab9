//! Event listener infrastructure: listener identities, membership and
//! lifecycle events, and the registry that keeps server-side listener
//! registrations alive across connection churn.

use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

mod lifecycle;
mod membership;
mod registry;

pub use lifecycle::LifecycleEvent;
pub use membership::{
    InitialMembershipEvent, InitialMembershipListener, Member, MemberEvent, MemberEventType,
    MemberVersion, MembershipListener,
};
pub use registry::{EventRegistration, ListenerService};

/// Unique identifier for a listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

impl ListenerId {
    /// Creates a new unique listener ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a listener ID from a UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Statistics for listener operations.
#[derive(Debug, Default)]
pub struct ListenerStats {
    registrations: AtomicU64,
    failures: AtomicU64,
    events_received: AtomicU64,
}

impl ListenerStats {
    /// Creates new listener statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the successful server-side registration counter.
    pub fn record_registration(&self) {
        self.registrations.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the failed registration counter.
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the events received counter.
    pub fn record_event(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of successful server-side registrations.
    pub fn registrations(&self) -> u64 {
        self.registrations.load(Ordering::Relaxed)
    }

    /// Returns the number of failed registration attempts.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Returns the number of events received.
    pub fn events_received(&self) -> u64 {
        self.events_received.load(Ordering::Relaxed)
    }
}
