//! Cluster membership tracking.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use hazelcast_wire::{HazelcastError, Result};
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

use crate::connection::{CloseReason, ConnectionRegistry};
use crate::listener::{
    InitialMembershipEvent, InitialMembershipListener, ListenerId, Member, MemberEvent,
    MemberEventType, MembershipListener,
};
use crate::sync::{lock, read, write};

/// How long [`ClusterService::wait_initial_member_list`] waits by default.
pub const DEFAULT_INITIAL_MEMBERS_TIMEOUT: Duration = Duration::from_secs(120);

const MEMBER_EVENT_CHANNEL_CAPACITY: usize = 256;

/// The member list at one version, as pushed by the cluster.
#[derive(Debug, Clone)]
pub struct MemberListSnapshot {
    version: i32,
    members: Vec<Member>,
}

impl MemberListSnapshot {
    fn new(version: i32, members: Vec<Member>) -> Self {
        Self { version, members }
    }

    /// Returns the member list version.
    pub fn version(&self) -> i32 {
        self.version
    }

    /// Returns the members in cluster order.
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// Returns the member with the given uuid.
    pub fn get(&self, uuid: &Uuid) -> Option<&Member> {
        self.members.iter().find(|m| m.uuid == *uuid)
    }

    fn describe(&self) -> String {
        let mut out = format!("Members [{}] {{", self.members.len());
        for member in &self.members {
            out.push_str("\n\t");
            out.push_str(&member.to_string());
        }
        out.push_str("\n}");
        out
    }
}

#[derive(Clone)]
enum RegisteredListener {
    Membership(Arc<dyn MembershipListener>),
    Initial(Arc<dyn InitialMembershipListener>),
}

impl RegisteredListener {
    fn fire(&self, event: &MemberEvent) {
        match (self, event.event_type) {
            (Self::Membership(l), MemberEventType::Added) => l.member_added(event),
            (Self::Membership(l), MemberEventType::Removed) => l.member_removed(event),
            (Self::Initial(l), MemberEventType::Added) => l.member_added(event),
            (Self::Initial(l), MemberEventType::Removed) => l.member_removed(event),
        }
    }

    fn init(&self, event: &InitialMembershipEvent) {
        if let Self::Initial(l) = self {
            l.init(event);
        }
    }
}

/// Tracks the cluster member list and notifies membership listeners.
///
/// The service starts empty. The first member view is adopted as-is and
/// delivered to initial-membership listeners through `init`; every later
/// view is applied only if its version is not older than the current one,
/// and the difference is published as `REMOVED` events followed by `ADDED`
/// events.
pub struct ClusterService {
    registry: Arc<dyn ConnectionRegistry>,
    snapshot: RwLock<Option<Arc<MemberListSnapshot>>>,
    initial_list: watch::Sender<bool>,
    listeners: Mutex<HashMap<ListenerId, RegisteredListener>>,
    events: broadcast::Sender<MemberEvent>,
}

impl std::fmt::Debug for ClusterService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterService")
            .field("member_list_version", &self.member_list_version())
            .field("size", &self.size())
            .field("listeners", &lock(&self.listeners).len())
            .finish()
    }
}

impl ClusterService {
    /// Creates an empty tracker. Connections to members that leave are
    /// closed through `registry`.
    pub fn new(registry: Arc<dyn ConnectionRegistry>) -> Self {
        let (initial_list, _) = watch::channel(false);
        let (events, _) = broadcast::channel(MEMBER_EVENT_CHANNEL_CAPACITY);
        Self {
            registry,
            snapshot: RwLock::new(None),
            initial_list,
            listeners: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Returns the member with the given uuid, if it is in the current list.
    pub fn get_member(&self, uuid: &Uuid) -> Option<Member> {
        self.snapshot()?.get(uuid).cloned()
    }

    /// Returns the current members.
    pub fn get_members(&self) -> Vec<Member> {
        self.snapshot()
            .map(|s| s.members().to_vec())
            .unwrap_or_default()
    }

    /// Returns the current members accepted by `selector`.
    pub fn get_members_matching<F>(&self, selector: F) -> Vec<Member>
    where
        F: Fn(&Member) -> bool,
    {
        self.snapshot()
            .map(|s| s.members().iter().filter(|m| selector(m)).cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the number of members in the current list.
    pub fn size(&self) -> usize {
        self.snapshot().map_or(0, |s| s.members().len())
    }

    /// Returns the version of the current list, or -1 before the first view.
    pub fn member_list_version(&self) -> i32 {
        self.snapshot().map_or(-1, |s| s.version())
    }

    /// Returns the current snapshot, or `None` before the first view.
    pub fn snapshot(&self) -> Option<Arc<MemberListSnapshot>> {
        read(&self.snapshot).clone()
    }

    /// Registers a listener for membership changes.
    pub fn add_membership_listener(&self, listener: Arc<dyn MembershipListener>) -> ListenerId {
        let id = ListenerId::new();
        lock(&self.listeners).insert(id, RegisteredListener::Membership(listener));
        id
    }

    /// Registers a listener that is first told the whole member list.
    ///
    /// If a member list is already known, `init` is called before this
    /// returns.
    pub fn add_initial_membership_listener(
        &self,
        listener: Arc<dyn InitialMembershipListener>,
    ) -> ListenerId {
        let id = ListenerId::new();
        let registered = RegisteredListener::Initial(listener);
        lock(&self.listeners).insert(id, registered.clone());

        if let Some(snapshot) = self.snapshot() {
            registered.init(&InitialMembershipEvent::new(snapshot.members().to_vec()));
        }
        id
    }

    /// Removes a membership listener. Returns `false` if it was not registered.
    pub fn remove_membership_listener(&self, id: &ListenerId) -> bool {
        lock(&self.listeners).remove(id).is_some()
    }

    /// Subscribes to membership events as a stream.
    pub fn subscribe(&self) -> broadcast::Receiver<MemberEvent> {
        self.events.subscribe()
    }

    /// Waits until the first member list has been applied.
    #[tracing::instrument(skip(self))]
    pub async fn wait_initial_member_list(&self, timeout: Duration) -> Result<()> {
        let mut ready = self.initial_list.subscribe();
        let result = match tokio::time::timeout(timeout, ready.wait_for(|fetched| *fetched)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) | Err(_) => Err(HazelcastError::IllegalState(
                "could not get the initial member list from the cluster".to_string(),
            )),
        };
        result
    }

    /// Sets the version of the current list to 0 so that the next view is
    /// accepted whatever its version. Used when the cluster view listener
    /// moves to another member.
    pub fn clear_member_list_version(&self) {
        let mut guard = write(&self.snapshot);
        if let Some(current) = guard.as_ref() {
            tracing::trace!("resetting the member list version");
            let cleared = MemberListSnapshot::new(0, current.members().to_vec());
            *guard = Some(Arc::new(cleared));
        }
    }

    /// Forgets the member list and re-arms the initial-list signal.
    pub fn reset(&self) {
        tracing::trace!("resetting the member list");
        *write(&self.snapshot) = None;
        self.initial_list.send_replace(false);
    }

    /// Applies a member view pushed by the cluster.
    pub fn handle_members_view(&self, version: i32, members: Vec<Member>) {
        let mut guard = write(&self.snapshot);
        let previous = match guard.clone() {
            None => {
                let snapshot = Arc::new(MemberListSnapshot::new(version, members));
                *guard = Some(Arc::clone(&snapshot));
                drop(guard);
                self.apply_initial_state(&snapshot);
                return;
            }
            Some(current) if version < current.version() => {
                tracing::debug!(
                    version,
                    current = current.version(),
                    "ignoring stale member list"
                );
                return;
            }
            Some(current) => current,
        };

        let current = Arc::new(MemberListSnapshot::new(version, members));
        *guard = Some(Arc::clone(&current));
        drop(guard);

        let events = self.detect_membership_events(&previous, &current);
        if !events.is_empty() {
            tracing::info!(version, "{}", current.describe());
        }
        self.fire(&events);
    }

    fn apply_initial_state(&self, snapshot: &MemberListSnapshot) {
        tracing::info!(version = snapshot.version(), "{}", snapshot.describe());
        let event = InitialMembershipEvent::new(snapshot.members().to_vec());
        for listener in self.listener_list() {
            listener.init(&event);
        }
        self.initial_list.send_replace(true);
    }

    fn detect_membership_events(
        &self,
        previous: &MemberListSnapshot,
        current: &MemberListSnapshot,
    ) -> Vec<MemberEvent> {
        let before: HashSet<&Member> = previous.members().iter().collect();
        let after: HashSet<&Member> = current.members().iter().collect();
        let members = current.members().to_vec();
        let mut events = Vec::new();

        for member in previous.members().iter().filter(|m| !after.contains(m)) {
            events.push(MemberEvent::member_removed(member.clone(), members.clone()));
            if let Some(connection) = self.registry.get_connection(&member.uuid) {
                tracing::info!(member = %member, "closing connection to a member that left");
                self.registry
                    .close_connection(&connection, CloseReason::MemberLeft);
            }
        }

        for member in current.members().iter().filter(|m| !before.contains(m)) {
            events.push(MemberEvent::member_added(member.clone(), members.clone()));
        }
        events
    }

    fn fire(&self, events: &[MemberEvent]) {
        if events.is_empty() {
            return;
        }
        let listeners = self.listener_list();
        for event in events {
            for listener in &listeners {
                listener.fire(event);
            }
            let _ = self.events.send(event.clone());
        }
    }

    fn listener_list(&self) -> Vec<RegisteredListener> {
        lock(&self.listeners).values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticRegistry;
    use std::net::SocketAddr;

    #[derive(Default)]
    struct Recorder {
        log: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.log.lock().unwrap())
        }
    }

    impl MembershipListener for Recorder {
        fn member_added(&self, event: &MemberEvent) {
            self.log.lock().unwrap().push(format!("added {}", event.member.address));
        }

        fn member_removed(&self, event: &MemberEvent) {
            self.log.lock().unwrap().push(format!("removed {}", event.member.address));
        }
    }

    impl InitialMembershipListener for Recorder {
        fn init(&self, event: &InitialMembershipEvent) {
            self.log.lock().unwrap().push(format!("init {}", event.members.len()));
        }
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn service() -> (ClusterService, Arc<StaticRegistry>) {
        let registry = Arc::new(StaticRegistry::new());
        (ClusterService::new(registry.clone()), registry)
    }

    #[test]
    fn test_empty_service() {
        let (cluster, _) = service();
        assert_eq!(cluster.member_list_version(), -1);
        assert_eq!(cluster.size(), 0);
        assert!(cluster.get_members().is_empty());
        assert!(cluster.snapshot().is_none());
    }

    #[test]
    fn test_first_view_initializes_listeners() {
        let (cluster, _) = service();
        let initial = Arc::new(Recorder::default());
        let plain = Arc::new(Recorder::default());
        cluster.add_initial_membership_listener(initial.clone());
        cluster.add_membership_listener(plain.clone());

        let a = Member::new(Uuid::new_v4(), addr(5701));
        let b = Member::new(Uuid::new_v4(), addr(5702));
        cluster.handle_members_view(3, vec![a.clone(), b]);

        assert_eq!(initial.take(), vec!["init 2"]);
        assert!(plain.take().is_empty());
        assert_eq!(cluster.member_list_version(), 3);
        assert_eq!(cluster.get_member(&a.uuid), Some(a));
    }

    #[test]
    fn test_late_initial_listener_gets_synthetic_init() {
        let (cluster, _) = service();
        cluster.handle_members_view(1, vec![Member::new(Uuid::new_v4(), addr(5701))]);

        let late = Arc::new(Recorder::default());
        cluster.add_initial_membership_listener(late.clone());
        assert_eq!(late.take(), vec!["init 1"]);
    }

    #[test]
    fn test_removed_events_fire_before_added() {
        let (cluster, registry) = service();
        let recorder = Arc::new(Recorder::default());
        cluster.add_membership_listener(recorder.clone());

        let a = Member::new(Uuid::new_v4(), addr(5701));
        let b = Member::new(Uuid::new_v4(), addr(5702));
        let c = Member::new(Uuid::new_v4(), addr(5703));
        let (to_b, _rx) = registry.add("127.0.0.1:5702".parse().unwrap(), b.uuid);

        cluster.handle_members_view(1, vec![a.clone(), b]);
        cluster.handle_members_view(2, vec![a, c]);

        assert_eq!(
            recorder.take(),
            vec!["removed 127.0.0.1:5702", "added 127.0.0.1:5703"]
        );
        assert_eq!(to_b.close_reason(), Some(CloseReason::MemberLeft));
    }

    #[test]
    fn test_moved_member_is_removed_then_added() {
        let (cluster, _) = service();
        let recorder = Arc::new(Recorder::default());
        cluster.add_membership_listener(recorder.clone());

        let uuid = Uuid::new_v4();
        cluster.handle_members_view(1, vec![Member::new(uuid, addr(5701))]);
        cluster.handle_members_view(2, vec![Member::new(uuid, addr(5801))]);

        assert_eq!(
            recorder.take(),
            vec!["removed 127.0.0.1:5701", "added 127.0.0.1:5801"]
        );
    }

    #[test]
    fn test_stale_view_is_ignored() {
        let (cluster, _) = service();
        let recorder = Arc::new(Recorder::default());
        cluster.add_membership_listener(recorder.clone());

        let a = Member::new(Uuid::new_v4(), addr(5701));
        cluster.handle_members_view(5, vec![a.clone()]);
        cluster.handle_members_view(4, vec![]);

        assert_eq!(cluster.member_list_version(), 5);
        assert_eq!(cluster.get_members(), vec![a]);
        assert!(recorder.take().is_empty());
    }

    #[test]
    fn test_clear_member_list_version_accepts_lower_version() {
        let (cluster, _) = service();
        cluster.handle_members_view(7, vec![Member::new(Uuid::new_v4(), addr(5701))]);
        cluster.clear_member_list_version();
        assert_eq!(cluster.member_list_version(), 0);

        cluster.handle_members_view(2, vec![]);
        assert_eq!(cluster.member_list_version(), 2);
        assert_eq!(cluster.size(), 0);
    }

    #[test]
    fn test_remove_listener_is_idempotent() {
        let (cluster, _) = service();
        let recorder = Arc::new(Recorder::default());
        let id = cluster.add_membership_listener(recorder.clone());
        assert!(cluster.remove_membership_listener(&id));
        assert!(!cluster.remove_membership_listener(&id));

        cluster.handle_members_view(1, vec![]);
        cluster.handle_members_view(2, vec![Member::new(Uuid::new_v4(), addr(5701))]);
        assert!(recorder.take().is_empty());
    }

    #[test]
    fn test_get_members_matching() {
        let (cluster, _) = service();
        let mut lite = Member::new(Uuid::new_v4(), addr(5702));
        lite.lite_member = true;
        cluster.handle_members_view(1, vec![Member::new(Uuid::new_v4(), addr(5701)), lite]);

        let data_members = cluster.get_members_matching(|m| !m.is_lite_member());
        assert_eq!(data_members.len(), 1);
        assert_eq!(data_members[0].address, addr(5701));
    }

    #[tokio::test]
    async fn test_subscribe_streams_events() {
        let (cluster, _) = service();
        let mut events = cluster.subscribe();
        cluster.handle_members_view(1, vec![]);
        cluster.handle_members_view(2, vec![Member::new(Uuid::new_v4(), addr(5701))]);

        let event = events.recv().await.unwrap();
        assert_eq!(event.event_type, MemberEventType::Added);
        assert_eq!(event.members.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_initial_member_list() {
        let (cluster, _) = service();
        let err = cluster
            .wait_initial_member_list(Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, HazelcastError::IllegalState(_)));

        cluster.handle_members_view(1, vec![]);
        cluster
            .wait_initial_member_list(Duration::from_secs(1))
            .await
            .unwrap();

        cluster.reset();
        assert_eq!(cluster.member_list_version(), -1);
        assert!(cluster
            .wait_initial_member_list(Duration::from_secs(1))
            .await
            .is_err());
    }

    #[test]
    fn test_cluster_service_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ClusterService>();
        assert_send_sync::<MemberListSnapshot>();
    }
}
