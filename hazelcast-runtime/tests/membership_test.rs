//! Membership tracking through the public cluster API.

mod common;

use std::sync::{Arc, Mutex};

use uuid::Uuid;

use common::StaticRegistry;
use hazelcast_runtime::{
    CloseReason, ClusterService, InitialMembershipEvent, InitialMembershipListener, Member,
    MemberEvent, MemberEventType, MembershipListener,
};

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<(MemberEventType, Uuid)>>,
    initial: Mutex<Vec<Vec<Uuid>>>,
}

impl Recorder {
    fn events(&self) -> Vec<(MemberEventType, Uuid)> {
        self.events.lock().unwrap().clone()
    }
}

impl MembershipListener for Recorder {
    fn member_added(&self, event: &MemberEvent) {
        self.events
            .lock()
            .unwrap()
            .push((MemberEventType::Added, event.member.uuid));
    }

    fn member_removed(&self, event: &MemberEvent) {
        self.events
            .lock()
            .unwrap()
            .push((MemberEventType::Removed, event.member.uuid));
    }
}

impl InitialMembershipListener for Recorder {
    fn init(&self, event: &InitialMembershipEvent) {
        self.initial
            .lock()
            .unwrap()
            .push(event.members().iter().map(|m| m.uuid).collect());
    }
}

fn member(port: u16) -> Member {
    Member::new(Uuid::new_v4(), format!("127.0.0.1:{}", port).parse().unwrap())
}

#[tokio::test]
async fn test_removals_fire_before_additions() {
    let registry = Arc::new(StaticRegistry::new());
    let cluster = ClusterService::new(registry.clone());
    let recorder = Arc::new(Recorder::default());
    cluster.add_membership_listener(recorder.clone());

    let (a, b, c) = (member(5701), member(5702), member(5703));
    let (to_b, _rx) = registry.add("127.0.0.1:5702".parse().unwrap(), b.uuid);
    cluster.handle_members_view(1, vec![a.clone(), b.clone()]);
    assert!(recorder.events().is_empty());

    let mut stream = cluster.subscribe();
    cluster.handle_members_view(2, vec![a.clone(), c.clone()]);

    assert_eq!(
        recorder.events(),
        vec![
            (MemberEventType::Removed, b.uuid),
            (MemberEventType::Added, c.uuid),
        ]
    );
    let first = stream.recv().await.unwrap();
    assert_eq!(first.event_type, MemberEventType::Removed);
    assert_eq!(first.members.len(), 2);
    assert_eq!(stream.recv().await.unwrap().event_type, MemberEventType::Added);

    assert!(!to_b.is_alive());
    assert_eq!(to_b.close_reason(), Some(CloseReason::MemberLeft));
    assert_eq!(cluster.size(), 2);
    assert!(cluster.get_member(&b.uuid).is_none());
}

#[tokio::test]
async fn test_stale_view_changes_nothing() {
    let cluster = ClusterService::new(Arc::new(StaticRegistry::new()));
    let recorder = Arc::new(Recorder::default());
    cluster.add_membership_listener(recorder.clone());

    let (a, b) = (member(5701), member(5702));
    cluster.handle_members_view(5, vec![a.clone(), b.clone()]);
    cluster.handle_members_view(4, vec![a.clone()]);

    assert_eq!(cluster.member_list_version(), 5);
    assert_eq!(cluster.size(), 2);
    assert!(recorder.events().is_empty());

    cluster.handle_members_view(5, vec![a.clone(), b.clone()]);
    assert!(recorder.events().is_empty());
}

#[tokio::test]
async fn test_cleared_version_accepts_any_next_view() {
    let cluster = ClusterService::new(Arc::new(StaticRegistry::new()));
    let recorder = Arc::new(Recorder::default());
    cluster.add_membership_listener(recorder.clone());

    let (a, b) = (member(5701), member(5702));
    cluster.handle_members_view(9, vec![a.clone()]);
    cluster.clear_member_list_version();
    assert_eq!(cluster.member_list_version(), 0);

    cluster.handle_members_view(1, vec![a.clone(), b.clone()]);
    assert_eq!(cluster.member_list_version(), 1);
    assert_eq!(recorder.events(), vec![(MemberEventType::Added, b.uuid)]);
}

#[tokio::test]
async fn test_initial_listener_sees_the_whole_list_once() {
    let cluster = ClusterService::new(Arc::new(StaticRegistry::new()));
    let early = Arc::new(Recorder::default());
    cluster.add_initial_membership_listener(early.clone());

    let (a, b) = (member(5701), member(5702));
    cluster.handle_members_view(1, vec![a.clone(), b.clone()]);
    assert_eq!(*early.initial.lock().unwrap(), vec![vec![a.uuid, b.uuid]]);
    assert!(early.events().is_empty());

    let late = Arc::new(Recorder::default());
    let id = cluster.add_initial_membership_listener(late.clone());
    assert_eq!(*late.initial.lock().unwrap(), vec![vec![a.uuid, b.uuid]]);

    cluster.handle_members_view(2, vec![a.clone()]);
    assert_eq!(early.events(), vec![(MemberEventType::Removed, b.uuid)]);
    assert_eq!(late.events(), vec![(MemberEventType::Removed, b.uuid)]);
    assert_eq!(early.initial.lock().unwrap().len(), 1);

    assert!(cluster.remove_membership_listener(&id));
    cluster.handle_members_view(3, vec![a.clone(), b.clone()]);
    assert_eq!(late.events().len(), 1);
    assert_eq!(early.events().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_initial_member_list() {
    let cluster = Arc::new(ClusterService::new(Arc::new(StaticRegistry::new())));

    let err = cluster
        .wait_initial_member_list(std::time::Duration::from_secs(1))
        .await;
    assert!(err.is_err());

    let waiter = Arc::clone(&cluster);
    let wait = tokio::spawn(async move {
        waiter
            .wait_initial_member_list(std::time::Duration::from_secs(30))
            .await
    });
    tokio::task::yield_now().await;
    cluster.handle_members_view(1, vec![member(5701)]);
    assert!(wait.await.unwrap().is_ok());

    cluster.reset();
    assert_eq!(cluster.member_list_version(), -1);
    assert!(cluster
        .wait_initial_member_list(std::time::Duration::from_secs(1))
        .await
        .is_err());
}
