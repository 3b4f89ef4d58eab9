//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::{FramedRead, FramedWrite};
use uuid::Uuid;

use hazelcast_runtime::codec::client_add_cluster_view_listener::{
    self as cluster_view, MembersView, PartitionsView,
};
use hazelcast_runtime::codec::client_authentication::{
    self, AuthenticationResponse, AuthenticationStatus, SERIALIZATION_VERSION,
};
use hazelcast_runtime::codec::{
    client_ping, map_add_near_cache_invalidation_listener as invalidation,
    map_remove_entry_listener,
};
use hazelcast_runtime::wire::protocol::{
    ClientMessage, ClientMessageCodec, CLIENT_PROTOCOL_PREAMBLE,
};
use hazelcast_runtime::{ClientConfig, ClientConfigBuilder, Member};

pub use hazelcast_runtime::testing::{ListenerMember, NoPartitions, StaticRegistry};

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

pub const PARTITION_COUNT: i32 = 271;

pub fn unique_name(prefix: &str) -> String {
    let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("{}-{}-{}", prefix, std::process::id(), id)
}

pub fn client_config(addresses: Vec<SocketAddr>) -> ClientConfigBuilder {
    ClientConfigBuilder::new()
        .cluster_name("dev")
        .addresses(addresses)
        .connection_timeout(Duration::from_secs(2))
        .retry(|r| r.max_attempts(2).initial_backoff(Duration::from_millis(50)))
}

pub fn build(builder: ClientConfigBuilder) -> ClientConfig {
    builder.build().expect("failed to build config")
}

/// Reads `count` requests written to a detached connection.
pub async fn next_requests(
    rx: &mut mpsc::UnboundedReceiver<ClientMessage>,
    count: usize,
) -> Vec<ClientMessage> {
    let mut requests = Vec::with_capacity(count);
    while requests.len() < count {
        let request = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for a request")
            .expect("connection dropped");
        requests.push(request);
    }
    requests
}

/// A TCP server playing a single-member cluster.
///
/// It authenticates every client, answers pings, accepts near-cache
/// invalidation listeners, and pushes its member list and partition table
/// when a cluster view listener registers.
pub struct MockMember {
    pub address: SocketAddr,
    pub uuid: Uuid,
    received: Arc<Mutex<Vec<i32>>>,
    invalidation_correlation: Arc<AtomicI64>,
    pushes: broadcast::Sender<ClientMessage>,
    hang_up: broadcast::Sender<()>,
}

impl MockMember {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let uuid = Uuid::new_v4();
        let received = Arc::new(Mutex::new(Vec::new()));
        let invalidation_correlation = Arc::new(AtomicI64::new(-1));
        let (pushes, _) = broadcast::channel(64);
        let (hang_up, _) = broadcast::channel(4);

        let member = Self {
            address,
            uuid,
            received: Arc::clone(&received),
            invalidation_correlation: Arc::clone(&invalidation_correlation),
            pushes: pushes.clone(),
            hang_up: hang_up.clone(),
        };

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let received = Arc::clone(&received);
                let invalidation_correlation = Arc::clone(&invalidation_correlation);
                let mut pushes = pushes.subscribe();
                let mut hang_up = hang_up.subscribe();

                tokio::spawn(async move {
                    let mut preamble = [0u8; 3];
                    if socket.read_exact(&mut preamble).await.is_err() {
                        return;
                    }
                    assert_eq!(&preamble, CLIENT_PROTOCOL_PREAMBLE);

                    let (r, w) = socket.into_split();
                    let mut reader = FramedRead::new(r, ClientMessageCodec::new());
                    let mut writer = FramedWrite::new(w, ClientMessageCodec::new());

                    loop {
                        tokio::select! {
                            request = reader.next() => {
                                let Some(Ok(Ok(request))) = request else {
                                    return;
                                };
                                let message_type = request.message_type().unwrap_or_default();
                                received.lock().unwrap().push(message_type);
                                let correlation_id = request.correlation_id().unwrap_or_default();
                                if message_type == invalidation::REQUEST_MESSAGE_TYPE {
                                    invalidation_correlation.store(correlation_id, Ordering::SeqCst);
                                }
                                for mut reply in replies(address, uuid, &request) {
                                    reply.set_correlation_id(correlation_id);
                                    if writer.send(reply).await.is_err() {
                                        return;
                                    }
                                }
                            }
                            push = pushes.recv() => {
                                let Ok(push) = push else { return };
                                if writer.send(push).await.is_err() {
                                    return;
                                }
                            }
                            _ = hang_up.recv() => return,
                        }
                    }
                });
            }
        });
        member
    }

    /// Returns the message types received so far, authentication included.
    pub fn received(&self) -> Vec<i32> {
        self.received.lock().unwrap().clone()
    }

    /// Returns how many requests of `message_type` arrived.
    pub fn count(&self, message_type: i32) -> usize {
        self.received()
            .into_iter()
            .filter(|t| *t == message_type)
            .count()
    }

    /// Pushes an invalidation event to the last registered near-cache
    /// listener.
    pub fn push_invalidation(&self, mut event: ClientMessage) {
        event.set_correlation_id(self.invalidation_correlation.load(Ordering::SeqCst));
        let _ = self.pushes.send(event);
    }

    /// Drops every open client socket.
    pub fn hang_up(&self) {
        let _ = self.hang_up.send(());
    }
}

fn replies(address: SocketAddr, uuid: Uuid, request: &ClientMessage) -> Vec<ClientMessage> {
    match request.message_type() {
        Some(client_authentication::REQUEST_MESSAGE_TYPE) => {
            let response = AuthenticationResponse {
                status: AuthenticationStatus::Authenticated,
                address: Some(address),
                member_uuid: Some(uuid),
                serialization_version: SERIALIZATION_VERSION,
                server_version: "5.3.0".to_string(),
                partition_count: PARTITION_COUNT,
                cluster_id: Some(Uuid::nil()),
                failover_supported: false,
            };
            vec![client_authentication::encode_response(&response, 0)]
        }
        Some(cluster_view::REQUEST_MESSAGE_TYPE) => vec![
            cluster_view::encode_response(),
            cluster_view::encode_members_view(&MembersView {
                version: 1,
                members: vec![Member::new(uuid, address)],
            }),
            cluster_view::encode_partitions_view(&PartitionsView {
                version: 1,
                partitions: vec![(uuid, (0..PARTITION_COUNT).collect())],
            }),
        ],
        Some(client_ping::REQUEST_MESSAGE_TYPE) => vec![client_ping::encode_response()],
        Some(invalidation::REQUEST_MESSAGE_TYPE) => {
            vec![invalidation::encode_response(Uuid::new_v4())]
        }
        Some(map_remove_entry_listener::REQUEST_MESSAGE_TYPE) => {
            vec![map_remove_entry_listener::encode_response(true)]
        }
        _ => Vec::new(),
    }
}

/// Polls `condition` until it holds or five seconds pass.
pub async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 5s"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
