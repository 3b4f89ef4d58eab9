//! Consumer of the cluster view listener's events.

use std::sync::Arc;

use hazelcast_wire::protocol::ClientMessage;
use hazelcast_wire::Result;

use super::{ClusterService, PartitionService};
use crate::codec::client_add_cluster_view_listener as cluster_view;
use crate::connection::Connection;
use crate::invocation::{EventHandler, InvocationService};

/// Routes member views to the [`ClusterService`] and partition views to the
/// [`PartitionService`].
#[derive(Debug, Clone)]
pub struct ClusterViewHandler {
    cluster: Arc<ClusterService>,
    partitions: Arc<PartitionService>,
}

impl ClusterViewHandler {
    /// Creates a handler feeding both services.
    pub fn new(cluster: Arc<ClusterService>, partitions: Arc<PartitionService>) -> Self {
        Self {
            cluster,
            partitions,
        }
    }

    /// Registers the cluster view listener over `connection`.
    ///
    /// Returns the correlation id the handler is filed under.
    pub async fn register(
        self: Arc<Self>,
        invocations: &InvocationService,
        connection: Arc<Connection>,
    ) -> Result<i64> {
        let address = connection.address();
        let (_, correlation_id) = invocations
            .invoke_with_handler(cluster_view::encode_request(), connection, self)
            .await?;
        tracing::debug!(%address, correlation_id, "registered cluster view listener");
        Ok(correlation_id)
    }
}

impl EventHandler for ClusterViewHandler {
    fn handle(&self, event: &ClientMessage) {
        match event.message_type() {
            Some(cluster_view::EVENT_MEMBERS_VIEW_MESSAGE_TYPE) => {
                match cluster_view::decode_members_view(event) {
                    Ok(view) => self.cluster.handle_members_view(view.version, view.members),
                    Err(e) => tracing::warn!(error = %e, "malformed members view"),
                }
            }
            Some(cluster_view::EVENT_PARTITIONS_VIEW_MESSAGE_TYPE) => {
                match cluster_view::decode_partitions_view(event) {
                    Ok(view) => {
                        self.partitions
                            .handle_partitions_view(view.version, view.partitions);
                    }
                    Err(e) => tracing::warn!(error = %e, "malformed partitions view"),
                }
            }
            other => tracing::debug!(message_type = ?other, "unexpected cluster view event"),
        }
    }
}
