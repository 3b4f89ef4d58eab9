//! Cluster membership and partition ownership.

mod cluster_service;
mod partition_service;
mod view_handler;

pub use cluster_service::{ClusterService, MemberListSnapshot, DEFAULT_INITIAL_MEMBERS_TIMEOUT};
pub use partition_service::{Partition, PartitionService};
pub use view_handler::ClusterViewHandler;
