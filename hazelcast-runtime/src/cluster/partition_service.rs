//! Partition table maintained from the cluster's partition views.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, RwLock};

use hazelcast_wire::protocol::{data_partition_hash, partition_id_for_hash, Data};
use uuid::Uuid;

use super::ClusterService;
use crate::invocation::PartitionTable;
use crate::sync::{read, write};

/// Represents a single partition in the Hazelcast cluster.
#[derive(Debug, Clone)]
pub struct Partition {
    id: i32,
    owner_uuid: Option<Uuid>,
}

impl Partition {
    /// Creates a new partition with the given ID and optional owner.
    pub fn new(id: i32, owner_uuid: Option<Uuid>) -> Self {
        Self { id, owner_uuid }
    }

    /// Returns the partition ID.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Returns the UUID of the partition owner, if known.
    pub fn owner_uuid(&self) -> Option<Uuid> {
        self.owner_uuid
    }
}

impl PartialEq for Partition {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Partition {}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.owner_uuid {
            Some(uuid) => write!(f, "Partition[id={}, owner={}]", self.id, uuid),
            None => write!(f, "Partition[id={}, owner=unknown]", self.id),
        }
    }
}

#[derive(Debug, Default)]
struct PartitionTableState {
    version: i32,
    owners: HashMap<i32, Uuid>,
}

/// Maps keys to partitions and partitions to the members owning them.
///
/// Owners are tracked by member uuid and resolved to addresses through the
/// [`ClusterService`], so a member that moves keeps its partitions.
#[derive(Debug)]
pub struct PartitionService {
    cluster: Arc<ClusterService>,
    table: RwLock<PartitionTableState>,
    partition_count: AtomicI32,
}

impl PartitionService {
    /// Creates an empty partition table.
    pub fn new(cluster: Arc<ClusterService>) -> Self {
        Self {
            cluster,
            table: RwLock::new(PartitionTableState {
                version: -1,
                owners: HashMap::new(),
            }),
            partition_count: AtomicI32::new(0),
        }
    }

    /// Records the partition count announced during authentication.
    ///
    /// The count is fixed for the lifetime of a cluster; only the first
    /// non-zero value is kept.
    pub fn set_partition_count(&self, count: i32) {
        if count <= 0 {
            return;
        }
        if let Err(existing) =
            self.partition_count
                .compare_exchange(0, count, Ordering::AcqRel, Ordering::Acquire)
        {
            if existing != count {
                tracing::warn!(existing, count, "ignoring a different partition count");
            }
        }
    }

    /// Applies a partition view pushed by the cluster.
    ///
    /// Returns `false` if the view was empty or older than the current table.
    pub fn handle_partitions_view(&self, version: i32, partitions: Vec<(Uuid, Vec<i32>)>) -> bool {
        if partitions.is_empty() {
            return false;
        }

        let mut table = write(&self.table);
        if version < table.version {
            tracing::debug!(version, current = table.version, "ignoring stale partition view");
            return false;
        }

        let mut owners = HashMap::new();
        for (owner, ids) in partitions {
            for id in ids {
                owners.insert(id, owner);
            }
        }
        let count = owners.len() as i32;
        table.version = version;
        table.owners = owners;
        drop(table);

        if self.partition_count.load(Ordering::Acquire) == 0 {
            self.set_partition_count(count);
        }
        tracing::debug!(version, partitions = count, "applied partition view");
        true
    }

    /// Returns the uuid of the member owning `partition_id`.
    pub fn partition_owner_uuid(&self, partition_id: i32) -> Option<Uuid> {
        read(&self.table).owners.get(&partition_id).copied()
    }

    /// Returns the partition with its current owner.
    pub fn get_partition(&self, partition_id: i32) -> Partition {
        Partition::new(partition_id, self.partition_owner_uuid(partition_id))
    }

    /// Returns every partition ordered by id.
    pub fn get_partitions(&self) -> Vec<Partition> {
        (0..self.partition_count())
            .map(|id| self.get_partition(id))
            .collect()
    }

    /// Returns the version of the applied partition view, or -1.
    pub fn partition_table_version(&self) -> i32 {
        read(&self.table).version
    }

    /// Clears the table. The partition count is kept.
    pub fn reset(&self) {
        *write(&self.table) = PartitionTableState {
            version: -1,
            owners: HashMap::new(),
        };
    }
}

impl PartitionTable for PartitionService {
    fn partition_owner(&self, partition_id: i32) -> Option<SocketAddr> {
        let owner = self.partition_owner_uuid(partition_id)?;
        self.cluster.get_member(&owner).map(|m| m.address)
    }

    fn partition_id(&self, key: &Data) -> i32 {
        partition_id_for_hash(data_partition_hash(key), self.partition_count())
    }

    fn partition_count(&self) -> i32 {
        self.partition_count.load(Ordering::Acquire)
    }
}
