//! Invalidation metadata and the handler that applies invalidation events.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use hazelcast_wire::protocol::builtin::string_data;
use hazelcast_wire::protocol::{ClientMessage, Data};
use uuid::Uuid;

use super::NearCache;
use crate::codec::map_add_near_cache_invalidation_listener as invalidation;
use crate::invocation::{EventHandler, PartitionTable};
use crate::sync::lock;

/// Invalidation metadata captured when a record is published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordMetadata {
    /// The partition the key belongs to.
    pub partition_id: i32,
    /// The partition's invalidation sequence at publish time.
    pub sequence: i64,
    /// The partition uuid at publish time.
    pub uuid: Option<Uuid>,
}

/// Invalidation state of one partition as observed by this client.
#[derive(Debug, Default)]
pub struct MetaDataContainer {
    sequence: AtomicI64,
    stale_sequence: AtomicI64,
    missed_sequence_count: AtomicI64,
    uuid: Mutex<Option<Uuid>>,
}

impl MetaDataContainer {
    /// Creates an empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the last applied invalidation sequence.
    pub fn sequence(&self) -> i64 {
        self.sequence.load(Ordering::Acquire)
    }

    /// Moves the sequence from `current` to `next`.
    pub fn cas_sequence(&self, current: i64, next: i64) -> bool {
        self.sequence
            .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Resets the sequence to zero.
    pub fn reset_sequence(&self) {
        self.sequence.store(0, Ordering::Release);
    }

    /// Returns the sequence below which records are stale.
    pub fn stale_sequence(&self) -> i64 {
        self.stale_sequence.load(Ordering::Acquire)
    }

    /// Raises the stale sequence to at least `sequence`.
    pub fn update_stale_sequence(&self, sequence: i64) {
        self.stale_sequence.fetch_max(sequence, Ordering::AcqRel);
    }

    /// Resets the stale sequence to zero.
    pub fn reset_stale_sequence(&self) {
        self.stale_sequence.store(0, Ordering::Release);
    }

    /// Returns how many invalidations were never received.
    pub fn missed_sequence_count(&self) -> i64 {
        self.missed_sequence_count.load(Ordering::Acquire)
    }

    /// Adds to the missed count and returns the new total.
    pub fn add_missed_sequences(&self, count: i64) -> i64 {
        self.missed_sequence_count.fetch_add(count, Ordering::AcqRel) + count
    }

    /// Returns the partition uuid.
    pub fn uuid(&self) -> Option<Uuid> {
        *lock(&self.uuid)
    }

    /// Replaces the uuid if it still equals `previous`.
    pub fn cas_uuid(&self, previous: Option<Uuid>, new: Option<Uuid>) -> bool {
        let mut uuid = lock(&self.uuid);
        if *uuid != previous {
            return false;
        }
        *uuid = new;
        true
    }
}

/// Decides whether a cached record may still be served.
pub trait StaleReadDetector: Send + Sync + fmt::Debug {
    /// Returns the partition of a serialized key.
    fn partition_id(&self, key: &Data) -> i32;

    /// Returns the metadata container of a partition.
    fn metadata_container(&self, partition_id: i32) -> Arc<MetaDataContainer>;

    /// Returns `true` if a record published with `metadata` is outdated.
    fn is_stale_read(&self, key: &Data, metadata: &RecordMetadata) -> bool;
}

/// Compares record metadata with the per-partition containers.
///
/// A record is stale once its partition uuid changed, or when its sequence
/// is below the partition's stale sequence.
#[derive(Debug)]
pub struct MetadataStaleReadDetector {
    partitions: Arc<dyn PartitionTable>,
    containers: Mutex<HashMap<i32, Arc<MetaDataContainer>>>,
}

impl MetadataStaleReadDetector {
    /// Creates a detector resolving partitions through `partitions`.
    pub fn new(partitions: Arc<dyn PartitionTable>) -> Self {
        Self {
            partitions,
            containers: Mutex::new(HashMap::new()),
        }
    }
}

impl StaleReadDetector for MetadataStaleReadDetector {
    fn partition_id(&self, key: &Data) -> i32 {
        self.partitions.partition_id(key)
    }

    fn metadata_container(&self, partition_id: i32) -> Arc<MetaDataContainer> {
        Arc::clone(lock(&self.containers).entry(partition_id).or_default())
    }

    fn is_stale_read(&self, _key: &Data, metadata: &RecordMetadata) -> bool {
        let container = self.metadata_container(metadata.partition_id);
        metadata.uuid != container.uuid() || metadata.sequence < container.stale_sequence()
    }
}

/// Applies a map's invalidation events to its near cache and keeps the
/// partition metadata in step.
pub struct RepairingHandler<V> {
    name: String,
    local_uuid: Option<Uuid>,
    near_cache: Arc<NearCache<V>>,
    detector: Arc<MetadataStaleReadDetector>,
}

impl<V> fmt::Debug for RepairingHandler<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepairingHandler")
            .field("name", &self.name)
            .field("local_uuid", &self.local_uuid)
            .finish()
    }
}

impl<V: Clone> RepairingHandler<V> {
    /// Creates a handler for map `name`.
    ///
    /// `near_cache` should consult the same `detector`. Invalidations caused
    /// by `local_uuid` keep the cached value and only update metadata.
    pub fn new(
        name: impl Into<String>,
        local_uuid: Option<Uuid>,
        near_cache: Arc<NearCache<V>>,
        detector: Arc<MetadataStaleReadDetector>,
    ) -> Self {
        Self {
            name: name.into(),
            local_uuid,
            near_cache,
            detector,
        }
    }

    /// Returns the map name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Applies one invalidation. A missing key clears the whole cache.
    pub fn handle_invalidation(
        &self,
        key: Option<&Data>,
        source_uuid: Option<Uuid>,
        partition_uuid: Option<Uuid>,
        sequence: i64,
    ) {
        let local = source_uuid.is_some() && source_uuid == self.local_uuid;
        if !local {
            match key {
                Some(key) => self.near_cache.invalidate(key),
                None => self.near_cache.clear(),
            }
        }

        let partition_id = match key {
            Some(key) => self.detector.partition_id(key),
            None => self.detector.partition_id(&string_data(&self.name)),
        };
        self.check_or_repair_uuid(partition_id, partition_uuid);
        self.check_or_repair_sequence(partition_id, sequence);
    }

    fn check_or_repair_uuid(&self, partition_id: i32, new_uuid: Option<Uuid>) {
        let container = self.detector.metadata_container(partition_id);
        loop {
            let previous = container.uuid();
            if previous == new_uuid {
                return;
            }
            if container.cas_uuid(previous, new_uuid) {
                container.reset_sequence();
                container.reset_stale_sequence();
                tracing::debug!(
                    map = %self.name,
                    partition_id,
                    uuid = ?new_uuid,
                    "partition uuid changed"
                );
                return;
            }
        }
    }

    fn check_or_repair_sequence(&self, partition_id: i32, next: i64) {
        let container = self.detector.metadata_container(partition_id);
        loop {
            let current = container.sequence();
            if current >= next {
                return;
            }
            if container.cas_sequence(current, next) {
                let gap = next - current;
                if gap > 1 {
                    let missed = container.add_missed_sequences(gap - 1);
                    container.update_stale_sequence(next);
                    tracing::debug!(
                        map = %self.name,
                        partition_id,
                        expected = current + 1,
                        received = next,
                        missed,
                        "missed invalidation sequences"
                    );
                }
                return;
            }
        }
    }
}

impl<V: Clone + Send + Sync> EventHandler for RepairingHandler<V> {
    fn handle(&self, event: &ClientMessage) {
        match event.message_type() {
            Some(invalidation::EVENT_INVALIDATION_MESSAGE_TYPE) => {
                match invalidation::decode_invalidation_event(event) {
                    Ok(e) => self.handle_invalidation(
                        e.key.as_ref(),
                        e.source_uuid,
                        e.partition_uuid,
                        e.sequence,
                    ),
                    Err(e) => tracing::warn!(map = %self.name, error = %e, "malformed invalidation"),
                }
            }
            Some(invalidation::EVENT_BATCH_INVALIDATION_MESSAGE_TYPE) => {
                match invalidation::decode_batch_invalidation_event(event) {
                    Ok(batch) => {
                        tracing::trace!(map = %self.name, keys = batch.keys.len(), "batch invalidation");
                        for (i, key) in batch.keys.iter().enumerate() {
                            self.handle_invalidation(
                                Some(key),
                                Some(batch.source_uuids[i]),
                                Some(batch.partition_uuids[i]),
                                batch.sequences[i],
                            );
                        }
                    }
                    Err(e) => {
                        tracing::warn!(map = %self.name, error = %e, "malformed batch invalidation")
                    }
                }
            }
            other => tracing::debug!(map = %self.name, message_type = ?other, "unexpected near cache event"),
        }
    }
}
