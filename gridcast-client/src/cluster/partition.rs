//! Partition service: the versioned partition → owning-member table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, RwLock};

use uuid::Uuid;

use gridcast_core::Data;

use crate::event::{ClientEvent, EventDispatcher};

#[derive(Debug, Default)]
struct PartitionTable {
    version: i32,
    owners: HashMap<i32, Uuid>,
}

/// Holds the partition table and the cluster's fixed partition count.
///
/// The count is learned from the first authentication and never changes for
/// the lifetime of the cluster. Ownership updates are monotonic by version:
/// lower-versioned tables are discarded.
#[derive(Debug)]
pub struct PartitionService {
    dispatcher: Arc<EventDispatcher>,
    partition_count: AtomicI32,
    table: RwLock<PartitionTable>,
}

impl PartitionService {
    /// Creates a partition service publishing on the given dispatcher.
    pub fn new(dispatcher: Arc<EventDispatcher>) -> Self {
        Self {
            dispatcher,
            partition_count: AtomicI32::new(0),
            table: RwLock::new(PartitionTable::default()),
        }
    }

    /// Installs the partition count learned from the first handshake.
    ///
    /// The count is write-once: a second install with a different value is
    /// rejected and logged, since subsequent tables may only change
    /// ownership.
    pub fn initialize_count(&self, count: i32) -> bool {
        match self
            .partition_count
            .compare_exchange(0, count, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                tracing::info!(count = count, "learned cluster partition count");
                true
            }
            Err(existing) if existing == count => true,
            Err(existing) => {
                tracing::warn!(
                    existing = existing,
                    incoming = count,
                    "rejecting conflicting partition count"
                );
                false
            }
        }
    }

    /// Returns the cluster partition count, or 0 before the first handshake.
    pub fn partition_count(&self) -> i32 {
        self.partition_count.load(Ordering::Acquire)
    }

    /// Applies a partition-table view.
    ///
    /// Returns `true` if the view was installed, `false` if it was stale.
    pub fn apply_partitions_view(&self, version: i32, owners: HashMap<i32, Uuid>) -> bool {
        {
            let mut table = self.table.write().expect("partition table poisoned");
            if table.version != 0 && version <= table.version {
                tracing::debug!(
                    incoming = version,
                    installed = table.version,
                    "discarding stale partition-table view"
                );
                return false;
            }
            table.version = version;
            table.owners = owners;
        }
        tracing::debug!(version = version, "installed partition-table view");
        self.dispatcher.publish(ClientEvent::PartitionsUpdated { version });
        true
    }

    /// Returns the owning member of the given partition, if known.
    pub fn partition_owner(&self, partition_id: i32) -> Option<Uuid> {
        self.table
            .read()
            .expect("partition table poisoned")
            .owners
            .get(&partition_id)
            .copied()
    }

    /// Returns the installed partition-table version.
    pub fn version(&self) -> i32 {
        self.table.read().expect("partition table poisoned").version
    }

    /// Maps a partitioning hash onto a partition id.
    ///
    /// Returns 0 before the partition count is known; callers fall back to
    /// random routing in that window.
    pub fn partition_id_for_hash(&self, hash: i32) -> i32 {
        let count = self.partition_count();
        if count <= 0 {
            return 0;
        }
        ((hash as i64 & i64::MAX) % count as i64) as i32
    }

    /// Maps a serialized key onto its partition id.
    pub fn partition_id_for(&self, data: &Data) -> i32 {
        self.partition_id_for_hash(data.partition_hash())
    }
}
