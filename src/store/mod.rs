//! Partition storage.
//!
//! A partition is a named namespace of (request key → response snapshot)
//! pairs. The store is handed to the controller as an injected dependency;
//! nothing else writes to it. Partitions are created lazily on first write
//! and only ever deleted wholesale.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{ResponseSnapshot, SnapshotKey};

pub(crate) mod lock;

use lock::{rw_read, rw_write};

const SOURCE: &str = "store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("partition backend error: {message}")]
    Backend { message: String },
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

/// Host-provided partitioned blob cache.
///
/// Same-key access is serialized by the implementation; concurrent handlers
/// never observe a partially written snapshot.
#[async_trait]
pub trait PartitionStore: Send + Sync {
    /// Look up a snapshot. A missing partition reads as a miss, not an error.
    async fn get(
        &self,
        partition: &str,
        key: &SnapshotKey,
    ) -> Result<Option<ResponseSnapshot>, StoreError>;

    /// Write a snapshot, creating the partition if needed.
    async fn put(
        &self,
        partition: &str,
        key: SnapshotKey,
        snapshot: ResponseSnapshot,
    ) -> Result<(), StoreError>;

    /// Remove a single entry. Returns whether it existed.
    async fn delete(&self, partition: &str, key: &SnapshotKey) -> Result<bool, StoreError>;

    /// Names of every existing partition.
    async fn list_names(&self) -> Result<Vec<String>, StoreError>;

    /// Delete a partition and all of its entries. Returns whether it existed.
    async fn delete_partition(&self, name: &str) -> Result<bool, StoreError>;
}

/// In-memory partition store backing the gateway process.
///
/// Spans the controller's whole lifetime, across every page the gateway
/// serves. Interior mutability with poison recovery; a panic while holding
/// the lock must not wedge every later request.
#[derive(Default)]
pub struct MemoryStore {
    partitions: RwLock<HashMap<String, HashMap<SnapshotKey, ResponseSnapshot>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries in a partition; `None` when it does not exist.
    pub fn partition_len(&self, name: &str) -> Option<usize> {
        rw_read(&self.partitions, SOURCE, "partition_len")
            .get(name)
            .map(HashMap::len)
    }
}

#[async_trait]
impl PartitionStore for MemoryStore {
    async fn get(
        &self,
        partition: &str,
        key: &SnapshotKey,
    ) -> Result<Option<ResponseSnapshot>, StoreError> {
        Ok(rw_read(&self.partitions, SOURCE, "get")
            .get(partition)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    async fn put(
        &self,
        partition: &str,
        key: SnapshotKey,
        snapshot: ResponseSnapshot,
    ) -> Result<(), StoreError> {
        rw_write(&self.partitions, SOURCE, "put")
            .entry(partition.to_string())
            .or_default()
            .insert(key, snapshot);
        Ok(())
    }

    async fn delete(&self, partition: &str, key: &SnapshotKey) -> Result<bool, StoreError> {
        Ok(rw_write(&self.partitions, SOURCE, "delete")
            .get_mut(partition)
            .is_some_and(|entries| entries.remove(key).is_some()))
    }

    async fn list_names(&self) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = rw_read(&self.partitions, SOURCE, "list_names")
            .keys()
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }

    async fn delete_partition(&self, name: &str) -> Result<bool, StoreError> {
        Ok(rw_write(&self.partitions, SOURCE, "delete_partition")
            .remove(name)
            .is_some())
    }
}
