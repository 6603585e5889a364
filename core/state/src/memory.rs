//! In-memory state store for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::store::{validate_key, Partition, StateStore};
use strongroom_common::Result;

type PartitionMap = HashMap<String, Vec<u8>>;

/// In-memory state store.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop.
pub struct MemoryStateStore {
    partitions: Arc<RwLock<HashMap<Partition, PartitionMap>>>,
}

impl MemoryStateStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            partitions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put(&self, partition: Partition, key: &str, value: Vec<u8>) -> Result<()> {
        validate_key(key)?;
        let mut partitions = self.partitions.write().unwrap();
        partitions
            .entry(partition)
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, partition: Partition, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        let partitions = self.partitions.read().unwrap();
        Ok(partitions
            .get(&partition)
            .and_then(|map| map.get(key))
            .cloned())
    }

    async fn delete(&self, partition: Partition, key: &str) -> Result<()> {
        validate_key(key)?;
        let mut partitions = self.partitions.write().unwrap();
        if let Some(map) = partitions.get_mut(&partition) {
            map.remove(key);
        }
        Ok(())
    }

    async fn list_keys(&self, partition: Partition) -> Result<Vec<String>> {
        let partitions = self.partitions.read().unwrap();
        Ok(partitions
            .get(&partition)
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default())
    }
}
