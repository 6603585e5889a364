//! Local filesystem state store.
//!
//! One subdirectory per partition, one file per key. Writes go through a
//! temporary file and a rename so a crash never leaves a half-written
//! record behind.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::store::{validate_key, Partition, StateStore};
use strongroom_common::Result;

/// Suffix for in-flight writes; such files are ignored when listing.
const TMP_SUFFIX: &str = ".tmp";

/// Local filesystem state store.
pub struct LocalStateStore {
    root: PathBuf,
}

impl LocalStateStore {
    /// Create a store rooted at the given directory.
    ///
    /// # Postconditions
    /// - The root directory and all partition subdirectories exist
    ///
    /// # Errors
    /// - Permission denied or invalid path
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        // Sync creation in the constructor, matching how the store is
        // built before any runtime exists.
        for partition in Partition::ALL {
            std::fs::create_dir_all(root.join(partition.as_str()))?;
        }

        debug!(root = %root.display(), "opened local state store");
        Ok(Self { root })
    }

    fn entry_path(&self, partition: Partition, key: &str) -> PathBuf {
        self.root.join(partition.as_str()).join(key)
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn put(&self, partition: Partition, key: &str, value: Vec<u8>) -> Result<()> {
        validate_key(key)?;
        let path = self.entry_path(partition, key);
        let tmp = self
            .root
            .join(partition.as_str())
            .join(format!("{}{}", key, TMP_SUFFIX));

        fs::write(&tmp, &value).await?;
        fs::rename(&tmp, &path).await?;

        debug!(partition = %partition, key = %key, bytes = value.len(), "stored state entry");
        Ok(())
    }

    async fn get(&self, partition: Partition, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        let path = self.entry_path(partition, key);

        match fs::read(&path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, partition: Partition, key: &str) -> Result<()> {
        validate_key(key)?;
        let path = self.entry_path(partition, key);

        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(partition = %partition, key = %key, "deleted state entry");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_keys(&self, partition: Partition) -> Result<Vec<String>> {
        let dir = self.root.join(partition.as_str());
        let mut keys = Vec::new();

        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.ends_with(TMP_SUFFIX) {
                    keys.push(name.to_string());
                }
            }
        }

        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let dir = tempdir().unwrap();
        let store = LocalStateStore::new(dir.path()).unwrap();

        store
            .put(Partition::WrappedKeys, "alice", b"record".to_vec())
            .await
            .unwrap();

        let value = store.get(Partition::WrappedKeys, "alice").await.unwrap();
        assert_eq!(value, Some(b"record".to_vec()));
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = tempdir().unwrap();

        {
            let store = LocalStateStore::new(dir.path()).unwrap();
            store
                .put(Partition::IdentityKeys, "k1", vec![42])
                .await
                .unwrap();
        }

        let reopened = LocalStateStore::new(dir.path()).unwrap();
        assert_eq!(
            reopened.get(Partition::IdentityKeys, "k1").await.unwrap(),
            Some(vec![42])
        );
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let dir = tempdir().unwrap();
        let store = LocalStateStore::new(dir.path()).unwrap();

        assert_eq!(store.get(Partition::Config, "nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = LocalStateStore::new(dir.path()).unwrap();

        store.put(Partition::BackupIndex, "b", vec![1]).await.unwrap();
        store.delete(Partition::BackupIndex, "b").await.unwrap();
        store.delete(Partition::BackupIndex, "b").await.unwrap();

        assert_eq!(store.get(Partition::BackupIndex, "b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_keys_scoped_to_partition() {
        let dir = tempdir().unwrap();
        let store = LocalStateStore::new(dir.path()).unwrap();

        store.put(Partition::WrappedKeys, "u1", vec![1]).await.unwrap();
        store.put(Partition::WrappedKeys, "u2", vec![2]).await.unwrap();
        store.put(Partition::IdentityKeys, "k1", vec![3]).await.unwrap();

        let mut keys = store.list_keys(Partition::WrappedKeys).await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["u1", "u2"]);
    }

    #[tokio::test]
    async fn test_traversal_key_rejected() {
        let dir = tempdir().unwrap();
        let store = LocalStateStore::new(dir.path()).unwrap();

        assert!(store
            .put(Partition::Config, "../outside", vec![])
            .await
            .is_err());
        assert!(store.get(Partition::Config, "a/b").await.is_err());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let dir = tempdir().unwrap();
        let store = LocalStateStore::new(dir.path()).unwrap();

        store.put(Partition::Config, "engine", vec![1]).await.unwrap();
        store.put(Partition::Config, "engine", vec![2, 3]).await.unwrap();

        assert_eq!(
            store.get(Partition::Config, "engine").await.unwrap(),
            Some(vec![2, 3])
        );
    }
}
