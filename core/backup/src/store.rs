//! Backup storage interface.
//!
//! Backup records typically live off-device (cloud object storage, a
//! sync server); the service treats the store as unreliable and retries
//! transient failures. Records are scoped by user: one user can never
//! see or delete another user's backups.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;

use strongroom_common::{BackupId, Error, Result, UserId};

use crate::record::BackupRecord;

/// Storage backend for backup records.
#[async_trait]
pub trait BackupStore: Send + Sync {
    /// Store a new record.
    ///
    /// # Errors
    /// - Returns error if a record with the same id already exists
    async fn create(&self, record: &BackupRecord) -> Result<()>;

    /// Fetch a record by id, scoped to its owning user.
    async fn get(&self, user_id: &UserId, backup_id: &BackupId) -> Result<Option<BackupRecord>>;

    /// Overwrite an existing record.
    ///
    /// # Errors
    /// - Returns `NoKeyFound` if the record does not exist
    async fn update(&self, record: &BackupRecord) -> Result<()>;

    /// List all of a user's records.
    async fn list(&self, user_id: &UserId) -> Result<Vec<BackupRecord>>;

    /// Delete a record. Deleting an absent record succeeds.
    async fn delete(&self, user_id: &UserId, backup_id: &BackupId) -> Result<()>;
}

/// In-memory backup store for tests and development.
///
/// Supports failure injection so service tests can exercise the retry
/// path.
pub struct MemoryBackupStore {
    records: RwLock<HashMap<(String, String), BackupRecord>>,
    fail_remaining: AtomicU32,
}

impl MemoryBackupStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            fail_remaining: AtomicU32::new(0),
        }
    }

    /// Make the next `count` operations fail with a transient error.
    pub fn fail_next(&self, count: u32) {
        self.fail_remaining.store(count, Ordering::SeqCst);
    }

    /// Number of stored records across all users.
    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_failure(&self) -> Result<()> {
        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::State("backup store unavailable".to_string()));
        }
        Ok(())
    }

    fn key_for(record: &BackupRecord) -> (String, String) {
        (
            record.user_id.as_str().to_string(),
            record.backup_id.as_str().to_string(),
        )
    }
}

impl Default for MemoryBackupStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackupStore for MemoryBackupStore {
    async fn create(&self, record: &BackupRecord) -> Result<()> {
        self.check_failure()?;
        let mut records = self.records.write().unwrap();
        let key = Self::key_for(record);
        if records.contains_key(&key) {
            return Err(Error::InvalidInput(format!(
                "backup {} already exists",
                record.backup_id
            )));
        }
        records.insert(key, record.clone());
        Ok(())
    }

    async fn get(&self, user_id: &UserId, backup_id: &BackupId) -> Result<Option<BackupRecord>> {
        self.check_failure()?;
        let records = self.records.read().unwrap();
        let key = (
            user_id.as_str().to_string(),
            backup_id.as_str().to_string(),
        );
        Ok(records.get(&key).cloned())
    }

    async fn update(&self, record: &BackupRecord) -> Result<()> {
        self.check_failure()?;
        let mut records = self.records.write().unwrap();
        let key = Self::key_for(record);
        if !records.contains_key(&key) {
            return Err(Error::NoKeyFound(record.backup_id.as_str().to_string()));
        }
        records.insert(key, record.clone());
        Ok(())
    }

    async fn list(&self, user_id: &UserId) -> Result<Vec<BackupRecord>> {
        self.check_failure()?;
        let records = self.records.read().unwrap();
        let mut result: Vec<BackupRecord> = records
            .iter()
            .filter(|((user, _), _)| user == user_id.as_str())
            .map(|(_, record)| record.clone())
            .collect();
        result.sort_by_key(|r| r.created_at);
        Ok(result)
    }

    async fn delete(&self, user_id: &UserId, backup_id: &BackupId) -> Result<()> {
        self.check_failure()?;
        let mut records = self.records.write().unwrap();
        let key = (
            user_id.as_str().to_string(),
            backup_id.as_str().to_string(),
        );
        records.remove(&key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use strongroom_crypto::{KdfParams, Salt};

    use crate::record::BACKUP_VERSION;

    fn record(user: &str, id: &str) -> BackupRecord {
        let now = Utc::now();
        BackupRecord {
            backup_id: BackupId::new(id).unwrap(),
            user_id: UserId::new(user).unwrap(),
            encrypted_private_key: vec![1, 2, 3],
            public_key: vec![7u8; 32],
            salt: Salt::from_bytes([3u8; 16]),
            kdf_params: KdfParams::interactive(),
            device_label: "test device".to_string(),
            version: BACKUP_VERSION,
            created_at: now,
            last_accessed_at: now,
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = MemoryBackupStore::new();
        let record = record("alice", "b-1");

        store.create(&record).await.unwrap();

        let fetched = store
            .get(&record.user_id, &record.backup_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.backup_id, record.backup_id);
    }

    #[tokio::test]
    async fn test_duplicate_create_fails() {
        let store = MemoryBackupStore::new();
        let record = record("alice", "b-1");

        store.create(&record).await.unwrap();
        assert!(store.create(&record).await.is_err());
    }

    #[tokio::test]
    async fn test_update_requires_existing_record() {
        let store = MemoryBackupStore::new();
        let record = record("alice", "b-1");

        let result = store.update(&record).await;
        assert!(matches!(result, Err(Error::NoKeyFound(_))));

        store.create(&record).await.unwrap();
        let mut changed = record.clone();
        changed.device_label = "renamed".to_string();
        store.update(&changed).await.unwrap();

        let fetched = store
            .get(&record.user_id, &record.backup_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.device_label, "renamed");
    }

    #[tokio::test]
    async fn test_list_is_scoped_by_user() {
        let store = MemoryBackupStore::new();
        store.create(&record("alice", "b-1")).await.unwrap();
        store.create(&record("alice", "b-2")).await.unwrap();
        store.create(&record("bob", "b-3")).await.unwrap();

        let alice = UserId::new("alice").unwrap();
        let listed = store.list(&alice).await.unwrap();

        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|r| r.user_id == alice));
    }

    #[tokio::test]
    async fn test_get_is_scoped_by_user() {
        let store = MemoryBackupStore::new();
        let record = record("alice", "b-1");
        store.create(&record).await.unwrap();

        let bob = UserId::new("bob").unwrap();
        assert!(store
            .get(&bob, &record.backup_id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryBackupStore::new();
        let record = record("alice", "b-1");
        store.create(&record).await.unwrap();

        store.delete(&record.user_id, &record.backup_id).await.unwrap();
        store.delete(&record.user_id, &record.backup_id).await.unwrap();

        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_failure_injection_is_transient() {
        let store = MemoryBackupStore::new();
        let record = record("alice", "b-1");

        store.fail_next(1);
        let err = store.create(&record).await.unwrap_err();
        assert!(err.is_transient());

        store.create(&record).await.unwrap();
    }
}
