//! State store trait definition.
//!
//! The engine owns a small partitioned key/value store for its persisted
//! state. Values are opaque bytes; callers serialize their own records.

use async_trait::async_trait;
use std::fmt;

use strongroom_common::{Error, Result};

/// The partitions of engine-owned state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    /// Wrapped master-key records, keyed by user id.
    WrappedKeys,
    /// Rotating identity-key records, keyed by key id.
    IdentityKeys,
    /// Local index of created backups, keyed by backup id.
    BackupIndex,
    /// Engine configuration.
    Config,
}

impl Partition {
    /// All partitions.
    pub const ALL: [Partition; 4] = [
        Partition::WrappedKeys,
        Partition::IdentityKeys,
        Partition::BackupIndex,
        Partition::Config,
    ];

    /// Stable name used for namespacing (directory names, map keys).
    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::WrappedKeys => "wrapped_keys",
            Partition::IdentityKeys => "identity_keys",
            Partition::BackupIndex => "backup_index",
            Partition::Config => "config",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Validate a store key.
///
/// Keys become file names in the local backend, so separators and
/// traversal sequences are rejected for every backend alike.
///
/// # Errors
/// - Returns error if the key is empty, contains a path separator, or
///   is a traversal sequence
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidInput("state key cannot be empty".to_string()));
    }
    if key.contains('/') || key.contains('\\') || key == "." || key == ".." {
        return Err(Error::InvalidInput(format!(
            "state key contains illegal characters: {:?}",
            key
        )));
    }
    Ok(())
}

/// Persisted key/value store, partitioned by record kind.
///
/// Implementations must be safe for concurrent use. Reads of missing
/// keys return `None` and deletes of missing keys succeed, so callers
/// can stay idempotent without probing first.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Backend name for logging (e.g., "memory", "local").
    fn name(&self) -> &str;

    /// Store a value, replacing any existing value under the key.
    async fn put(&self, partition: Partition, key: &str, value: Vec<u8>) -> Result<()>;

    /// Fetch a value, or `None` if absent.
    async fn get(&self, partition: Partition, key: &str) -> Result<Option<Vec<u8>>>;

    /// Remove a value. Succeeds if the key is absent.
    async fn delete(&self, partition: Partition, key: &str) -> Result<()>;

    /// List all keys in a partition, in no particular order.
    async fn list_keys(&self, partition: Partition) -> Result<Vec<String>>;

    /// Whether a key is present.
    async fn contains(&self, partition: Partition, key: &str) -> Result<bool> {
        Ok(self.get(partition, key).await?.is_some())
    }
}
