//! Key directory interface.
//!
//! When a key rotates, its public half must become discoverable by peer
//! devices before the local side starts using it. The directory is the
//! publication point; the engine treats it as unreliable infrastructure
//! and retries transient failures.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;

use strongroom_common::{Error, KeyId, Result};
use strongroom_crypto::keys::KEY_LENGTH;
use strongroom_crypto::PublicKey;

use crate::key::{IdentityKeyRecord, RotationReason};

/// Key type tag for x25519 keys.
pub const KEY_TYPE_X25519: &str = "x25519";

/// Public half of a rotating key, as handed to the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedKey {
    /// Identifier shared with the full record.
    pub key_id: KeyId,
    /// Base64-encoded public key bytes.
    pub public_key: String,
    /// Key algorithm tag.
    pub key_type: String,
    /// Record format version.
    pub version: u32,
    /// When the key stops being the active one.
    pub expires_at: DateTime<Utc>,
    /// Why this key was introduced.
    pub rotation_reason: RotationReason,
}

impl PublishedKey {
    /// Build the publishable view of a key record.
    pub fn for_record(record: &IdentityKeyRecord, reason: RotationReason) -> Self {
        Self {
            key_id: record.id.clone(),
            public_key: BASE64.encode(&record.public_key),
            key_type: KEY_TYPE_X25519.to_string(),
            version: record.version,
            expires_at: record.expires_at,
            rotation_reason: reason,
        }
    }

    /// Decode the public key bytes.
    ///
    /// # Errors
    /// - Returns error if the encoded key is not a valid x25519 public key
    pub fn decode_public(&self) -> Result<PublicKey> {
        let bytes = BASE64
            .decode(&self.public_key)
            .map_err(|e| Error::Serialization(format!("invalid public key encoding: {}", e)))?;
        let bytes: [u8; KEY_LENGTH] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| Error::Serialization("public key has wrong length".to_string()))?;
        Ok(PublicKey::from(bytes))
    }
}

/// Publication point for rotated public keys.
#[async_trait]
pub trait KeyDirectory: Send + Sync {
    /// Publish a key.
    ///
    /// Must be idempotent on `key_id`: republishing the same key after a
    /// partial failure succeeds without creating a duplicate.
    async fn publish(&self, key: &PublishedKey) -> Result<()>;
}

/// In-memory directory for tests and single-device setups.
///
/// Supports failure injection so rotation tests can exercise the
/// publish-retry path.
pub struct MemoryKeyDirectory {
    entries: RwLock<HashMap<String, PublishedKey>>,
    fail_remaining: AtomicU32,
}

impl MemoryKeyDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            fail_remaining: AtomicU32::new(0),
        }
    }

    /// Make the next `count` publishes fail with a transient error.
    pub fn fail_next(&self, count: u32) {
        self.fail_remaining.store(count, Ordering::SeqCst);
    }

    /// Whether a key id has been published.
    pub fn contains(&self, key_id: &KeyId) -> bool {
        self.entries.read().unwrap().contains_key(key_id.as_str())
    }

    /// Snapshot of all published keys.
    pub fn published(&self) -> Vec<PublishedKey> {
        self.entries.read().unwrap().values().cloned().collect()
    }

    /// Number of published keys.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    /// Whether the directory is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryKeyDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyDirectory for MemoryKeyDirectory {
    async fn publish(&self, key: &PublishedKey) -> Result<()> {
        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::State("key directory unavailable".to_string()));
        }

        let mut entries = self.entries.write().unwrap();
        entries.insert(key.key_id.as_str().to_string(), key.clone());
        Ok(())
    }
}
