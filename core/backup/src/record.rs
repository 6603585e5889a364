//! Backup record types.
//!
//! A backup is an identity secret key encrypted under a password-derived
//! key, with its own salt and KDF parameters so it stays recoverable
//! independently of any wrapped-key record or parameter upgrade.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use strongroom_common::{BackupId, UserId};
use strongroom_crypto::{KdfParams, Salt};

/// Current backup record format version.
pub const BACKUP_VERSION: u32 = 1;

/// One password-protected backup of an identity key.
///
/// `encrypted_private_key` is `nonce ‖ ciphertext`; the AEAD tag also
/// binds the stored public key, so the ciphertext cannot be replayed
/// under a different identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    /// Unique backup identifier.
    pub backup_id: BackupId,
    /// Owning user.
    pub user_id: UserId,
    /// Nonce-prefixed AEAD ciphertext of the secret key.
    pub encrypted_private_key: Vec<u8>,
    /// Public half of the backed-up keypair.
    pub public_key: Vec<u8>,
    /// Salt for the password-derived wrapping key; independent of every
    /// other salt in the system.
    pub salt: Salt,
    /// KDF parameters in effect when the backup was created.
    pub kdf_params: KdfParams,
    /// Human-readable label of the device that made the backup.
    pub device_label: String,
    /// Record format version.
    pub version: u32,
    /// When the backup was created.
    pub created_at: DateTime<Utc>,
    /// When the backup was last successfully recovered.
    pub last_accessed_at: DateTime<Utc>,
}

/// Lightweight local index entry for one backup.
///
/// Kept in the state store so devices can list their backups without a
/// round trip to backup storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupIndexEntry {
    pub backup_id: BackupId,
    pub user_id: UserId,
    pub device_label: String,
    pub created_at: DateTime<Utc>,
}

impl BackupIndexEntry {
    /// Build the index view of a full record.
    pub fn for_record(record: &BackupRecord) -> Self {
        Self {
            backup_id: record.backup_id.clone(),
            user_id: record.user_id.clone(),
            device_label: record.device_label.clone(),
            created_at: record.created_at,
        }
    }
}
