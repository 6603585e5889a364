//! Rotating identity key records.
//!
//! Each record is one x25519 keypair in the device's rotation history.
//! A key is created, becomes active once its public half is published,
//! is superseded by the next rotation, and is eventually pruned once it
//! is both expired and beyond the retention window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroize;

use strongroom_common::{Error, KeyId, Result};
use strongroom_crypto::keys::KEY_LENGTH;
use strongroom_crypto::{IdentityKeypair, PublicKey};

/// Current identity key record format version.
pub const KEY_VERSION: u32 = 1;

/// Why a rotation happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationReason {
    /// The key reached its scheduled expiry.
    Scheduled,
    /// An operator requested the rotation.
    Manual,
    /// The key is suspected compromised; rotate immediately.
    Compromise,
}

impl RotationReason {
    /// String identifier for logs and published records.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Manual => "manual",
            Self::Compromise => "compromise",
        }
    }
}

impl fmt::Display for RotationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persisted state of one rotating identity key.
///
/// The secret half is stored alongside the public half; the state store
/// is local to the device and the history must survive restarts so old
/// shares stay decryptable.
#[derive(Clone, Serialize, Deserialize)]
pub struct IdentityKeyRecord {
    /// Unique key identifier.
    pub id: KeyId,
    /// x25519 secret key bytes.
    pub secret_key: Vec<u8>,
    /// x25519 public key bytes.
    pub public_key: Vec<u8>,
    /// When the key was created.
    pub created_at: DateTime<Utc>,
    /// When the key is due for rotation.
    pub expires_at: DateTime<Utc>,
    /// Whether this is the current key.
    pub is_active: bool,
    /// Record format version.
    pub version: u32,
}

impl IdentityKeyRecord {
    /// Reconstruct the keypair from the stored secret.
    ///
    /// # Errors
    /// - Returns error if the stored secret is malformed
    pub fn keypair(&self) -> Result<IdentityKeypair> {
        let bytes: [u8; KEY_LENGTH] = self
            .secret_key
            .as_slice()
            .try_into()
            .map_err(|_| Error::State(format!("identity key {} has a malformed secret", self.id)))?;
        Ok(IdentityKeypair::from_secret_bytes(bytes))
    }

    /// The stored public key.
    ///
    /// # Errors
    /// - Returns error if the stored public key is malformed
    pub fn public(&self) -> Result<PublicKey> {
        let bytes: [u8; KEY_LENGTH] = self
            .public_key
            .as_slice()
            .try_into()
            .map_err(|_| Error::State(format!("identity key {} has a malformed public key", self.id)))?;
        Ok(PublicKey::from(bytes))
    }

    /// Whether the key has reached its rotation deadline.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Milliseconds until expiry; negative once expired.
    pub fn millis_to_expiry(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_milliseconds()
    }
}

impl fmt::Debug for IdentityKeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKeyRecord")
            .field("id", &self.id)
            .field("secret_key", &"[REDACTED]")
            .field("public_key", &self.public_key)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .field("is_active", &self.is_active)
            .field("version", &self.version)
            .finish()
    }
}

impl Drop for IdentityKeyRecord {
    fn drop(&mut self) {
        self.secret_key.zeroize();
    }
}
