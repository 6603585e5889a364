//! Persisted wrapped-key records.
//!
//! A record holds one master key encrypted under a wrapping key derived
//! from a single unlock method. Per user there is at most one active
//! record; superseded records stay around until retention cleanup so a
//! password change never destroys the previous wrap before the new one
//! is durable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use strongroom_crypto::{KdfParams, Salt};

/// Current wrapped-key record format version.
pub const RECORD_VERSION: u32 = 1;

/// Unlock method that produced a record's wrapping key.
///
/// Each method carries a distinct AAD tag, so a wrap created for one
/// method can never be opened as another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlockMethod {
    /// Wrapping key derived from a password via Argon2id.
    Password,
    /// Wrapping key derived from a platform biometric assertion.
    Biometric,
}

impl UnlockMethod {
    /// AAD domain tag for this method.
    pub const fn aad_tag(&self) -> &'static [u8] {
        match self {
            Self::Password => b"strongroom/wrap/password/v1",
            Self::Biometric => b"strongroom/wrap/biometric/v1",
        }
    }

    /// String identifier for logs and records.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::Biometric => "biometric",
        }
    }
}

/// One wrapped copy of a user's master key.
///
/// `encrypted_key` is `nonce ‖ ciphertext` from the AEAD. `salt` feeds
/// the wrapping-key derivation for both methods; `kdf_params` are only
/// consulted by the password method but are stored with every record so
/// historical records survive parameter upgrades.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WrappedKeyRecord {
    /// Unique record identifier.
    pub key_id: String,
    /// Owning user.
    pub user_id: String,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// Whether this is the user's current wrap.
    pub is_active: bool,
    /// Record format version.
    pub version: u32,
    /// Nonce-prefixed AEAD ciphertext of the master key.
    pub encrypted_key: Vec<u8>,
    /// Salt for wrapping-key derivation.
    pub salt: Salt,
    /// KDF parameters in effect when the record was created.
    pub kdf_params: KdfParams,
    /// Unlock method this record was wrapped for.
    pub unlock_method: UnlockMethod,
    /// Platform credential reference for biometric records.
    pub biometric_credential_ref: Option<String>,
}
