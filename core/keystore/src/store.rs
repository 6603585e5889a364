//! Key store service.
//!
//! Wraps master keys under password- or biometric-derived wrapping keys,
//! persists the wrapped records, and unlocks them back into a short-lived
//! session cache. Cleartext keys exist only inside the cache and are
//! never written to the state store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;
use zeroize::Zeroize;

use strongroom_common::{EngineConfig, Error, Result, UserId};
use strongroom_crypto::aead::{NONCE_SIZE, TAG_SIZE};
use strongroom_crypto::provider::CONTEXT_LENGTH;
use strongroom_crypto::{CryptoProvider, KdfParams, MasterKey, Salt};
use strongroom_state::{Partition, StateStore};

use crate::biometric::BiometricAssertionProvider;
use crate::cache::{SessionCache, DEFAULT_SESSION_TTL};
use crate::record::{UnlockMethod, WrappedKeyRecord, RECORD_VERSION};

/// Sub-key index for biometric wrapping keys.
const BIOMETRIC_WRAP_INDEX: u64 = 2;

/// Derivation context separating biometric wrapping keys from other
/// sub-keys.
const BIOMETRIC_WRAP_CONTEXT: &[u8; CONTEXT_LENGTH] = b"biowrap\0";

/// Secret material supplied when wrapping a master key.
#[derive(Debug)]
pub enum WrapSecret<'a> {
    /// Wrap under a key derived from this password.
    Password(&'a [u8]),
    /// Wrap under a key derived from an assertion by this platform
    /// credential.
    Biometric { credential_ref: &'a str },
}

/// Secret material supplied when unlocking a master key.
///
/// The biometric variant carries nothing; the credential reference is
/// read from the stored record.
#[derive(Debug)]
pub enum UnlockSecret<'a> {
    /// Unlock with a password.
    Password(&'a [u8]),
    /// Unlock with the enrolled biometric credential.
    Biometric,
}

/// Builds the AAD for a wrapped record.
///
/// The method tag prevents a wrap made for one unlock method from being
/// opened as another; binding the user id prevents replaying a record
/// into a different user's slot.
fn wrap_aad(method: UnlockMethod, user_id: &str) -> Vec<u8> {
    let tag = method.aad_tag();
    let mut aad = Vec::with_capacity(tag.len() + 1 + user_id.len());
    aad.extend_from_slice(tag);
    aad.push(b':');
    aad.extend_from_slice(user_id.as_bytes());
    aad
}

/// Challenge for a biometric assertion, bound to one record.
fn biometric_challenge(key_id: &str, salt: &Salt) -> Vec<u8> {
    let mut challenge = Vec::with_capacity(key_id.len() + salt.as_bytes().len());
    challenge.extend_from_slice(key_id.as_bytes());
    challenge.extend_from_slice(salt.as_bytes());
    challenge
}

/// Service wrapping and unlocking per-user master keys.
pub struct KeyStore {
    crypto: Arc<dyn CryptoProvider>,
    state: Arc<dyn StateStore>,
    biometrics: Arc<dyn BiometricAssertionProvider>,
    cache: SessionCache,
    config: EngineConfig,
}

impl KeyStore {
    /// Create a key store with the default session TTL.
    pub fn new(
        crypto: Arc<dyn CryptoProvider>,
        state: Arc<dyn StateStore>,
        biometrics: Arc<dyn BiometricAssertionProvider>,
        config: EngineConfig,
    ) -> Self {
        Self::with_session_ttl(crypto, state, biometrics, config, DEFAULT_SESSION_TTL)
    }

    /// Create a key store with an explicit session TTL.
    pub fn with_session_ttl(
        crypto: Arc<dyn CryptoProvider>,
        state: Arc<dyn StateStore>,
        biometrics: Arc<dyn BiometricAssertionProvider>,
        config: EngineConfig,
        session_ttl: Duration,
    ) -> Self {
        Self {
            crypto,
            state,
            biometrics,
            cache: SessionCache::new(session_ttl),
            config,
        }
    }

    /// Wrap and persist a master key for a user.
    ///
    /// Any previously active record is superseded (kept for retention,
    /// no longer used for unlock) and the new record becomes active.
    /// The cleartext key is cached for the session.
    ///
    /// # Preconditions
    /// - Password variant: password must not be empty
    /// - Biometric variant: the credential must be able to assert
    ///
    /// # Postconditions
    /// - Exactly one active record exists for the user
    /// - Superseded records beyond the retention cap are deleted
    ///
    /// # Errors
    /// - `WeakParameters` if the configured KDF costs are below the floors
    /// - `InvalidInput` for an empty password
    /// - `InvalidUnlockSecret` if the biometric assertion fails
    pub async fn store_master_key(
        &self,
        user_id: &UserId,
        master_key: &MasterKey,
        secret: &WrapSecret<'_>,
    ) -> Result<WrappedKeyRecord> {
        let key_id = Uuid::new_v4().to_string();
        let salt = Salt::generate();
        let kdf_params = KdfParams::from_config(&self.config)?;

        let (method, credential_ref, wrap_key) = match secret {
            WrapSecret::Password(password) => {
                if password.is_empty() {
                    return Err(Error::InvalidInput(
                        "password must not be empty".to_string(),
                    ));
                }
                let wrap_key = self
                    .crypto
                    .derive_password_key(password, &salt, &kdf_params)?;
                (UnlockMethod::Password, None, wrap_key)
            }
            WrapSecret::Biometric { credential_ref } => {
                let wrap_key = self
                    .biometric_wrap_key(credential_ref, &key_id, &salt)
                    .await?;
                (
                    UnlockMethod::Biometric,
                    Some(credential_ref.to_string()),
                    wrap_key,
                )
            }
        };

        let mut nonce = [0u8; NONCE_SIZE];
        self.crypto.random_bytes(&mut nonce);
        let aad = wrap_aad(method, user_id.as_str());
        let sealed = self
            .crypto
            .aead_seal(wrap_key.as_bytes(), &nonce, master_key.as_bytes(), &aad)?;

        let mut encrypted_key = Vec::with_capacity(NONCE_SIZE + sealed.len());
        encrypted_key.extend_from_slice(&nonce);
        encrypted_key.extend_from_slice(&sealed);

        let record = WrappedKeyRecord {
            key_id,
            user_id: user_id.as_str().to_string(),
            created_at: Utc::now(),
            is_active: true,
            version: RECORD_VERSION,
            encrypted_key,
            salt,
            kdf_params,
            unlock_method: method,
            biometric_credential_ref: credential_ref,
        };

        let mut records = self.load_records(user_id).await?;
        for existing in &mut records {
            existing.is_active = false;
        }
        records.push(record.clone());
        self.prune_records(&mut records);
        self.save_records(user_id, &records).await?;

        self.cache.insert(user_id.as_str(), master_key.clone());
        debug!(
            user_id = %user_id,
            key_id = %record.key_id,
            method = method.as_str(),
            "stored wrapped master key"
        );

        Ok(record)
    }

    /// Unlock a user's master key.
    ///
    /// Checks the session cache first; on a miss, unwraps the active
    /// record with the supplied secret and repopulates the cache.
    ///
    /// # Errors
    /// - `NoKeyFound` if the user has no active record
    /// - `InvalidUnlockSecret` if the secret does not open the record;
    ///   a wrong password, a failed assertion, a method mismatch, and a
    ///   corrupted record are indistinguishable
    pub async fn retrieve_master_key(
        &self,
        user_id: &UserId,
        secret: &UnlockSecret<'_>,
    ) -> Result<MasterKey> {
        if let Some(key) = self.cache.get(user_id.as_str()) {
            return Ok(key);
        }

        let records = self.load_records(user_id).await?;
        let record = records
            .iter()
            .find(|r| r.is_active)
            .ok_or_else(|| Error::NoKeyFound(user_id.as_str().to_string()))?;

        let key = self.unwrap_record(user_id, record, secret).await?;
        self.cache.insert(user_id.as_str(), key.clone());
        Ok(key)
    }

    /// Re-wrap the master key under a new password.
    ///
    /// The master key itself does not change, so file keys derived from
    /// it stay valid. The old password is always verified against the
    /// stored record, regardless of any cached session.
    ///
    /// # Errors
    /// - `InvalidInput` for an empty new password
    /// - `NoKeyFound` if the user has no active record
    /// - `InvalidUnlockSecret` if the old password is wrong or the
    ///   active record is not password-wrapped
    pub async fn change_password(
        &self,
        user_id: &UserId,
        old_password: &[u8],
        new_password: &[u8],
    ) -> Result<WrappedKeyRecord> {
        if new_password.is_empty() {
            return Err(Error::InvalidInput(
                "new password must not be empty".to_string(),
            ));
        }

        let records = self.load_records(user_id).await?;
        let record = records
            .iter()
            .find(|r| r.is_active)
            .ok_or_else(|| Error::NoKeyFound(user_id.as_str().to_string()))?;
        let master_key = self
            .unwrap_record(user_id, record, &UnlockSecret::Password(old_password))
            .await?;

        self.store_master_key(user_id, &master_key, &WrapSecret::Password(new_password))
            .await
    }

    /// Remove all of a user's wrapped records and their cached session.
    ///
    /// Idempotent; deleting an absent user succeeds.
    pub async fn delete_key(&self, user_id: &UserId) -> Result<()> {
        self.cache.remove(user_id.as_str());
        self.state
            .delete(Partition::WrappedKeys, user_id.as_str())
            .await?;
        debug!(user_id = %user_id, "deleted wrapped key records");
        Ok(())
    }

    /// Whether the user has an active wrapped record.
    pub async fn has_key(&self, user_id: &UserId) -> Result<bool> {
        let records = self.load_records(user_id).await?;
        Ok(records.iter().any(|r| r.is_active))
    }

    /// Wipe one user's cached session key.
    ///
    /// Synchronous: once this returns, a retrieval without a valid
    /// secret fails.
    pub fn clear_session(&self, user_id: &UserId) {
        self.cache.remove(user_id.as_str());
        debug!(user_id = %user_id, "cleared session");
    }

    /// Wipe every cached session key.
    pub fn clear_all_sessions(&self) {
        self.cache.clear();
        debug!("cleared all sessions");
    }

    async fn biometric_wrap_key(
        &self,
        credential_ref: &str,
        key_id: &str,
        salt: &Salt,
    ) -> Result<MasterKey> {
        let challenge = biometric_challenge(key_id, salt);
        let assertion = self.biometrics.assert(credential_ref, &challenge).await?;

        let mut seed = self.crypto.digest(assertion.as_bytes());
        let derived = self
            .crypto
            .keyed_derive(&seed, BIOMETRIC_WRAP_INDEX, BIOMETRIC_WRAP_CONTEXT);
        seed.zeroize();

        let mut bytes = derived?;
        let key = MasterKey::from_bytes(bytes);
        bytes.zeroize();
        Ok(key)
    }

    async fn unwrap_record(
        &self,
        user_id: &UserId,
        record: &WrappedKeyRecord,
        secret: &UnlockSecret<'_>,
    ) -> Result<MasterKey> {
        let wrap_key = match (record.unlock_method, secret) {
            (UnlockMethod::Password, UnlockSecret::Password(password)) => self
                .crypto
                .derive_password_key(password, &record.salt, &record.kdf_params)
                .map_err(|_| Error::InvalidUnlockSecret)?,
            (UnlockMethod::Biometric, UnlockSecret::Biometric) => {
                let credential_ref = record
                    .biometric_credential_ref
                    .as_deref()
                    .ok_or(Error::InvalidUnlockSecret)?;
                self.biometric_wrap_key(credential_ref, &record.key_id, &record.salt)
                    .await
                    .map_err(|_| Error::InvalidUnlockSecret)?
            }
            _ => return Err(Error::InvalidUnlockSecret),
        };

        if record.encrypted_key.len() < NONCE_SIZE + TAG_SIZE {
            return Err(Error::InvalidUnlockSecret);
        }
        let (nonce_bytes, sealed) = record.encrypted_key.split_at(NONCE_SIZE);
        let nonce: [u8; NONCE_SIZE] = nonce_bytes
            .try_into()
            .map_err(|_| Error::InvalidUnlockSecret)?;

        let aad = wrap_aad(record.unlock_method, user_id.as_str());
        let opened = self
            .crypto
            .aead_open(wrap_key.as_bytes(), &nonce, sealed, &aad)
            .map_err(|_| Error::InvalidUnlockSecret)?;

        let mut key_bytes = opened;
        let key = MasterKey::from_slice(&key_bytes).map_err(|_| Error::InvalidUnlockSecret);
        key_bytes.zeroize();
        key
    }

    async fn load_records(&self, user_id: &UserId) -> Result<Vec<WrappedKeyRecord>> {
        match self
            .state
            .get(Partition::WrappedKeys, user_id.as_str())
            .await?
        {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    async fn save_records(&self, user_id: &UserId, records: &[WrappedKeyRecord]) -> Result<()> {
        let bytes = serde_json::to_vec(records)?;
        self.state
            .put(Partition::WrappedKeys, user_id.as_str(), bytes)
            .await
    }

    /// Drop the oldest superseded records beyond the retention cap.
    /// The active record is never pruned.
    fn prune_records(&self, records: &mut Vec<WrappedKeyRecord>) {
        let cap = self.config.max_active_keys;
        if records.len() <= cap {
            return;
        }
        records.sort_by_key(|r| r.created_at);
        let excess = records.len() - cap;
        let mut removed = 0;
        records.retain(|r| {
            if removed < excess && !r.is_active {
                removed += 1;
                false
            } else {
                true
            }
        });
    }
}
