//! Password-protected backup and recovery of identity keypairs.
//!
//! A backup wraps the secret half of an identity keypair under a key
//! derived from a recovery password. The public half travels in the
//! clear but is bound into the ciphertext as associated data, so a
//! record whose halves have been mixed and matched will not open.
//!
//! Recovery deliberately reports every failure as [`Error::RecoveryFailed`]:
//! callers cannot tell a wrong password from a corrupted record, which
//! keeps the error channel useless for offline probing.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroize;

use strongroom_common::{
    BackupId, EngineConfig, Error, Result, RetryConfig, RetryExecutor, UserId,
};
use strongroom_crypto::aead::{NONCE_SIZE, TAG_SIZE};
use strongroom_crypto::keys::KEY_LENGTH;
use strongroom_crypto::{CryptoProvider, IdentityKeypair, KdfParams, Salt};
use strongroom_state::{Partition, StateStore};

use crate::record::{BackupIndexEntry, BackupRecord, BACKUP_VERSION};
use crate::store::BackupStore;

/// Domain tag prefixed to the associated data of every backup ciphertext.
const BACKUP_AAD_TAG: &[u8] = b"strongroom/backup/v1";

/// Associated data for a backup: domain tag followed by the public key
/// the wrapped secret must correspond to.
fn backup_aad(public_key: &[u8]) -> Vec<u8> {
    let mut aad = Vec::with_capacity(BACKUP_AAD_TAG.len() + public_key.len());
    aad.extend_from_slice(BACKUP_AAD_TAG);
    aad.extend_from_slice(public_key);
    aad
}

/// Creates, recovers and manages password-protected key backups.
///
/// Backup storage is remote and fallible, so every store call runs
/// through the retry executor. The local state store only carries a
/// lightweight index of known backups.
pub struct BackupService {
    crypto: Arc<dyn CryptoProvider>,
    store: Arc<dyn BackupStore>,
    state: Arc<dyn StateStore>,
    config: EngineConfig,
    retry: RetryConfig,
}

impl BackupService {
    pub fn new(
        crypto: Arc<dyn CryptoProvider>,
        store: Arc<dyn BackupStore>,
        state: Arc<dyn StateStore>,
        config: EngineConfig,
    ) -> Self {
        Self::with_retry(crypto, store, state, config, RetryConfig::default())
    }

    pub fn with_retry(
        crypto: Arc<dyn CryptoProvider>,
        store: Arc<dyn BackupStore>,
        state: Arc<dyn StateStore>,
        config: EngineConfig,
        retry: RetryConfig,
    ) -> Self {
        Self {
            crypto,
            store,
            state,
            config,
            retry,
        }
    }

    /// Encrypt `keypair` under `password` and upload it as a new backup.
    ///
    /// # Preconditions
    /// - `password` must not be empty
    ///
    /// # Postconditions
    /// - the backup is stored remotely and listed in the local index
    /// - a fresh salt is drawn, so two backups of the same keypair under
    ///   the same password produce unrelated ciphertexts
    ///
    /// # Errors
    /// - [`Error::InvalidInput`] if the password is empty
    /// - [`Error::State`] / [`Error::Io`] if storage stays unavailable
    ///   past the retry budget
    pub async fn create_backup(
        &self,
        user_id: &UserId,
        keypair: &IdentityKeypair,
        password: &[u8],
        device_label: &str,
    ) -> Result<BackupId> {
        if password.is_empty() {
            return Err(Error::InvalidInput(
                "backup password must not be empty".to_string(),
            ));
        }

        let backup_id = BackupId::new(Uuid::new_v4().to_string())?;
        let salt = Salt::generate();
        let kdf_params = KdfParams::from_config(&self.config)?;
        let wrap_key = self
            .crypto
            .derive_password_key(password, &salt, &kdf_params)?;

        let public_key = keypair.public_bytes().to_vec();
        let aad = backup_aad(&public_key);

        let mut nonce = [0u8; NONCE_SIZE];
        self.crypto.random_bytes(&mut nonce);

        let mut secret = keypair.secret_bytes();
        let sealed = self
            .crypto
            .aead_seal(wrap_key.as_bytes(), &nonce, &secret, &aad);
        secret.zeroize();
        let sealed = sealed?;

        let mut encrypted_private_key = Vec::with_capacity(NONCE_SIZE + sealed.len());
        encrypted_private_key.extend_from_slice(&nonce);
        encrypted_private_key.extend_from_slice(&sealed);

        let now = Utc::now();
        let record = BackupRecord {
            backup_id: backup_id.clone(),
            user_id: user_id.clone(),
            encrypted_private_key,
            public_key,
            salt,
            kdf_params,
            device_label: device_label.to_string(),
            version: BACKUP_VERSION,
            created_at: now,
            last_accessed_at: now,
        };

        let executor = RetryExecutor::new(self.retry.clone());
        let store = self.store.clone();
        let upload = record.clone();
        executor
            .execute(|| {
                let store = store.clone();
                let record = upload.clone();
                async move { store.create(&record).await }
            })
            .await?;

        let entry = BackupIndexEntry::for_record(&record);
        self.state
            .put(
                Partition::BackupIndex,
                backup_id.as_str(),
                serde_json::to_vec(&entry)?,
            )
            .await?;

        info!(
            user_id = %user_id,
            backup_id = %backup_id,
            device_label,
            "created key backup"
        );
        Ok(backup_id)
    }

    /// Recover the identity keypair stored in a backup.
    ///
    /// On success the record's last access time is updated best effort;
    /// a failure to record it is logged and does not fail the recovery.
    ///
    /// # Errors
    /// - [`Error::NoKeyFound`] if no such backup exists for this user
    /// - [`Error::RecoveryFailed`] for a wrong password or a record that
    ///   fails authentication, with no distinction between the two
    pub async fn recover_from_backup(
        &self,
        user_id: &UserId,
        backup_id: &BackupId,
        password: &[u8],
    ) -> Result<IdentityKeypair> {
        let record = self.load_record(user_id, backup_id).await?;
        let keypair = self.open_record(&record, password)?;

        let mut updated = record;
        updated.last_accessed_at = Utc::now();
        let executor = RetryExecutor::new(self.retry.clone());
        let store = self.store.clone();
        let touch = executor
            .execute(|| {
                let store = store.clone();
                let record = updated.clone();
                async move { store.update(&record).await }
            })
            .await;
        if let Err(err) = touch {
            warn!(
                backup_id = %backup_id,
                error = %err,
                "could not record backup access time"
            );
        }

        info!(user_id = %user_id, backup_id = %backup_id, "recovered keypair from backup");
        Ok(keypair)
    }

    /// Check whether `password` opens a backup without recovering it.
    ///
    /// Does not count as an access, so the record's last access time is
    /// left untouched.
    ///
    /// # Errors
    /// - [`Error::NoKeyFound`] if no such backup exists; infrastructure
    ///   failures propagate unchanged
    pub async fn verify_backup_password(
        &self,
        user_id: &UserId,
        backup_id: &BackupId,
        password: &[u8],
    ) -> Result<bool> {
        let record = self.load_record(user_id, backup_id).await?;
        match self.open_record(&record, password) {
            Ok(_) => Ok(true),
            Err(Error::RecoveryFailed) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// All backups stored remotely for a user, oldest first.
    pub async fn list_backups(&self, user_id: &UserId) -> Result<Vec<BackupRecord>> {
        let executor = RetryExecutor::new(self.retry.clone());
        let store = self.store.clone();
        let owner = user_id.clone();
        executor
            .execute(|| {
                let store = store.clone();
                let user_id = owner.clone();
                async move { store.list(&user_id).await }
            })
            .await
    }

    /// Backups this device knows about, from the local index alone.
    ///
    /// Usable offline; may lag behind remote storage if another device
    /// created or deleted backups.
    pub async fn local_index(&self, user_id: &UserId) -> Result<Vec<BackupIndexEntry>> {
        let mut entries = Vec::new();
        for key in self.state.list_keys(Partition::BackupIndex).await? {
            if let Some(bytes) = self.state.get(Partition::BackupIndex, &key).await? {
                let entry: BackupIndexEntry = serde_json::from_slice(&bytes)?;
                if entry.user_id == *user_id {
                    entries.push(entry);
                }
            }
        }
        entries.sort_by_key(|entry| entry.created_at);
        Ok(entries)
    }

    /// Delete a backup remotely and drop it from the local index.
    ///
    /// Deleting a backup that does not exist is a no-op.
    pub async fn delete_backup(&self, user_id: &UserId, backup_id: &BackupId) -> Result<()> {
        let executor = RetryExecutor::new(self.retry.clone());
        let store = self.store.clone();
        let owner = user_id.clone();
        let target = backup_id.clone();
        executor
            .execute(|| {
                let store = store.clone();
                let user_id = owner.clone();
                let backup_id = target.clone();
                async move { store.delete(&user_id, &backup_id).await }
            })
            .await?;

        self.state
            .delete(Partition::BackupIndex, backup_id.as_str())
            .await?;

        debug!(user_id = %user_id, backup_id = %backup_id, "deleted backup");
        Ok(())
    }

    async fn load_record(&self, user_id: &UserId, backup_id: &BackupId) -> Result<BackupRecord> {
        let executor = RetryExecutor::new(self.retry.clone());
        let store = self.store.clone();
        let owner = user_id.clone();
        let target = backup_id.clone();
        let record = executor
            .execute(|| {
                let store = store.clone();
                let user_id = owner.clone();
                let backup_id = target.clone();
                async move { store.get(&user_id, &backup_id).await }
            })
            .await?;
        record.ok_or_else(|| Error::NoKeyFound(backup_id.as_str().to_string()))
    }

    /// Decrypt a record and rebuild the keypair it wraps.
    ///
    /// # Security
    /// Every decryption failure collapses into [`Error::RecoveryFailed`].
    /// The recovered secret is additionally checked against the stored
    /// public key in constant time before the keypair is released.
    fn open_record(&self, record: &BackupRecord, password: &[u8]) -> Result<IdentityKeypair> {
        let wrap_key = self
            .crypto
            .derive_password_key(password, &record.salt, &record.kdf_params)
            .map_err(|_| Error::RecoveryFailed)?;

        if record.encrypted_private_key.len() < NONCE_SIZE + TAG_SIZE {
            return Err(Error::RecoveryFailed);
        }
        let (nonce_bytes, sealed) = record.encrypted_private_key.split_at(NONCE_SIZE);
        let nonce: [u8; NONCE_SIZE] = nonce_bytes
            .try_into()
            .map_err(|_| Error::RecoveryFailed)?;

        let aad = backup_aad(&record.public_key);
        let mut opened = self
            .crypto
            .aead_open(wrap_key.as_bytes(), &nonce, sealed, &aad)
            .map_err(|_| Error::RecoveryFailed)?;

        let secret: core::result::Result<[u8; KEY_LENGTH], _> = opened.as_slice().try_into();
        let keypair = match secret {
            Ok(bytes) => IdentityKeypair::from_secret_bytes(bytes),
            Err(_) => {
                opened.zeroize();
                return Err(Error::RecoveryFailed);
            }
        };
        opened.zeroize();

        if !self
            .crypto
            .constant_time_eq(&keypair.public_bytes(), &record.public_key)
        {
            return Err(Error::RecoveryFailed);
        }
        Ok(keypair)
    }
}
