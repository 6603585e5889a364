//! Key rotation engine.
//!
//! Owns the rotating identity key history: creates keys, publishes
//! their public halves, supersedes them on schedule, and prunes the
//! tail. All state transitions serialize behind one mutex, so there is
//! exactly one writer regardless of how many schedulers or callers
//! poke the engine.
//!
//! A rotation is only committed after the new public key has been
//! published: a key nobody can discover must never become the active
//! key. When publication fails past the retry budget the previous key
//! stays active and a [`RotationEvent::RotationFailed`] is emitted.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroize;

use strongroom_common::{EngineConfig, Error, KeyId, Result, RetryConfig, RetryExecutor};
use strongroom_crypto::{sharing::unshare_key, CryptoProvider, IdentityKeypair, MasterKey, PublicKey};
use strongroom_state::{Partition, StateStore};

use crate::directory::{KeyDirectory, PublishedKey};
use crate::key::{IdentityKeyRecord, RotationReason, KEY_VERSION};

/// Buffered capacity of the event channel.
const EVENT_CHANNEL_CAPACITY: usize = 32;

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Lifecycle notifications emitted by the engine.
#[derive(Debug, Clone)]
pub enum RotationEvent {
    /// The engine loaded or created its active key.
    Initialized { key_id: KeyId },
    /// A new key became active.
    Rotated {
        old_key_id: Option<KeyId>,
        new_key_id: KeyId,
        reason: RotationReason,
    },
    /// The active key is inside the pre-rotation warning window.
    RotationWarning { key_id: KeyId, days_remaining: i64 },
    /// A rotation attempt did not complete; the previous key stays
    /// active.
    RotationFailed { reason: String },
}

struct EngineState {
    /// Key history ordered oldest first.
    keys: Vec<IdentityKeyRecord>,
    initialized: bool,
}

/// Engine managing the device's rotating identity keys.
pub struct RotationEngine {
    crypto: Arc<dyn CryptoProvider>,
    state: Arc<dyn StateStore>,
    directory: Arc<dyn KeyDirectory>,
    config: EngineConfig,
    retry: RetryConfig,
    inner: Mutex<EngineState>,
    events: broadcast::Sender<RotationEvent>,
}

impl RotationEngine {
    /// Create an engine with the default publish-retry policy.
    pub fn new(
        crypto: Arc<dyn CryptoProvider>,
        state: Arc<dyn StateStore>,
        directory: Arc<dyn KeyDirectory>,
        config: EngineConfig,
    ) -> Self {
        Self::with_retry(crypto, state, directory, config, RetryConfig::default())
    }

    /// Create an engine with an explicit publish-retry policy.
    pub fn with_retry(
        crypto: Arc<dyn CryptoProvider>,
        state: Arc<dyn StateStore>,
        directory: Arc<dyn KeyDirectory>,
        config: EngineConfig,
        retry: RetryConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            crypto,
            state,
            directory,
            config,
            retry,
            inner: Mutex::new(EngineState {
                keys: Vec::new(),
                initialized: false,
            }),
            events,
        }
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<RotationEvent> {
        self.events.subscribe()
    }

    /// Load the persisted key history, creating and publishing the
    /// first key if none is active.
    ///
    /// # Postconditions
    /// - Exactly one key is active
    /// - The active key's public half has been published
    ///
    /// # Errors
    /// - `RotationFailed` if the first key cannot be published
    pub async fn initialize(&self) -> Result<KeyId> {
        let mut inner = self.inner.lock().await;

        if !inner.initialized {
            let mut keys = Vec::new();
            for id in self.state.list_keys(Partition::IdentityKeys).await? {
                if let Some(bytes) = self.state.get(Partition::IdentityKeys, &id).await? {
                    let record: IdentityKeyRecord = serde_json::from_slice(&bytes)?;
                    keys.push(record);
                }
            }
            keys.sort_by_key(|k| k.created_at);
            inner.keys = keys;
            inner.initialized = true;
        }

        let key_id = match inner.keys.iter().find(|k| k.is_active) {
            Some(active) => {
                let key_id = active.id.clone();
                info!(key_id = %key_id, "rotation engine initialized with persisted key");
                key_id
            }
            None => {
                let key_id = self
                    .install_key(&mut inner, RotationReason::Scheduled)
                    .await?;
                info!(key_id = %key_id, "rotation engine initialized with new key");
                key_id
            }
        };

        let _ = self.events.send(RotationEvent::Initialized {
            key_id: key_id.clone(),
        });
        Ok(key_id)
    }

    /// The current active key record.
    ///
    /// # Errors
    /// - `NoKeyFound` if no key is active (rotation in a collapsed
    ///   state; the next check repairs it)
    pub async fn active_key(&self) -> Result<IdentityKeyRecord> {
        let inner = self.inner.lock().await;
        self.ensure_initialized(&inner)?;
        inner
            .keys
            .iter()
            .find(|k| k.is_active)
            .cloned()
            .ok_or_else(|| Error::NoKeyFound("no active identity key".to_string()))
    }

    /// Retained key history, newest first.
    pub async fn history(&self) -> Result<Vec<IdentityKeyRecord>> {
        let inner = self.inner.lock().await;
        self.ensure_initialized(&inner)?;
        let mut keys = inner.keys.clone();
        keys.reverse();
        Ok(keys)
    }

    /// Rotate to a fresh key.
    ///
    /// # Postconditions
    /// - On success the new key is published, persisted, and active,
    ///   and the previous key is superseded
    /// - On failure the previous key remains active
    ///
    /// # Errors
    /// - `RotationFailed` if the new key cannot be published
    pub async fn rotate(&self, reason: RotationReason) -> Result<KeyId> {
        let mut inner = self.inner.lock().await;
        self.ensure_initialized(&inner)?;

        let old_key_id = inner
            .keys
            .iter()
            .find(|k| k.is_active)
            .map(|k| k.id.clone());
        let new_key_id = self.install_key(&mut inner, reason).await?;

        info!(
            old_key_id = old_key_id.as_ref().map(|id| id.as_str()),
            new_key_id = %new_key_id,
            reason = %reason,
            "rotated identity key"
        );
        let _ = self.events.send(RotationEvent::Rotated {
            old_key_id,
            new_key_id: new_key_id.clone(),
            reason,
        });
        Ok(new_key_id)
    }

    /// Timer entry point.
    ///
    /// Rotates when the active key has reached its persisted deadline;
    /// emits a [`RotationEvent::RotationWarning`] without touching state
    /// while the key is inside the warning window. With automatic
    /// rotation disabled an expired key only produces warnings; manual
    /// [`RotationEngine::rotate`] is unaffected.
    ///
    /// Returns the new key id when a rotation happened.
    pub async fn check_and_rotate_if_needed(&self) -> Result<Option<KeyId>> {
        let mut inner = self.inner.lock().await;
        self.ensure_initialized(&inner)?;

        let now = Utc::now();
        let active = inner
            .keys
            .iter()
            .find(|k| k.is_active)
            .map(|k| (k.id.clone(), k.expires_at));

        let (key_id, expires_at) = match active {
            Some(active) => active,
            None => {
                // A crash between supersede and activate leaves no
                // active key; repair by installing a fresh one.
                let key_id = self
                    .install_key(&mut inner, RotationReason::Scheduled)
                    .await?;
                warn!(key_id = %key_id, "no active key found; installed a fresh one");
                let _ = self.events.send(RotationEvent::Rotated {
                    old_key_id: None,
                    new_key_id: key_id.clone(),
                    reason: RotationReason::Scheduled,
                });
                return Ok(Some(key_id));
            }
        };

        let remaining_ms = (expires_at - now).num_milliseconds();

        if remaining_ms <= 0 && self.config.auto_rotation_enabled {
            let new_key_id = self
                .install_key(&mut inner, RotationReason::Scheduled)
                .await?;
            info!(
                old_key_id = %key_id,
                new_key_id = %new_key_id,
                "scheduled rotation"
            );
            let _ = self.events.send(RotationEvent::Rotated {
                old_key_id: Some(key_id),
                new_key_id: new_key_id.clone(),
                reason: RotationReason::Scheduled,
            });
            return Ok(Some(new_key_id));
        }

        if remaining_ms <= self.config.pre_rotation_warning_ms as i64 {
            let days_remaining = remaining_ms.max(0) / MILLIS_PER_DAY;
            debug!(key_id = %key_id, days_remaining, "active key approaching rotation");
            let _ = self.events.send(RotationEvent::RotationWarning {
                key_id,
                days_remaining,
            });
        }

        Ok(None)
    }

    /// Decrypt a key share against the retained key history.
    ///
    /// Keys are tried newest first; the first one that authenticates
    /// wins, so shares made to a superseded key keep working until that
    /// key is pruned.
    ///
    /// # Errors
    /// - `NoMatchingKey` if no retained key opens the payload
    pub async fn unwrap_with_history(
        &self,
        payload: &[u8],
        sender_public: &PublicKey,
    ) -> Result<MasterKey> {
        let inner = self.inner.lock().await;
        self.ensure_initialized(&inner)?;

        for record in inner.keys.iter().rev() {
            let keypair = match record.keypair() {
                Ok(keypair) => keypair,
                Err(_) => continue,
            };
            if let Ok(key) = unshare_key(self.crypto.as_ref(), payload, sender_public, &keypair) {
                debug!(key_id = %record.id, "share opened with retained key");
                return Ok(key);
            }
        }
        Err(Error::NoMatchingKey)
    }

    fn ensure_initialized(&self, inner: &EngineState) -> Result<()> {
        if !inner.initialized {
            return Err(Error::State(
                "rotation engine not initialized".to_string(),
            ));
        }
        Ok(())
    }

    /// Generate, publish, persist, and activate a new key.
    ///
    /// Emits `RotationFailed` and leaves state untouched if the publish
    /// does not land within the retry budget.
    async fn install_key(
        &self,
        inner: &mut EngineState,
        reason: RotationReason,
    ) -> Result<KeyId> {
        match self.try_install_key(inner, reason).await {
            Ok(key_id) => Ok(key_id),
            Err(err) => {
                warn!(error = %err, "key installation failed");
                let _ = self.events.send(RotationEvent::RotationFailed {
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn try_install_key(
        &self,
        inner: &mut EngineState,
        reason: RotationReason,
    ) -> Result<KeyId> {
        let keypair = IdentityKeypair::generate();
        let mut secret = keypair.secret_bytes();
        let now = Utc::now();
        let record = IdentityKeyRecord {
            id: KeyId::new(Uuid::new_v4().to_string())?,
            secret_key: secret.to_vec(),
            public_key: keypair.public_bytes().to_vec(),
            created_at: now,
            expires_at: now
                + chrono::Duration::milliseconds(self.config.rotation_interval_ms as i64),
            is_active: true,
            version: KEY_VERSION,
        };
        secret.zeroize();

        // Publish first; activation is contingent on the directory
        // accepting the key.
        let published = PublishedKey::for_record(&record, reason);
        let executor = RetryExecutor::new(self.retry.clone());
        let directory = self.directory.clone();
        executor
            .execute(|| {
                let directory = directory.clone();
                let published = published.clone();
                async move { directory.publish(&published).await }
            })
            .await
            .map_err(|err| {
                Error::RotationFailed(format!("could not publish key {}: {}", record.id, err))
            })?;

        if let Some(index) = inner.keys.iter().position(|k| k.is_active) {
            let mut superseded = inner.keys[index].clone();
            superseded.is_active = false;
            self.persist(&superseded).await?;
            inner.keys[index].is_active = false;
        }

        let key_id = record.id.clone();
        self.persist(&record).await?;
        inner.keys.push(record);

        self.prune(inner).await?;

        Ok(key_id)
    }

    /// Delete superseded keys beyond the retention cap, but only once
    /// they are also expired. The active key is never pruned.
    async fn prune(&self, inner: &mut EngineState) -> Result<()> {
        let cap = self.config.max_active_keys;
        if inner.keys.len() <= cap {
            return Ok(());
        }

        let now = Utc::now();
        let mut budget = inner.keys.len() - cap;
        let mut to_remove: Vec<KeyId> = Vec::new();
        for record in &inner.keys {
            if budget == 0 {
                break;
            }
            if !record.is_active && record.is_expired(now) {
                to_remove.push(record.id.clone());
                budget -= 1;
            }
        }

        for id in &to_remove {
            self.state
                .delete(Partition::IdentityKeys, id.as_str())
                .await?;
        }
        inner.keys.retain(|k| !to_remove.contains(&k.id));

        if !to_remove.is_empty() {
            debug!(count = to_remove.len(), "pruned superseded identity keys");
        }
        Ok(())
    }

    async fn persist(&self, record: &IdentityKeyRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        self.state
            .put(Partition::IdentityKeys, record.id.as_str(), bytes)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryKeyDirectory;
    use std::time::Duration;
    use strongroom_crypto::{sharing::share_key, MasterKey, SoftwareCrypto};
    use strongroom_state::MemoryStateStore;

    fn fast_retry() -> RetryConfig {
        RetryConfig::new(2)
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter(false)
    }

    fn engine_with(
        state: Arc<MemoryStateStore>,
        directory: Arc<MemoryKeyDirectory>,
        config: EngineConfig,
    ) -> RotationEngine {
        RotationEngine::with_retry(
            Arc::new(SoftwareCrypto::new()),
            state,
            directory,
            config,
            fast_retry(),
        )
    }

    fn test_engine() -> (RotationEngine, Arc<MemoryKeyDirectory>) {
        let directory = Arc::new(MemoryKeyDirectory::new());
        let engine = engine_with(
            Arc::new(MemoryStateStore::new()),
            directory.clone(),
            EngineConfig::default(),
        );
        (engine, directory)
    }

    #[tokio::test]
    async fn test_initialize_creates_and_publishes_first_key() {
        let (engine, directory) = test_engine();
        let mut events = engine.subscribe();

        let key_id = engine.initialize().await.unwrap();

        assert!(directory.contains(&key_id));
        let active = engine.active_key().await.unwrap();
        assert_eq!(active.id, key_id);
        assert!(active.is_active);

        match events.recv().await.unwrap() {
            RotationEvent::Initialized { key_id: event_id } => assert_eq!(event_id, key_id),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let (engine, directory) = test_engine();

        let first = engine.initialize().await.unwrap();
        let second = engine.initialize().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(directory.len(), 1);
    }

    #[tokio::test]
    async fn test_initialize_reloads_persisted_history() {
        let state = Arc::new(MemoryStateStore::new());
        let directory = Arc::new(MemoryKeyDirectory::new());

        let engine = engine_with(state.clone(), directory.clone(), EngineConfig::default());
        engine.initialize().await.unwrap();
        let rotated = engine.rotate(RotationReason::Manual).await.unwrap();
        drop(engine);

        let reloaded = engine_with(state, directory, EngineConfig::default());
        let active = reloaded.initialize().await.unwrap();

        assert_eq!(active, rotated);
        assert_eq!(reloaded.history().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rotate_supersedes_old_key() {
        let (engine, directory) = test_engine();
        let first = engine.initialize().await.unwrap();
        let mut events = engine.subscribe();

        let second = engine.rotate(RotationReason::Manual).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(engine.active_key().await.unwrap().id, second);
        assert_eq!(directory.len(), 2);

        let history = engine.history().await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, second);
        assert!(!history[1].is_active);

        match events.recv().await.unwrap() {
            RotationEvent::Rotated {
                old_key_id,
                new_key_id,
                reason,
            } => {
                assert_eq!(old_key_id, Some(first));
                assert_eq!(new_key_id, second);
                assert_eq!(reason, RotationReason::Manual);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_old_key_active() {
        let (engine, directory) = test_engine();
        let first = engine.initialize().await.unwrap();
        let mut events = engine.subscribe();

        // More failures than the retry budget allows.
        directory.fail_next(10);
        let result = engine.rotate(RotationReason::Compromise).await;

        assert!(matches!(result, Err(Error::RotationFailed(_))));
        assert_eq!(engine.active_key().await.unwrap().id, first);
        assert_eq!(engine.history().await.unwrap().len(), 1);

        match events.recv().await.unwrap() {
            RotationEvent::RotationFailed { .. } => {}
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_publish_retries_transient_failures() {
        let (engine, directory) = test_engine();
        engine.initialize().await.unwrap();

        // One failure, then success; within the retry budget.
        directory.fail_next(1);
        let rotated = engine.rotate(RotationReason::Manual).await.unwrap();

        assert!(directory.contains(&rotated));
        assert_eq!(engine.active_key().await.unwrap().id, rotated);
    }

    #[tokio::test]
    async fn test_check_does_nothing_for_fresh_key() {
        let (engine, _) = test_engine();
        let first = engine.initialize().await.unwrap();

        let result = engine.check_and_rotate_if_needed().await.unwrap();

        assert!(result.is_none());
        assert_eq!(engine.active_key().await.unwrap().id, first);
    }

    #[tokio::test]
    async fn test_check_rotates_expired_key() {
        let directory = Arc::new(MemoryKeyDirectory::new());
        let config = EngineConfig {
            rotation_interval_ms: 20,
            pre_rotation_warning_ms: 5,
            ..EngineConfig::default()
        };
        let engine = engine_with(Arc::new(MemoryStateStore::new()), directory, config);
        let first = engine.initialize().await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        let rotated = engine.check_and_rotate_if_needed().await.unwrap();

        let new_key_id = rotated.expect("expired key should rotate");
        assert_ne!(new_key_id, first);
        assert_eq!(engine.active_key().await.unwrap().id, new_key_id);
    }

    #[tokio::test]
    async fn test_warning_inside_window_does_not_rotate() {
        let directory = Arc::new(MemoryKeyDirectory::new());
        let config = EngineConfig {
            rotation_interval_ms: 60 * 60 * 1000,
            pre_rotation_warning_ms: 60 * 60 * 1000 - 1,
            ..EngineConfig::default()
        };
        let engine = engine_with(Arc::new(MemoryStateStore::new()), directory, config);
        let first = engine.initialize().await.unwrap();
        let mut events = engine.subscribe();

        let result = engine.check_and_rotate_if_needed().await.unwrap();

        assert!(result.is_none());
        assert_eq!(engine.active_key().await.unwrap().id, first);
        match events.recv().await.unwrap() {
            RotationEvent::RotationWarning {
                key_id,
                days_remaining,
            } => {
                assert_eq!(key_id, first);
                assert_eq!(days_remaining, 0);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disabled_auto_rotation_only_warns() {
        let directory = Arc::new(MemoryKeyDirectory::new());
        let config = EngineConfig {
            rotation_interval_ms: 20,
            pre_rotation_warning_ms: 5,
            auto_rotation_enabled: false,
            ..EngineConfig::default()
        };
        let engine = engine_with(Arc::new(MemoryStateStore::new()), directory, config);
        let first = engine.initialize().await.unwrap();
        let mut events = engine.subscribe();

        tokio::time::sleep(Duration::from_millis(40)).await;
        let result = engine.check_and_rotate_if_needed().await.unwrap();

        assert!(result.is_none());
        assert_eq!(engine.active_key().await.unwrap().id, first);
        assert!(matches!(
            events.recv().await.unwrap(),
            RotationEvent::RotationWarning { .. }
        ));

        // A manual rotation still goes through.
        let rotated = engine.rotate(RotationReason::Manual).await.unwrap();
        assert_ne!(rotated, first);
    }

    #[tokio::test]
    async fn test_unwrap_with_history_covers_superseded_keys() {
        let (engine, _) = test_engine();
        engine.initialize().await.unwrap();

        let crypto = SoftwareCrypto::new();
        let sender = IdentityKeypair::generate();
        let vault_key = MasterKey::from_bytes([0x11u8; 32]);

        // Share to the current key, then rotate it away.
        let old_public = engine.active_key().await.unwrap().public().unwrap();
        let payload = share_key(&crypto, &vault_key, &old_public, &sender).unwrap();
        engine.rotate(RotationReason::Manual).await.unwrap();

        let unwrapped = engine
            .unwrap_with_history(&payload, sender.public())
            .await
            .unwrap();
        assert_eq!(unwrapped.as_bytes(), vault_key.as_bytes());
    }

    #[tokio::test]
    async fn test_unwrap_with_no_matching_key() {
        let (engine, _) = test_engine();
        engine.initialize().await.unwrap();

        let crypto = SoftwareCrypto::new();
        let sender = IdentityKeypair::generate();
        let stranger = IdentityKeypair::generate();
        let vault_key = MasterKey::from_bytes([0x22u8; 32]);

        // Shared to a key the engine never owned.
        let payload = share_key(&crypto, &vault_key, stranger.public(), &sender).unwrap();

        let result = engine.unwrap_with_history(&payload, sender.public()).await;
        assert!(matches!(result, Err(Error::NoMatchingKey)));
    }

    #[tokio::test]
    async fn test_prune_caps_expired_history() {
        let state = Arc::new(MemoryStateStore::new());
        let directory = Arc::new(MemoryKeyDirectory::new());
        let config = EngineConfig {
            rotation_interval_ms: 1,
            pre_rotation_warning_ms: 0,
            max_active_keys: 2,
            ..EngineConfig::default()
        };
        // Interval of 1 ms means every superseded key is already expired.
        let engine = engine_with(state.clone(), directory, config);
        engine.initialize().await.unwrap();

        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            engine.rotate(RotationReason::Manual).await.unwrap();
        }

        let history = engine.history().await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].is_active);

        let persisted = state.list_keys(Partition::IdentityKeys).await.unwrap();
        assert_eq!(persisted.len(), 2);
    }

    #[tokio::test]
    async fn test_operations_require_initialize() {
        let (engine, _) = test_engine();

        assert!(engine.active_key().await.is_err());
        assert!(engine.rotate(RotationReason::Manual).await.is_err());
        assert!(engine.check_and_rotate_if_needed().await.is_err());
    }
}
