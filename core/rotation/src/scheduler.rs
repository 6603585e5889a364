//! Background rotation scheduling.
//!
//! The scheduler periodically drives [`RotationEngine::check_and_rotate_if_needed`]
//! and relays manual triggers into the same loop. Deadline state lives
//! in the persisted key records, not in the timer: the first tick fires
//! immediately, so a rotation missed while the process was down is
//! caught up right after startup.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use strongroom_common::{Error, KeyId, Result};

use crate::engine::RotationEngine;
use crate::key::RotationReason;

/// Requests handled by the scheduler loop.
#[derive(Debug)]
pub enum RotationRequest {
    /// Run an expiry check now.
    Check,
    /// Rotate immediately.
    Rotate(RotationReason),
    /// Stop the scheduler.
    Shutdown,
}

/// Front handle for a running scheduler.
pub struct RotationScheduler {
    request_tx: mpsc::Sender<(RotationRequest, oneshot::Sender<Result<Option<KeyId>>>)>,
}

impl RotationScheduler {
    /// Create a scheduler and the background task handle to spawn.
    pub fn new(
        engine: Arc<RotationEngine>,
        check_interval: Duration,
    ) -> (Self, RotationSchedulerHandle) {
        let (request_tx, request_rx) = mpsc::channel(16);

        let scheduler = Self { request_tx };
        let handle = RotationSchedulerHandle {
            engine,
            check_interval,
            request_rx,
        };

        (scheduler, handle)
    }

    /// Run an expiry check on the scheduler task.
    ///
    /// Returns the new key id if the check rotated.
    pub async fn check_now(&self) -> Result<Option<KeyId>> {
        self.request(RotationRequest::Check).await
    }

    /// Rotate on the scheduler task.
    pub async fn rotate_now(&self, reason: RotationReason) -> Result<Option<KeyId>> {
        self.request(RotationRequest::Rotate(reason)).await
    }

    /// Stop the scheduler loop.
    pub async fn shutdown(&self) {
        let (response_tx, _) = oneshot::channel();
        let _ = self
            .request_tx
            .send((RotationRequest::Shutdown, response_tx))
            .await;
    }

    async fn request(&self, request: RotationRequest) -> Result<Option<KeyId>> {
        let (response_tx, response_rx) = oneshot::channel();

        self.request_tx
            .send((request, response_tx))
            .await
            .map_err(|_| Error::State("rotation scheduler not running".to_string()))?;

        response_rx
            .await
            .map_err(|_| Error::State("rotation scheduler dropped the request".to_string()))?
    }
}

/// Background task half of the scheduler.
pub struct RotationSchedulerHandle {
    engine: Arc<RotationEngine>,
    check_interval: Duration,
    request_rx: mpsc::Receiver<(RotationRequest, oneshot::Sender<Result<Option<KeyId>>>)>,
}

impl RotationSchedulerHandle {
    /// Run the scheduler loop. Spawn this in a tokio task.
    pub async fn run(mut self) {
        let mut ticker = interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval = ?self.check_interval, "rotation scheduler started");

        loop {
            tokio::select! {
                Some((request, response_tx)) = self.request_rx.recv() => {
                    match request {
                        RotationRequest::Shutdown => {
                            info!("rotation scheduler shutting down");
                            let _ = response_tx.send(Ok(None));
                            break;
                        }
                        RotationRequest::Check => {
                            let result = self.engine.check_and_rotate_if_needed().await;
                            let _ = response_tx.send(result);
                        }
                        RotationRequest::Rotate(reason) => {
                            let result = self.engine.rotate(reason).await.map(Some);
                            let _ = response_tx.send(result);
                        }
                    }
                }

                _ = ticker.tick() => {
                    match self.engine.check_and_rotate_if_needed().await {
                        Ok(Some(key_id)) => {
                            info!(key_id = %key_id, "scheduled rotation completed");
                        }
                        Ok(None) => {
                            debug!("rotation check: no action needed");
                        }
                        Err(err) => {
                            error!(error = %err, "rotation check failed");
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryKeyDirectory;
    use strongroom_common::{EngineConfig, RetryConfig};
    use strongroom_crypto::SoftwareCrypto;
    use strongroom_state::MemoryStateStore;

    fn engine(config: EngineConfig) -> Arc<RotationEngine> {
        Arc::new(RotationEngine::with_retry(
            Arc::new(SoftwareCrypto::new()),
            Arc::new(MemoryStateStore::new()),
            Arc::new(MemoryKeyDirectory::new()),
            config,
            RetryConfig::new(1).with_initial_delay(Duration::from_millis(1)),
        ))
    }

    #[tokio::test]
    async fn test_manual_check_and_rotate() {
        let engine = engine(EngineConfig::default());
        let first = engine.initialize().await.unwrap();

        let (scheduler, handle) = RotationScheduler::new(engine.clone(), Duration::from_secs(3600));
        let task = tokio::spawn(handle.run());

        // Fresh key: nothing to do.
        assert_eq!(scheduler.check_now().await.unwrap(), None);

        // Manual trigger rotates regardless of expiry.
        let rotated = scheduler
            .rotate_now(RotationReason::Compromise)
            .await
            .unwrap()
            .expect("manual rotation returns the new key id");
        assert_ne!(rotated, first);
        assert_eq!(engine.active_key().await.unwrap().id, rotated);

        scheduler.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_periodic_ticks_rotate_expired_keys() {
        let config = EngineConfig {
            rotation_interval_ms: 30,
            pre_rotation_warning_ms: 5,
            ..EngineConfig::default()
        };
        let engine = engine(config);
        let first = engine.initialize().await.unwrap();

        let (scheduler, handle) = RotationScheduler::new(engine.clone(), Duration::from_millis(10));
        let task = tokio::spawn(handle.run());

        tokio::time::sleep(Duration::from_millis(150)).await;

        let active = engine.active_key().await.unwrap();
        assert_ne!(active.id, first);

        scheduler.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_requests_after_shutdown_fail() {
        let engine = engine(EngineConfig::default());
        engine.initialize().await.unwrap();

        let (scheduler, handle) = RotationScheduler::new(engine, Duration::from_secs(3600));
        let task = tokio::spawn(handle.run());

        scheduler.shutdown().await;
        task.await.unwrap();

        assert!(scheduler.check_now().await.is_err());
    }
}
