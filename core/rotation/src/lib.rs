//! Time-based identity key rotation.
//!
//! This crate provides:
//! - Persisted x25519 identity key records with an ordered history
//! - A [`RotationEngine`] that rotates on schedule, publishes new
//!   public keys before activating them, and prunes expired history
//! - Lifecycle events on a broadcast channel
//! - A [`RotationScheduler`] background task driving timed checks
//! - History-aware share decryption, so shares made to superseded keys
//!   keep working until those keys are pruned

pub mod directory;
pub mod engine;
pub mod key;
pub mod scheduler;

pub use directory::{KeyDirectory, MemoryKeyDirectory, PublishedKey};
pub use engine::{RotationEngine, RotationEvent};
pub use key::{IdentityKeyRecord, RotationReason};
pub use scheduler::{RotationScheduler, RotationSchedulerHandle};
