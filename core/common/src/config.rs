//! Engine configuration.
//!
//! One flat struct covers every tunable the engine recognizes. Unknown
//! keys are rejected on deserialization so a typo in a config file fails
//! loudly instead of silently falling back to a default.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Current configuration schema version.
pub const CONFIG_VERSION: u32 = 1;

/// Tunable parameters for the key-management engine.
///
/// Durations are stored in milliseconds and memory cost in KiB so the
/// serialized form is unit-unambiguous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Schema version of this configuration record.
    pub version: u32,
    /// How long a rotating identity key stays active.
    pub rotation_interval_ms: u64,
    /// How many identity keys (active + superseded) to retain.
    pub max_active_keys: usize,
    /// How far before expiry a rotation warning is emitted.
    pub pre_rotation_warning_ms: u64,
    /// Whether the scheduler rotates keys without being asked.
    pub auto_rotation_enabled: bool,
    /// Argon2id time cost (passes over memory).
    pub kdf_ops_cost: u32,
    /// Argon2id memory cost in KiB.
    pub kdf_mem_cost: u32,
    /// Streaming-cipher chunk size in bytes.
    pub chunk_size_bytes: usize,
    /// Largest plaintext the streaming cipher will accept.
    pub max_file_size_bytes: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            rotation_interval_ms: 30 * 24 * 60 * 60 * 1000,
            max_active_keys: 3,
            pre_rotation_warning_ms: 3 * 24 * 60 * 60 * 1000,
            auto_rotation_enabled: true,
            kdf_ops_cost: 3,
            kdf_mem_cost: 65536,
            chunk_size_bytes: 32 * 1024,
            max_file_size_bytes: 256 * 1024 * 1024,
        }
    }
}

impl EngineConfig {
    /// Validate structural invariants.
    ///
    /// KDF cost floors are enforced separately where derivation parameters
    /// are constructed.
    ///
    /// # Errors
    /// - Returns error if any field is out of its accepted range
    pub fn validate(&self) -> Result<()> {
        if self.rotation_interval_ms == 0 {
            return Err(Error::InvalidInput(
                "rotation_interval_ms must be positive".to_string(),
            ));
        }
        if self.pre_rotation_warning_ms >= self.rotation_interval_ms {
            return Err(Error::InvalidInput(
                "pre_rotation_warning_ms must be shorter than rotation_interval_ms".to_string(),
            ));
        }
        if self.max_active_keys == 0 {
            return Err(Error::InvalidInput(
                "max_active_keys must be at least 1".to_string(),
            ));
        }
        if self.chunk_size_bytes == 0 {
            return Err(Error::InvalidInput(
                "chunk_size_bytes must be positive".to_string(),
            ));
        }
        if self.max_file_size_bytes == 0 {
            return Err(Error::InvalidInput(
                "max_file_size_bytes must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Rotation interval as a Duration.
    pub fn rotation_interval(&self) -> Duration {
        Duration::from_millis(self.rotation_interval_ms)
    }

    /// Pre-rotation warning window as a Duration.
    pub fn pre_rotation_warning(&self) -> Duration {
        Duration::from_millis(self.pre_rotation_warning_ms)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserialize from JSON and validate.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}
