//! Key derivation using Argon2id.
//!
//! Argon2id is a memory-hard password hashing function that provides
//! resistance to both GPU and time-memory trade-off attacks. Parameters
//! below the accepted floors are rejected before any derivation work.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};

use crate::keys::{MasterKey, Salt, KEY_LENGTH};
use strongroom_common::{EngineConfig, Error, Result};

/// Minimum accepted memory cost in KiB (19 MiB).
pub const MIN_MEMORY_COST: u32 = 19 * 1024;

/// Minimum accepted time cost (passes over memory).
pub const MIN_TIME_COST: u32 = 2;

/// Parallelism used when parameters come from the engine config, which
/// only carries the two cost dimensions.
const DEFAULT_PARALLELISM: u32 = 4;

/// Parameters for Argon2id key derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB (e.g., 65536 = 64 MiB).
    pub memory_cost: u32,
    /// Number of iterations.
    pub time_cost: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl KdfParams {
    /// Create parameters suitable for interactive use.
    ///
    /// These parameters provide a balance between security and usability,
    /// targeting approximately 0.5-1 second of derivation time.
    pub fn interactive() -> Self {
        Self {
            memory_cost: 65536, // 64 MiB
            time_cost: 3,
            parallelism: 4,
        }
    }

    /// Create parameters suitable for sensitive data.
    ///
    /// Higher security parameters that may take several seconds.
    pub fn sensitive() -> Self {
        Self {
            memory_cost: 262144, // 256 MiB
            time_cost: 4,
            parallelism: 4,
        }
    }

    /// Create moderate parameters for mobile devices.
    pub fn moderate() -> Self {
        Self {
            memory_cost: 32768, // 32 MiB
            time_cost: 3,
            parallelism: 2,
        }
    }

    /// Build parameters from the engine configuration.
    ///
    /// # Errors
    /// - Returns error if the configured costs fall below the floors
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let params = Self {
            memory_cost: config.kdf_mem_cost,
            time_cost: config.kdf_ops_cost,
            parallelism: DEFAULT_PARALLELISM,
        };
        params.validate()?;
        Ok(params)
    }

    /// Check the parameters against the accepted floors.
    ///
    /// # Errors
    /// - Returns `WeakParameters` naming the violated floor
    pub fn validate(&self) -> Result<()> {
        if self.memory_cost < MIN_MEMORY_COST {
            return Err(Error::WeakParameters(format!(
                "memory cost {} KiB is below the minimum of {} KiB",
                self.memory_cost, MIN_MEMORY_COST
            )));
        }
        if self.time_cost < MIN_TIME_COST {
            return Err(Error::WeakParameters(format!(
                "time cost {} is below the minimum of {}",
                self.time_cost, MIN_TIME_COST
            )));
        }
        if self.parallelism == 0 {
            return Err(Error::WeakParameters(
                "parallelism must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::interactive()
    }
}

/// Derive a master key from a password and salt using Argon2id.
///
/// # Preconditions
/// - `password` must not be empty
/// - `params` must pass [`KdfParams::validate`]
///
/// # Postconditions
/// - Returns a MasterKey derived from the password
/// - The derived key is deterministic given the same inputs
///
/// # Errors
/// - Returns error if password is empty
/// - Returns `WeakParameters` if parameters fall below the floors
/// - Returns error if Argon2id rejects the parameters
///
/// # Security
/// - Password is not stored or logged
/// - Memory is zeroized after derivation
pub fn derive_key(password: &[u8], salt: &Salt, params: &KdfParams) -> Result<MasterKey> {
    if password.is_empty() {
        return Err(Error::InvalidInput("password cannot be empty".to_string()));
    }
    params.validate()?;

    let argon2_params = Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(KEY_LENGTH),
    )
    .map_err(|e| Error::Derivation(format!("invalid KDF parameters: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key_bytes = [0u8; KEY_LENGTH];
    argon2
        .hash_password_into(password, salt.as_bytes(), &mut key_bytes)
        .map_err(|e| Error::Derivation(format!("key derivation failed: {}", e)))?;

    Ok(MasterKey::from_bytes(key_bytes))
}
