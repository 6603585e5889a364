//! Per-file key derivation.
//!
//! Every file gets its own encryption key, derived deterministically from
//! the master key and the file's identifier. Rederivation on every open
//! means no per-file key is ever persisted.
//!
//! The derivation context is the first [`CONTEXT_LENGTH`] lowercase-hex
//! characters of the digest of the file id. Digesting first keeps
//! arbitrary-length ids inside the fixed-width context without collisions
//! between ids that share a prefix.

use crate::keys::{FileKey, MasterKey};
use crate::provider::{CryptoProvider, CONTEXT_LENGTH, DIGEST_LENGTH};
use strongroom_common::{Error, Result};

/// Version of the context construction. Bumping it changes every derived
/// key, so readers would need to try both schemes during a migration.
pub const FILE_KEY_SCHEME_VERSION: u8 = 1;

/// Sub-key index used for file keys.
const FILE_KEY_INDEX: u64 = 1;

/// Derive the encryption key for one file.
///
/// # Preconditions
/// - `file_id` must be non-empty
///
/// # Postconditions
/// - Deterministic: the same (master key, file id) always yields the
///   same file key
/// - Keys for distinct file ids are computationally independent
///
/// # Errors
/// - Returns error if `file_id` is empty
pub fn derive_file_key(
    crypto: &dyn CryptoProvider,
    master: &MasterKey,
    file_id: &str,
) -> Result<FileKey> {
    if file_id.is_empty() {
        return Err(Error::InvalidInput("file id cannot be empty".to_string()));
    }

    let digest = crypto.digest(file_id.as_bytes());
    let context = context_from_digest(&digest);
    let key = crypto.keyed_derive(master.as_bytes(), FILE_KEY_INDEX, &context)?;
    Ok(FileKey::from_bytes(key))
}

/// First CONTEXT_LENGTH lowercase-hex characters of the digest.
fn context_from_digest(digest: &[u8; DIGEST_LENGTH]) -> [u8; CONTEXT_LENGTH] {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut context = [0u8; CONTEXT_LENGTH];
    for (i, byte) in digest[..CONTEXT_LENGTH / 2].iter().enumerate() {
        context[i * 2] = HEX[(byte >> 4) as usize];
        context[i * 2 + 1] = HEX[(byte & 0x0f) as usize];
    }
    context
}
