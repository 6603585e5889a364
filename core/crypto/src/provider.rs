//! Pluggable crypto primitives.
//!
//! Higher-level components (key store, rotation, backup, streaming) talk
//! to a [`CryptoProvider`] instead of concrete algorithms, so a platform
//! with hardware-backed primitives can substitute its own implementation.
//! [`SoftwareCrypto`] is the default pure-software provider: Argon2id for
//! password derivation, keyed Blake2b for sub-key derivation, and
//! XChaCha20-Poly1305 for authenticated encryption.

use blake2::digest::consts::U32;
use blake2::digest::{Digest, Mac};
use blake2::{Blake2b, Blake2bMac};
use rand::RngCore;
use subtle::ConstantTimeEq;

use crate::aead;
use crate::kdf::{self, KdfParams};
use crate::keys::{MasterKey, Salt, KEY_LENGTH};
use strongroom_common::{Error, Result};

/// Length of sub-key derivation contexts in bytes.
pub const CONTEXT_LENGTH: usize = 8;

/// Length of digests produced by [`CryptoProvider::digest`].
pub const DIGEST_LENGTH: usize = 32;

/// Nonce size re-exported for provider callers.
pub use crate::aead::NONCE_SIZE;

/// Capability surface required from a crypto implementation.
///
/// Implementations must be deterministic for the derivation operations
/// and must never log or retain key material.
pub trait CryptoProvider: Send + Sync {
    /// Derive a master key from a password with Argon2id-equivalent
    /// hardness.
    fn derive_password_key(
        &self,
        password: &[u8],
        salt: &Salt,
        params: &KdfParams,
    ) -> Result<MasterKey>;

    /// Derive a sub-key from `key` for the given index and 8-byte
    /// context. Deterministic; distinct (index, context) pairs yield
    /// independent keys.
    fn keyed_derive(
        &self,
        key: &[u8; KEY_LENGTH],
        index: u64,
        context: &[u8; CONTEXT_LENGTH],
    ) -> Result<[u8; KEY_LENGTH]>;

    /// Unkeyed 256-bit digest.
    fn digest(&self, data: &[u8]) -> [u8; DIGEST_LENGTH];

    /// Authenticated encryption with a caller-supplied nonce.
    fn aead_seal(
        &self,
        key: &[u8; KEY_LENGTH],
        nonce: &[u8; NONCE_SIZE],
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>>;

    /// Authenticated decryption with a caller-supplied nonce.
    fn aead_open(
        &self,
        key: &[u8; KEY_LENGTH],
        nonce: &[u8; NONCE_SIZE],
        ciphertext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>>;

    /// Fill `dest` with cryptographically secure random bytes.
    fn random_bytes(&self, dest: &mut [u8]);

    /// Constant-time equality check. Slices of different lengths compare
    /// unequal.
    fn constant_time_eq(&self, a: &[u8], b: &[u8]) -> bool;
}

/// Default software provider.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftwareCrypto;

impl SoftwareCrypto {
    /// Create a new software provider.
    pub fn new() -> Self {
        Self
    }
}

impl CryptoProvider for SoftwareCrypto {
    fn derive_password_key(
        &self,
        password: &[u8],
        salt: &Salt,
        params: &KdfParams,
    ) -> Result<MasterKey> {
        kdf::derive_key(password, salt, params)
    }

    fn keyed_derive(
        &self,
        key: &[u8; KEY_LENGTH],
        index: u64,
        context: &[u8; CONTEXT_LENGTH],
    ) -> Result<[u8; KEY_LENGTH]> {
        // Keyed Blake2b with the index in the salt field and the context
        // in the personalization field; the message is empty.
        let mut salt = [0u8; 16];
        salt[..8].copy_from_slice(&index.to_le_bytes());

        let mac = Blake2bMac::<U32>::new_with_salt_and_personal(key, &salt, context)
            .map_err(|e| Error::Derivation(format!("sub-key derivation failed: {}", e)))?;

        let output = mac.finalize().into_bytes();
        let mut derived = [0u8; KEY_LENGTH];
        derived.copy_from_slice(&output);
        Ok(derived)
    }

    fn digest(&self, data: &[u8]) -> [u8; DIGEST_LENGTH] {
        let mut hasher = Blake2b::<U32>::new();
        hasher.update(data);
        let result = hasher.finalize();
        let mut digest = [0u8; DIGEST_LENGTH];
        digest.copy_from_slice(&result);
        digest
    }

    fn aead_seal(
        &self,
        key: &[u8; KEY_LENGTH],
        nonce: &[u8; NONCE_SIZE],
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>> {
        aead::encrypt_with_nonce(key, nonce, plaintext, aad)
    }

    fn aead_open(
        &self,
        key: &[u8; KEY_LENGTH],
        nonce: &[u8; NONCE_SIZE],
        ciphertext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>> {
        aead::decrypt_with_nonce(key, nonce, ciphertext, aad)
    }

    fn random_bytes(&self, dest: &mut [u8]) {
        rand::thread_rng().fill_bytes(dest);
    }

    fn constant_time_eq(&self, a: &[u8], b: &[u8]) -> bool {
        a.ct_eq(b).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyed_derive_deterministic() {
        let crypto = SoftwareCrypto::new();
        let key = [9u8; KEY_LENGTH];

        let a = crypto.keyed_derive(&key, 1, b"filekey\0").unwrap();
        let b = crypto.keyed_derive(&key, 1, b"filekey\0").unwrap();

        assert_eq!(a, b);
    }

    #[test]
    fn test_keyed_derive_index_separation() {
        let crypto = SoftwareCrypto::new();
        let key = [9u8; KEY_LENGTH];

        let a = crypto.keyed_derive(&key, 1, b"filekey\0").unwrap();
        let b = crypto.keyed_derive(&key, 2, b"filekey\0").unwrap();

        assert_ne!(a, b);
    }

    #[test]
    fn test_keyed_derive_context_separation() {
        let crypto = SoftwareCrypto::new();
        let key = [9u8; KEY_LENGTH];

        let a = crypto.keyed_derive(&key, 1, b"filekey\0").unwrap();
        let b = crypto.keyed_derive(&key, 1, b"keyshare").unwrap();

        assert_ne!(a, b);
    }

    #[test]
    fn test_keyed_derive_key_separation() {
        let crypto = SoftwareCrypto::new();

        let a = crypto.keyed_derive(&[1u8; KEY_LENGTH], 1, b"filekey\0").unwrap();
        let b = crypto.keyed_derive(&[2u8; KEY_LENGTH], 1, b"filekey\0").unwrap();

        assert_ne!(a, b);
    }

    #[test]
    fn test_digest_stable() {
        let crypto = SoftwareCrypto::new();

        assert_eq!(crypto.digest(b"file-1"), crypto.digest(b"file-1"));
        assert_ne!(crypto.digest(b"file-1"), crypto.digest(b"file-2"));
    }

    #[test]
    fn test_constant_time_eq() {
        let crypto = SoftwareCrypto::new();

        assert!(crypto.constant_time_eq(b"same", b"same"));
        assert!(!crypto.constant_time_eq(b"same", b"sbme"));
        assert!(!crypto.constant_time_eq(b"same", b"longer-input"));
    }

    #[test]
    fn test_random_bytes_distinct() {
        let crypto = SoftwareCrypto::new();
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];

        crypto.random_bytes(&mut a);
        crypto.random_bytes(&mut b);

        assert_ne!(a, b);
    }

    #[test]
    fn test_seal_open_roundtrip_with_aad() {
        let crypto = SoftwareCrypto::new();
        let key = [3u8; KEY_LENGTH];
        let nonce = [5u8; NONCE_SIZE];

        let sealed = crypto.aead_seal(&key, &nonce, b"payload", b"context").unwrap();
        let opened = crypto.aead_open(&key, &nonce, &sealed, b"context").unwrap();
        assert_eq!(opened, b"payload");

        assert!(crypto.aead_open(&key, &nonce, &sealed, b"other").is_err());
    }
}
