//! Platform biometric assertion interface.
//!
//! The key store never talks to platform biometric APIs directly. It
//! hands a challenge to a [`BiometricAssertionProvider`] and consumes
//! the returned assertion bytes as key material input. Platform
//! implementations are expected to be hardware-backed:
//! - iOS: Secure Enclave key with `kSecAccessControlBiometryCurrentSet`
//! - Android: StrongBox/TEE key requiring user authentication
//!
//! The assertion must be deterministic for a fixed (credential,
//! challenge) pair, since the same bytes must re-derive the same
//! wrapping key on every unlock.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use strongroom_common::{Error, Result, SensitiveBytes};
use strongroom_crypto::{CryptoProvider, SoftwareCrypto};

/// Source of signed biometric assertions.
#[async_trait]
pub trait BiometricAssertionProvider: Send + Sync {
    /// Produce assertion bytes for a stored credential over a challenge.
    ///
    /// # Errors
    /// - Returns `InvalidUnlockSecret` if the credential is unknown,
    ///   revoked, or the platform refuses the assertion
    async fn assert(&self, credential_ref: &str, challenge: &[u8]) -> Result<SensitiveBytes>;
}

/// Deterministic in-memory assertion provider for tests and development.
///
/// Each enrolled credential holds a fixed device secret; the assertion
/// is a keyed digest of the challenge, so it behaves like a hardware
/// signature without any platform dependency.
pub struct StaticAssertionProvider {
    crypto: SoftwareCrypto,
    credentials: RwLock<HashMap<String, [u8; 32]>>,
}

impl StaticAssertionProvider {
    /// Create an empty provider.
    pub fn new() -> Self {
        Self {
            crypto: SoftwareCrypto::new(),
            credentials: RwLock::new(HashMap::new()),
        }
    }

    /// Enroll a credential with a random device secret, returning its
    /// reference string.
    pub fn enroll(&self, credential_ref: impl Into<String>) -> String {
        let credential_ref = credential_ref.into();
        let mut secret = [0u8; 32];
        self.crypto.random_bytes(&mut secret);

        let mut credentials = self.credentials.write().unwrap();
        credentials.insert(credential_ref.clone(), secret);
        credential_ref
    }

    /// Remove a credential, as if the user deleted the biometric
    /// enrollment on the device.
    pub fn revoke(&self, credential_ref: &str) {
        let mut credentials = self.credentials.write().unwrap();
        credentials.remove(credential_ref);
    }
}

impl Default for StaticAssertionProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BiometricAssertionProvider for StaticAssertionProvider {
    async fn assert(&self, credential_ref: &str, challenge: &[u8]) -> Result<SensitiveBytes> {
        let credentials = self.credentials.read().unwrap();
        let secret = credentials
            .get(credential_ref)
            .ok_or(Error::InvalidUnlockSecret)?;

        let assertion = self
            .crypto
            .keyed_derive(secret, 0, b"bioprove")
            .map(|prekey| {
                let mut data = Vec::with_capacity(prekey.len() + challenge.len());
                data.extend_from_slice(&prekey);
                data.extend_from_slice(challenge);
                self.crypto.digest(&data).to_vec()
            })?;

        Ok(SensitiveBytes::new(assertion))
    }
}
