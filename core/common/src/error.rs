//! Common error types for Strongroom.

use thiserror::Error;

/// Top-level error type for Strongroom operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The supplied password or biometric assertion did not unlock the key.
    ///
    /// Deliberately carries no detail about which factor was wrong.
    #[error("invalid unlock secret")]
    InvalidUnlockSecret,

    /// No key material exists where some was required.
    #[error("no key found: {0}")]
    NoKeyFound(String),

    /// Ciphertext, framing, or metadata failed an integrity check.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// Plaintext exceeds the configured size ceiling.
    #[error("file of {size} bytes exceeds limit of {max} bytes")]
    FileTooLarge { size: u64, max: u64 },

    /// A key rotation could not be completed.
    #[error("key rotation failed: {0}")]
    RotationFailed(String),

    /// Backup recovery failed.
    ///
    /// Covers both a wrong backup password and a corrupted backup; the
    /// two are indistinguishable on purpose.
    #[error("backup recovery failed")]
    RecoveryFailed,

    /// Authenticated decryption of a shared payload failed.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// None of the held keys decrypts the payload.
    #[error("no matching key for payload")]
    NoMatchingKey,

    /// Key-derivation parameters fall below the accepted minimums.
    #[error("weak KDF parameters: {0}")]
    WeakParameters(String),

    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    Derivation(String),

    /// Cryptographic operation failed.
    #[error("cryptographic error: {0}")]
    Crypto(String),

    /// Persisted state could not be read or written.
    #[error("state store error: {0}")]
    State(String),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether retrying the failed operation could plausibly succeed.
    ///
    /// Only infrastructure failures qualify; cryptographic and validation
    /// failures are final.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::State(_) | Error::Io(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
