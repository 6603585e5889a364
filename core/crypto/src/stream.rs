//! Streaming encryption for large files.
//!
//! Plaintext is split into fixed-size chunks and each chunk is
//! independently authenticated. Chunk nonces are derived from a random
//! base nonce XORed with the chunk index, and every chunk's associated
//! data carries the format version, its index, and a final-chunk flag,
//! so chunks cannot be reordered, substituted across files, or silently
//! truncated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use zeroize::Zeroize;

use crate::aead::NONCE_SIZE;
use crate::keys::FileKey;
use crate::provider::CryptoProvider;
use strongroom_common::{EngineConfig, Error, Result};

/// Stream format version carried in the envelope and every chunk AAD.
pub const STREAM_FORMAT_VERSION: u8 = 1;

/// Default chunk size for streaming encryption (32 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

/// Default ceiling on plaintext size (256 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 256 * 1024 * 1024;

/// Cooperative cancellation flag, checked between chunks.
///
/// Cancelling never tears a chunk in half; the operation stops at the
/// next chunk boundary with [`Error::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Metadata recorded alongside an encrypted file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// MIME type of the original file.
    pub mime_type: String,
    /// Original file name.
    pub original_name: String,
}

/// Everything needed to decrypt a file, except the key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEnvelope {
    /// Stream format version.
    pub format_version: u8,
    /// Base nonce the per-chunk nonces are derived from.
    pub base_nonce: [u8; NONCE_SIZE],
    /// Number of encrypted chunks. Always at least 1.
    pub chunk_count: u64,
    /// Plaintext size in bytes.
    pub original_size: u64,
    /// File metadata.
    #[serde(flatten)]
    pub metadata: FileMetadata,
    /// When the file was encrypted.
    pub created_at: DateTime<Utc>,
}

/// An envelope plus its encrypted chunks.
#[derive(Debug, Clone)]
pub struct EncryptedFile {
    pub envelope: FileEnvelope,
    pub chunks: Vec<Vec<u8>>,
}

/// Derive a per-chunk nonce by XORing the base nonce with the chunk index.
fn chunk_nonce(base: &[u8; NONCE_SIZE], index: u64) -> [u8; NONCE_SIZE] {
    let mut nonce = *base;
    let idx_bytes = index.to_le_bytes();
    for i in 0..8 {
        nonce[i] ^= idx_bytes[i];
    }
    nonce
}

/// AAD for one chunk: format_version (1) | chunk_index (8 LE) | is_final (1).
fn chunk_aad(index: u64, is_final: bool) -> [u8; 10] {
    let mut aad = [0u8; 10];
    aad[0] = STREAM_FORMAT_VERSION;
    aad[1..9].copy_from_slice(&index.to_le_bytes());
    aad[9] = u8::from(is_final);
    aad
}

/// Encrypting half of the streaming cipher.
pub struct StreamEncryptor<'a> {
    crypto: &'a dyn CryptoProvider,
    key: &'a FileKey,
    chunk_size: usize,
    max_file_size: u64,
}

impl<'a> StreamEncryptor<'a> {
    /// Create an encryptor with the default chunk size and size ceiling.
    pub fn new(crypto: &'a dyn CryptoProvider, key: &'a FileKey) -> Self {
        Self {
            crypto,
            key,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }

    /// Create an encryptor configured from the engine config.
    pub fn from_config(
        crypto: &'a dyn CryptoProvider,
        key: &'a FileKey,
        config: &EngineConfig,
    ) -> Self {
        Self {
            crypto,
            key,
            chunk_size: config.chunk_size_bytes,
            max_file_size: config.max_file_size_bytes,
        }
    }

    /// Set custom chunk size.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Set custom plaintext size ceiling.
    pub fn with_max_file_size(mut self, max: u64) -> Self {
        self.max_file_size = max;
        self
    }

    /// Encrypt a plaintext into an envelope plus chunks.
    ///
    /// # Preconditions
    /// - `plaintext` must not exceed the configured size ceiling
    ///
    /// # Postconditions
    /// - Produces at least one chunk; an empty plaintext yields a single
    ///   empty, final-tagged chunk
    /// - `envelope.chunk_count` matches `chunks.len()`
    ///
    /// # Errors
    /// - `FileTooLarge` if the plaintext exceeds the ceiling, checked
    ///   before any encryption work
    /// - `Cancelled` if the token fires between chunks
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        metadata: FileMetadata,
        cancel: &CancelToken,
    ) -> Result<EncryptedFile> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidInput("chunk size must be positive".to_string()));
        }

        let size = plaintext.len() as u64;
        if size > self.max_file_size {
            return Err(Error::FileTooLarge {
                size,
                max: self.max_file_size,
            });
        }

        let chunk_count = plaintext.len().div_ceil(self.chunk_size).max(1);

        let mut base_nonce = [0u8; NONCE_SIZE];
        self.crypto.random_bytes(&mut base_nonce);

        let mut chunks = Vec::with_capacity(chunk_count);
        for i in 0..chunk_count {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let start = i * self.chunk_size;
            let end = (start + self.chunk_size).min(plaintext.len());
            let chunk = &plaintext[start..end];
            let is_final = i == chunk_count - 1;

            let nonce = chunk_nonce(&base_nonce, i as u64);
            let aad = chunk_aad(i as u64, is_final);
            let sealed = self
                .crypto
                .aead_seal(self.key.as_bytes(), &nonce, chunk, &aad)?;
            chunks.push(sealed);
        }

        Ok(EncryptedFile {
            envelope: FileEnvelope {
                format_version: STREAM_FORMAT_VERSION,
                base_nonce,
                chunk_count: chunk_count as u64,
                original_size: size,
                metadata,
                created_at: Utc::now(),
            },
            chunks,
        })
    }
}

/// Decrypting half of the streaming cipher.
pub struct StreamDecryptor<'a> {
    crypto: &'a dyn CryptoProvider,
    key: &'a FileKey,
}

impl<'a> StreamDecryptor<'a> {
    /// Create a decryptor.
    pub fn new(crypto: &'a dyn CryptoProvider, key: &'a FileKey) -> Self {
        Self { crypto, key }
    }

    /// Decrypt chunks back into the original plaintext.
    ///
    /// Chunks are authenticated strictly in order and the operation stops
    /// at the first failure. Any partial plaintext is wiped before an
    /// error is returned.
    ///
    /// # Errors
    /// - `Integrity` on version mismatch, chunk count mismatch, any
    ///   failed chunk authentication, or a plaintext size mismatch
    /// - `Cancelled` if the token fires between chunks
    pub fn decrypt(
        &self,
        envelope: &FileEnvelope,
        chunks: &[Vec<u8>],
        cancel: &CancelToken,
    ) -> Result<Vec<u8>> {
        if envelope.format_version != STREAM_FORMAT_VERSION {
            return Err(Error::Integrity(format!(
                "unsupported stream format version {}",
                envelope.format_version
            )));
        }
        if envelope.chunk_count == 0 {
            return Err(Error::Integrity("envelope claims zero chunks".to_string()));
        }
        if envelope.chunk_count != chunks.len() as u64 {
            return Err(Error::Integrity(format!(
                "envelope claims {} chunks, got {}",
                envelope.chunk_count,
                chunks.len()
            )));
        }

        let mut plaintext = Vec::new();
        for (i, sealed) in chunks.iter().enumerate() {
            if cancel.is_cancelled() {
                plaintext.zeroize();
                return Err(Error::Cancelled);
            }

            let is_final = i == chunks.len() - 1;
            let nonce = chunk_nonce(&envelope.base_nonce, i as u64);
            let aad = chunk_aad(i as u64, is_final);

            match self
                .crypto
                .aead_open(self.key.as_bytes(), &nonce, sealed, &aad)
            {
                Ok(mut chunk) => {
                    plaintext.extend_from_slice(&chunk);
                    chunk.zeroize();
                }
                Err(_) => {
                    plaintext.zeroize();
                    return Err(Error::Integrity(format!(
                        "chunk {} failed authentication",
                        i
                    )));
                }
            }
        }

        if plaintext.len() as u64 != envelope.original_size {
            plaintext.zeroize();
            return Err(Error::Integrity(format!(
                "plaintext size {} does not match envelope size {}",
                plaintext.len(),
                envelope.original_size
            )));
        }

        Ok(plaintext)
    }
}
