//! Cryptographic primitives for Strongroom.
//!
//! This crate provides:
//! - Key derivation using Argon2id
//! - Deterministic per-file key derivation via keyed Blake2b
//! - Authenticated encryption using XChaCha20-Poly1305
//! - Chunked streaming encryption with truncation protection
//! - Authenticated x25519 key sharing between vault members
//! - A [`provider::CryptoProvider`] trait so platforms can substitute
//!   hardware-backed primitives
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Constant-time operations for sensitive comparisons

pub mod aead;
pub mod filekey;
pub mod kdf;
pub mod keys;
pub mod provider;
pub mod sharing;
pub mod stream;

pub use filekey::derive_file_key;
pub use kdf::{derive_key, KdfParams};
pub use keys::{FileKey, IdentityKeypair, MasterKey, PublicKey, Salt};
pub use provider::{CryptoProvider, SoftwareCrypto};
pub use sharing::{share_key, unshare_key};
pub use stream::{CancelToken, EncryptedFile, FileEnvelope, FileMetadata, StreamDecryptor, StreamEncryptor};
