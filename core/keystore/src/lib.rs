//! Master-key wrapping, persistence, and session management.
//!
//! This crate provides:
//! - Wrapped-key records with per-unlock-method AAD domain separation
//! - A [`KeyStore`] service for storing, unlocking, and re-wrapping
//!   master keys
//! - A TTL-bounded in-memory [`SessionCache`] for unlocked keys
//! - The [`BiometricAssertionProvider`] trait for platform biometrics
//!
//! # Security Guarantees
//! - Cleartext master keys never reach the state store
//! - Every unlock failure surfaces as the same error, regardless of cause
//! - Cached keys are zeroized on eviction, clear, and drop

pub mod biometric;
pub mod cache;
pub mod record;
pub mod store;

pub use biometric::{BiometricAssertionProvider, StaticAssertionProvider};
pub use cache::{SessionCache, DEFAULT_SESSION_TTL};
pub use record::{UnlockMethod, WrappedKeyRecord};
pub use store::{KeyStore, UnlockSecret, WrapSecret};
