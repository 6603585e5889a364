//! Common utilities and types shared across Strongroom crates.
//!
//! This crate provides the error taxonomy, identifier newtypes, engine
//! configuration, and the retry helper used by components that touch
//! outside infrastructure.

pub mod config;
pub mod error;
pub mod retry;
pub mod types;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use retry::{RetryConfig, RetryExecutor};
pub use types::{BackupId, KeyId, SensitiveBytes, UserId};
