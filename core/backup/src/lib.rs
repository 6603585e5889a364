//! Password-protected backups of identity keypairs.
//!
//! The secret half of an identity keypair is sealed under a key derived
//! from a user-chosen recovery password and parked in remote backup
//! storage. Recovery re-derives the key from the password and refuses to
//! say anything more specific than "recovery failed" when it cannot.
//!
//! [`BackupStore`] abstracts the remote storage; [`MemoryBackupStore`]
//! backs tests. The local state store keeps a lightweight index of
//! known backups so they can be listed offline.

pub mod record;
pub mod service;
pub mod store;

pub use record::{BackupIndexEntry, BackupRecord, BACKUP_VERSION};
pub use service::BackupService;
pub use store::{BackupStore, MemoryBackupStore};
