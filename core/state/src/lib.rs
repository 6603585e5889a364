//! Persisted engine state for Strongroom.
//!
//! A small partitioned key/value abstraction with two backends: an
//! in-memory store for tests and a local filesystem store for devices.
//! Record serialization lives with the record owners; this crate only
//! moves opaque bytes.

pub mod config;
pub mod local;
pub mod memory;
pub mod store;

pub use config::{load_config, load_config_or_default, save_config};
pub use local::LocalStateStore;
pub use memory::MemoryStateStore;
pub use store::{Partition, StateStore};
