//! csrsign Storage - Storage abstraction, redb backend and the versioned resource store
//!
//! This crate provides:
//! - KVStore trait for storage abstraction
//! - redb-based implementation
//! - Key encoding
//! - ResourceStore: typed resources with resourceVersion preconditions and
//!   a broadcast of change events

pub mod encoding;
pub mod error;
pub mod kv;
pub mod redb_backend;
pub mod store;

// Re-export commonly used types
pub use encoding::KeyEncoder;
pub use error::{Result, StorageError};
pub use kv::{KVStore, Transaction};
pub use redb_backend::RedbBackend;
pub use store::{ResourceStore, StoreConfig};
