//! Common utilities and abstractions for the bulkshuffle project.
//!
//! This module provides the shared error type and the destination store
//! abstraction that every reduce shard writes into.

pub mod error;
pub mod storage;

pub use error::{CommonError, Result};
pub use storage::{
    BatchOperation, Storage, StorageBackend, StorageBuilder, StorageConfig, StorageStats,
};
