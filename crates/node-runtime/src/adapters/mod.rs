//! # Runtime Adapters
//!
//! Storage backends the runtime can be started with.

pub mod storage;

pub use storage::InMemoryKVStore;

#[cfg(feature = "rocksdb")]
pub use storage::{RocksDbConfig, RocksDbStore};
