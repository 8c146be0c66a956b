//! # Production Storage Adapters
//!
//! Enable the `rocksdb` feature for a persistent store:
//!
//! ```toml
//! node-runtime = { path = "...", features = ["rocksdb"] }
//! ```
//!
//! Without it the runtime falls back to the shared in-memory store, which
//! loses candidates, sections and shutdown markers on exit.

#[cfg(feature = "rocksdb")]
pub mod rocksdb_adapter;

#[cfg(feature = "rocksdb")]
pub use rocksdb_adapter::{RocksDbConfig, RocksDbStore};

pub use shared_types::InMemoryKVStore;
