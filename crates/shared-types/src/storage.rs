//! # Key-Value Storage Port
//!
//! Durable storage consumed by the server pool (candidate scores), the chain
//! indexers (committed sections) and the runtime (shutdown marker).
//!
//! Production: `RocksDbStore` (node-runtime/adapters/rocksdb_adapter.rs)
//! Testing: [`InMemoryKVStore`] (below)

use parking_lot::RwLock;
use std::collections::BTreeMap;
use thiserror::Error;

/// Result of a prefix scan: `(key, value)` pairs in key order.
pub type ScanResult = Vec<(Vec<u8>, Vec<u8>)>;

/// Key-value store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KVStoreError {
    /// I/O error during read/write.
    #[error("KV store I/O error: {message}")]
    IOError { message: String },
    /// Data corruption in the store.
    #[error("KV store corruption: {message}")]
    CorruptionError { message: String },
}

/// Abstract interface for key-value database operations.
///
/// Implementations use interior mutability so a single store can be shared
/// as `Arc<dyn KeyValueStore>` between subsystems.
pub trait KeyValueStore: Send + Sync {
    /// Get a value by key.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError>;

    /// Put a single key-value pair.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError>;

    /// Delete a key.
    fn delete(&self, key: &[u8]) -> Result<(), KVStoreError>;

    /// Apply all operations or none of them.
    fn atomic_batch_write(&self, operations: Vec<BatchOperation>) -> Result<(), KVStoreError>;

    /// Check if a key exists.
    fn exists(&self, key: &[u8]) -> Result<bool, KVStoreError> {
        Ok(self.get(key)?.is_some())
    }

    /// All entries whose key starts with `prefix`, in key order.
    fn prefix_scan(&self, prefix: &[u8]) -> Result<ScanResult, KVStoreError>;

    /// Persist buffered writes. No-op for stores without buffering.
    fn flush(&self) -> Result<(), KVStoreError> {
        Ok(())
    }
}

/// Batch operation for atomic writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOperation {
    /// Put a key-value pair.
    Put { key: Vec<u8>, value: Vec<u8> },
    /// Delete a key.
    Delete { key: Vec<u8> },
}

impl BatchOperation {
    /// Create a Put operation.
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Create a Delete operation.
    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Delete { key: key.into() }
    }
}

/// In-memory key-value store for tests.
///
/// Batches are applied under one write lock, so readers never observe a
/// partial batch.
#[derive(Default)]
pub struct InMemoryKVStore {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl InMemoryKVStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl KeyValueStore for InMemoryKVStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError> {
        Ok(self.data.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError> {
        self.data.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), KVStoreError> {
        self.data.write().remove(key);
        Ok(())
    }

    fn atomic_batch_write(&self, operations: Vec<BatchOperation>) -> Result<(), KVStoreError> {
        let mut data = self.data.write();
        for op in operations {
            match op {
                BatchOperation::Put { key, value } => {
                    data.insert(key, value);
                }
                BatchOperation::Delete { key } => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<ScanResult, KVStoreError> {
        let data = self.data.read();
        Ok(data
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_kv_store() {
        let store = InMemoryKVStore::new();

        store.put(b"key1", b"value1").unwrap();
        store.put(b"key2", b"value2").unwrap();

        assert_eq!(store.get(b"key1").unwrap(), Some(b"value1".to_vec()));
        assert_eq!(store.get(b"key3").unwrap(), None);
        assert!(store.exists(b"key2").unwrap());

        store.delete(b"key2").unwrap();
        assert!(!store.exists(b"key2").unwrap());
    }

    #[test]
    fn test_batch_write_mixed() {
        let store = InMemoryKVStore::new();
        store.put(b"gone", b"x").unwrap();

        store
            .atomic_batch_write(vec![
                BatchOperation::put(b"a".to_vec(), b"1".to_vec()),
                BatchOperation::delete(b"gone".to_vec()),
            ])
            .unwrap();

        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert!(!store.exists(b"gone").unwrap());
    }

    #[test]
    fn test_prefix_scan_is_ordered() {
        let store = InMemoryKVStore::new();
        store.put(b"cht:2", b"b").unwrap();
        store.put(b"cht:1", b"a").unwrap();
        store.put(b"bloom:1", b"c").unwrap();

        let cht = store.prefix_scan(b"cht:").unwrap();
        assert_eq!(cht.len(), 2);
        assert_eq!(cht[0].0, b"cht:1".to_vec());
        assert_eq!(store.prefix_scan(b"bloom:").unwrap().len(), 1);
    }
}
