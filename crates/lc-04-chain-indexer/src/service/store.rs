//! # Section Store
//!
//! Committed sections of one indexer on top of the shared key-value store.

use shared_types::{BatchOperation, Hash, KeyValueStore};
use std::fmt;
use std::sync::Arc;

use crate::domain::keys;
use crate::domain::IndexerError;

/// Everything a backend produces for one section.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SectionCommit {
    pub root: Hash,
    /// `(suffix, value)` data entries; deleted by the pruner.
    pub data: Vec<(Vec<u8>, Vec<u8>)>,
    /// Metadata kept for the lifetime of the store.
    pub meta: Option<Vec<u8>>,
}

/// Committed sections of the indexer called `name`.
#[derive(Clone)]
pub struct SectionStore {
    name: Arc<str>,
    kv: Arc<dyn KeyValueStore>,
}

impl SectionStore {
    pub fn new(name: &str, kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            name: Arc::from(name),
            kv,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of committed sections; they cover `0..count`.
    pub fn section_count(&self) -> Result<u64, IndexerError> {
        self.read_counter(&keys::count_key(&self.name))
    }

    /// Sections `0..pruned` have had their data deleted.
    pub fn pruned_count(&self) -> Result<u64, IndexerError> {
        self.read_counter(&keys::pruned_key(&self.name))
    }

    pub fn section_root(&self, section: u64) -> Result<Option<Hash>, IndexerError> {
        match self.kv.get(&keys::root_key(&self.name, section))? {
            None => Ok(None),
            Some(bytes) => {
                let root: Hash = bytes.as_slice().try_into().map_err(|_| {
                    IndexerError::Corrupt(format!("{} root {} has {} bytes", self.name, section, bytes.len()))
                })?;
                Ok(Some(root))
            }
        }
    }

    pub fn meta(&self, section: u64) -> Result<Option<Vec<u8>>, IndexerError> {
        Ok(self.kv.get(&keys::meta_key(&self.name, section))?)
    }

    pub fn data(&self, section: u64, suffix: &[u8]) -> Result<Option<Vec<u8>>, IndexerError> {
        Ok(self.kv.get(&keys::data_key(&self.name, section, suffix))?)
    }

    /// Write `section` atomically. Sections commit strictly in order.
    pub fn commit_section(&self, section: u64, commit: SectionCommit) -> Result<(), IndexerError> {
        let expected = self.section_count()?;
        if section != expected {
            return Err(IndexerError::OutOfOrder { section, expected });
        }

        let mut ops: Vec<BatchOperation> = commit
            .data
            .into_iter()
            .map(|(suffix, value)| BatchOperation::put(keys::data_key(&self.name, section, &suffix), value))
            .collect();
        if let Some(meta) = commit.meta {
            ops.push(BatchOperation::put(keys::meta_key(&self.name, section), meta));
        }
        ops.push(BatchOperation::put(
            keys::root_key(&self.name, section),
            commit.root.to_vec(),
        ));
        ops.push(BatchOperation::put(
            keys::count_key(&self.name),
            (section + 1).to_be_bytes().to_vec(),
        ));

        self.kv.atomic_batch_write(ops)?;
        Ok(())
    }

    /// Delete the data of the oldest unpruned section. Roots and metadata
    /// stay. Returns the number of entries removed.
    pub fn prune_section(&self, section: u64) -> Result<usize, IndexerError> {
        let pruned = self.pruned_count()?;
        if section != pruned {
            return Err(IndexerError::OutOfOrder {
                section,
                expected: pruned,
            });
        }
        if section >= self.section_count()? {
            return Err(IndexerError::Corrupt(format!(
                "{} section {} is not committed",
                self.name, section
            )));
        }

        let entries = self.kv.prefix_scan(&keys::data_prefix(&self.name, section))?;
        let removed = entries.len();
        let mut ops: Vec<BatchOperation> = entries
            .into_iter()
            .map(|(key, _)| BatchOperation::delete(key))
            .collect();
        ops.push(BatchOperation::put(
            keys::pruned_key(&self.name),
            (section + 1).to_be_bytes().to_vec(),
        ));
        self.kv.atomic_batch_write(ops)?;
        Ok(removed)
    }

    fn read_counter(&self, key: &[u8]) -> Result<u64, IndexerError> {
        match self.kv.get(key)? {
            None => Ok(0),
            Some(bytes) => keys::decode_u64(&bytes).ok_or_else(|| {
                IndexerError::Corrupt(format!("{} counter has {} bytes", self.name, bytes.len()))
            }),
        }
    }
}

impl fmt::Debug for SectionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SectionStore").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::InMemoryKVStore;

    fn store() -> SectionStore {
        SectionStore::new("test", Arc::new(InMemoryKVStore::new()))
    }

    fn commit(root: u8) -> SectionCommit {
        SectionCommit {
            root: [root; 32],
            data: vec![(b"a".to_vec(), vec![1]), (b"b".to_vec(), vec![2])],
            meta: Some(vec![root]),
        }
    }

    #[test]
    fn test_commit_in_order() {
        let store = store();
        assert_eq!(store.section_count().unwrap(), 0);

        store.commit_section(0, commit(1)).unwrap();
        assert!(matches!(
            store.commit_section(2, commit(3)),
            Err(IndexerError::OutOfOrder { section: 2, expected: 1 })
        ));
        store.commit_section(1, commit(2)).unwrap();

        assert_eq!(store.section_count().unwrap(), 2);
        assert_eq!(store.section_root(1).unwrap(), Some([2; 32]));
        assert_eq!(store.data(0, b"b").unwrap(), Some(vec![2]));
        assert_eq!(store.section_root(2).unwrap(), None);
    }

    #[test]
    fn test_prune_keeps_roots_and_meta() {
        let store = store();
        store.commit_section(0, commit(1)).unwrap();
        store.commit_section(1, commit(2)).unwrap();

        assert_eq!(store.prune_section(0).unwrap(), 2);
        assert_eq!(store.pruned_count().unwrap(), 1);
        assert_eq!(store.data(0, b"a").unwrap(), None);
        assert_eq!(store.section_root(0).unwrap(), Some([1; 32]));
        assert_eq!(store.meta(0).unwrap(), Some(vec![1]));
        // Section 1 is untouched.
        assert_eq!(store.data(1, b"a").unwrap(), Some(vec![1]));
    }

    #[test]
    fn test_prune_must_be_contiguous_and_committed() {
        let store = store();
        store.commit_section(0, commit(1)).unwrap();
        assert!(store.prune_section(1).is_err());
        store.prune_section(0).unwrap();
        assert!(store.prune_section(1).is_err());
    }
}
