//! Stored canonical header chain.

use parking_lot::Mutex;
use shared_types::{BatchOperation, BlockHeader, Hash, KeyValueStore};
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::keys::decode_u64;
use crate::domain::{ChainEvent, IndexerError};
use crate::ports::HeaderSource;

const HEAD_KEY: &[u8] = b"hdr:head";

fn number_key(number: u64) -> Vec<u8> {
    let mut key = b"hdr:num:".to_vec();
    key.extend_from_slice(&number.to_be_bytes());
    key
}

/// Canonical headers imported by the client, one per number.
pub struct HeaderChain {
    kv: Arc<dyn KeyValueStore>,
    write_lock: Mutex<()>,
}

impl HeaderChain {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            write_lock: Mutex::new(()),
        }
    }

    pub fn head_number(&self) -> Result<Option<u64>, IndexerError> {
        match self.kv.get(HEAD_KEY)? {
            None => Ok(None),
            Some(bytes) => decode_u64(&bytes)
                .map(Some)
                .ok_or_else(|| IndexerError::Corrupt("malformed head number".into())),
        }
    }

    pub fn header(&self, number: u64) -> Result<Option<BlockHeader>, IndexerError> {
        match self.kv.get(&number_key(number))? {
            None => Ok(None),
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
        }
    }

    pub fn head(&self) -> Result<Option<BlockHeader>, IndexerError> {
        match self.head_number()? {
            None => Ok(None),
            Some(number) => self.header(number),
        }
    }

    /// Make `header` the canonical tip.
    ///
    /// Its parent must be canonical. Replacing existing blocks yields
    /// `ChainEvent::Reorg` and drops the stale headers above it.
    pub fn insert(&self, header: BlockHeader) -> Result<ChainEvent, IndexerError> {
        let _guard = self.write_lock.lock();
        let number = header.number;

        if number > 0 {
            let parent: Option<Hash> = self.header(number - 1)?.map(|p| p.hash());
            if parent != Some(header.parent_hash) {
                return Err(IndexerError::UnknownParent(number));
            }
        }

        let head = self.head_number()?;
        let replaced = match head {
            Some(head) if head >= number => {
                if self.header(number)?.map(|h| h.hash()) == Some(header.hash()) && head == number {
                    debug!("[lc-04] Header {} already canonical", number);
                    return Ok(ChainEvent::Head(header));
                }
                Some(head)
            }
            _ => None,
        };

        let mut ops = vec![
            BatchOperation::put(number_key(number), bincode::serialize(&header)?),
            BatchOperation::put(HEAD_KEY.to_vec(), number.to_be_bytes().to_vec()),
        ];
        if let Some(old_head) = replaced {
            ops.extend((number + 1..=old_head).map(|n| BatchOperation::delete(number_key(n))));
        }
        self.kv.atomic_batch_write(ops)?;

        Ok(match replaced {
            None => ChainEvent::Head(header),
            Some(old_head) => {
                let common_ancestor = number.saturating_sub(1);
                info!(
                    "[lc-04] Reorg: blocks {}..={} replaced, new head {}",
                    number, old_head, number
                );
                ChainEvent::Reorg {
                    common_ancestor,
                    head: header,
                }
            }
        })
    }
}

impl HeaderSource for HeaderChain {
    fn canonical_header(&self, number: u64) -> Option<BlockHeader> {
        self.header(number).ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::InMemoryKVStore;

    fn child(parent: &BlockHeader, salt: u64) -> BlockHeader {
        BlockHeader {
            parent_hash: parent.hash(),
            number: parent.number + 1,
            timestamp: salt,
            ..Default::default()
        }
    }

    #[test]
    fn test_extend_and_reorg() {
        let chain = HeaderChain::new(Arc::new(InMemoryKVStore::new()));
        let genesis = BlockHeader::default();
        assert_eq!(chain.insert(genesis.clone()).unwrap(), ChainEvent::Head(genesis.clone()));

        let a1 = child(&genesis, 1);
        let a2 = child(&a1, 1);
        chain.insert(a1.clone()).unwrap();
        chain.insert(a2.clone()).unwrap();
        assert_eq!(chain.head_number().unwrap(), Some(2));

        let b1 = child(&genesis, 2);
        let event = chain.insert(b1.clone()).unwrap();
        assert_eq!(
            event,
            ChainEvent::Reorg {
                common_ancestor: 0,
                head: b1.clone()
            }
        );
        assert_eq!(chain.head_number().unwrap(), Some(1));
        assert_eq!(chain.canonical_header(1), Some(b1));
        assert_eq!(chain.canonical_header(2), None);
    }

    #[test]
    fn test_unknown_parent_is_rejected() {
        let chain = HeaderChain::new(Arc::new(InMemoryKVStore::new()));
        let genesis = BlockHeader::default();
        chain.insert(genesis.clone()).unwrap();

        let orphan = child(&child(&genesis, 1), 1);
        assert!(matches!(
            chain.insert(orphan),
            Err(IndexerError::UnknownParent(2))
        ));
    }

    #[test]
    fn test_reimport_of_tip_is_a_noop() {
        let chain = HeaderChain::new(Arc::new(InMemoryKVStore::new()));
        let genesis = BlockHeader::default();
        chain.insert(genesis.clone()).unwrap();
        assert_eq!(chain.insert(genesis.clone()).unwrap(), ChainEvent::Head(genesis));
    }
}
