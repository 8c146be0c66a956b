//! Generated header chains.

use parking_lot::RwLock;
use shared_types::{BlockHeader, Bloom, Hash, ZERO_HASH};

use crate::ports::HeaderSource;

/// `count` linked headers starting at `first`, each with a bloom over its
/// number. `salt` distinguishes forks.
pub fn build_chain(first: u64, parent_hash: Hash, count: u64, salt: u64) -> Vec<BlockHeader> {
    let mut parent = parent_hash;
    (first..first + count)
        .map(|number| {
            let mut bloom = Bloom::default();
            bloom.accrue(&number.to_be_bytes());
            let header = BlockHeader {
                parent_hash: parent,
                number,
                timestamp: number * 12 + salt,
                difficulty: 1,
                bloom,
                ..Default::default()
            };
            parent = header.hash();
            header
        })
        .collect()
}

/// Header source over a vector indexed by number.
#[derive(Default)]
pub struct MemoryHeaders {
    headers: RwLock<Vec<BlockHeader>>,
}

impl MemoryHeaders {
    /// Chain of `count` headers from genesis.
    pub fn with_chain(count: u64) -> Self {
        Self {
            headers: RwLock::new(build_chain(0, ZERO_HASH, count, 0)),
        }
    }

    pub fn len(&self) -> u64 {
        self.headers.read().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.headers.read().is_empty()
    }

    pub fn head(&self) -> Option<BlockHeader> {
        self.headers.read().last().cloned()
    }

    /// Append `count` headers on top of the current head.
    pub fn extend(&self, count: u64) {
        let mut headers = self.headers.write();
        let (first, parent) = headers
            .last()
            .map(|h| (h.number + 1, h.hash()))
            .unwrap_or((0, ZERO_HASH));
        headers.extend(build_chain(first, parent, count, 0));
    }

    /// Replace everything above `ancestor` with `count` fork headers.
    pub fn fork(&self, ancestor: u64, count: u64, salt: u64) {
        let mut headers = self.headers.write();
        headers.truncate(ancestor as usize + 1);
        let parent = headers.last().map(|h| h.hash()).unwrap_or(ZERO_HASH);
        headers.extend(build_chain(ancestor + 1, parent, count, salt));
    }
}

impl HeaderSource for MemoryHeaders {
    fn canonical_header(&self, number: u64) -> Option<BlockHeader> {
        self.headers.read().get(number as usize).cloned()
    }
}
