//! A light server answering from its own indexes over a generated chain.

use lc_02_request_distribution::adapters::Reply;
use lc_04_chain_indexer::adapters::MemoryHeaders;
use lc_04_chain_indexer::{
    bloom_bit_key, cht_key, BloomBitsBackend, BloomTrieBackend, ChainIndexer, ChtBackend,
    HeaderSource, IndexerConfig, IndexerError, SectionStore,
};
use parking_lot::RwLock;
use shared_types::{
    Hash, InMemoryKVStore, KeyValueStore, KeyedProof, LesMessage, MerkleMap, Receipt,
    TxStatus, TxStatusReply, BLOOM_BITS,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Honest server state. Indexes the shared chain with the client's
/// section size, so its section roots match the client's.
pub struct FakeServer {
    headers: Arc<MemoryHeaders>,
    section_size: u64,
    cht: ChainIndexer<ChtBackend>,
    bloom_bits: Arc<ChainIndexer<BloomBitsBackend>>,
    bloom_trie: ChainIndexer<BloomTrieBackend>,
    receipts: RwLock<HashMap<Hash, Vec<Receipt>>>,
    state: RwLock<MerkleMap>,
    transactions: RwLock<HashMap<Hash, TxStatusReply>>,
}

impl FakeServer {
    pub fn new(headers: Arc<MemoryHeaders>, section_size: u64) -> Result<Arc<Self>, IndexerError> {
        let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryKVStore::new());
        let source: Arc<dyn HeaderSource> = headers.clone();
        let config = IndexerConfig {
            section_size,
            confirmations: 0,
        };

        let cht = ChainIndexer::new(
            "cht",
            config.clone(),
            kv.clone(),
            source.clone(),
            ChtBackend::new(),
        )?;
        let bloom_bits = Arc::new(ChainIndexer::new(
            "bloombits",
            config.clone(),
            kv.clone(),
            source.clone(),
            BloomBitsBackend::new(section_size),
        )?);
        let bloom_trie = ChainIndexer::new(
            "bloomtrie",
            config,
            kv,
            source,
            BloomTrieBackend::new(bloom_bits.store().clone()),
        )?
        .with_upstream(bloom_bits.clone());

        let server = Arc::new(Self {
            headers,
            section_size,
            cht,
            bloom_bits,
            bloom_trie,
            receipts: RwLock::new(HashMap::new()),
            state: RwLock::new(MerkleMap::new()),
            transactions: RwLock::new(HashMap::new()),
        });
        server.sync()?;
        Ok(server)
    }

    /// Index every complete section of the current chain.
    pub fn sync(&self) -> Result<(), IndexerError> {
        let Some(head) = self.headers.head() else {
            return Ok(());
        };
        self.cht.process_head(head.number)?;
        self.bloom_bits.process_head(head.number)?;
        self.bloom_trie.process_head(head.number)?;
        Ok(())
    }

    pub fn insert_receipts(&self, block_hash: Hash, receipts: Vec<Receipt>) {
        self.receipts.write().insert(block_hash, receipts);
    }

    pub fn insert_state(&self, key: Vec<u8>, value: Vec<u8>) {
        self.state.write().insert(key, value);
    }

    pub fn state_root(&self) -> Hash {
        self.state.read().root()
    }

    pub fn insert_transaction(&self, hash: Hash, reply: TxStatusReply) {
        self.transactions.write().insert(hash, reply);
    }

    /// The server's bloom bits vector, for comparison in tests.
    pub fn bloom_vector(&self, bit: u16, section: u64) -> Option<Vec<u8>> {
        self.bloom_bits
            .store()
            .data(section, &bloom_bit_key(bit))
            .ok()
            .flatten()
    }

    /// Response to `request`, or `None` when the server cannot serve it.
    pub fn answer(&self, request: &LesMessage) -> Option<LesMessage> {
        let req_id = request.req_id();
        match request {
            LesMessage::GetProofs { root, keys, .. } => {
                let state = self.state.read();
                if state.root() != *root {
                    return None;
                }
                let proofs = keys
                    .iter()
                    .map(|key| state.prove(key))
                    .collect::<Option<Vec<_>>>()?;
                Some(LesMessage::Proofs { req_id, proofs })
            }
            LesMessage::GetReceipts { block_hashes, .. } => {
                let known = self.receipts.read();
                let receipts = block_hashes
                    .iter()
                    .map(|hash| known.get(hash).cloned().unwrap_or_default())
                    .collect();
                Some(LesMessage::Receipts { req_id, receipts })
            }
            LesMessage::GetHeaderRange {
                cht_section,
                to_number,
                count,
                ..
            } => {
                let first = (to_number + 1).checked_sub(*count)?;
                let headers = (first..=*to_number)
                    .map(|n| self.headers.canonical_header(n))
                    .collect::<Option<Vec<_>>>()?;
                let proof = self.cht_map(*cht_section)?.prove(&cht_key(*to_number))?;
                Some(LesMessage::HeaderRange {
                    req_id,
                    headers,
                    proof,
                })
            }
            LesMessage::GetBloomBits { bit, sections, .. } => {
                let proofs = sections
                    .iter()
                    .map(|section| self.bloom_proof(*bit, *section))
                    .collect::<Option<Vec<_>>>()?;
                Some(LesMessage::BloomBits { req_id, proofs })
            }
            LesMessage::GetTxStatus { hashes, .. } => {
                let known = self.transactions.read();
                let statuses = hashes
                    .iter()
                    .map(|hash| {
                        let mut reply = known.get(hash).cloned().unwrap_or(TxStatusReply {
                            status: TxStatus::Unknown,
                            inclusion: None,
                        });
                        if let Some(inclusion) = reply.inclusion.as_mut() {
                            if inclusion.cht_proof.is_none() {
                                let number = inclusion.header.number;
                                inclusion.cht_proof = self
                                    .cht_map(number / self.section_size)
                                    .and_then(|map| map.prove(&cht_key(number)));
                            }
                        }
                        reply
                    })
                    .collect();
                Some(LesMessage::TxStatus { req_id, statuses })
            }
            _ => None,
        }
    }

    /// Handler for `spawn_responder` answering after `delay`.
    pub fn responder(
        self: &Arc<Self>,
        delay: Duration,
    ) -> impl Fn(&LesMessage) -> Reply + Send + 'static {
        let server = self.clone();
        move |request: &LesMessage| match server.answer(request) {
            Some(response) => Reply::Answer {
                after: delay,
                response,
            },
            None => Reply::Ignore,
        }
    }

    fn bloom_proof(&self, bit: u16, section: u64) -> Option<KeyedProof> {
        let mut map = MerkleMap::new();
        for b in 0..BLOOM_BITS as u16 {
            let key = bloom_bit_key(b);
            map.insert(key.to_vec(), self.bloom_bits.store().data(section, &key).ok()??);
        }
        map.prove(&bloom_bit_key(bit))
    }

    fn cht_map(&self, section: u64) -> Option<MerkleMap> {
        let store: &SectionStore = self.cht.store();
        let start = section.checked_mul(self.section_size)?;
        let mut map = MerkleMap::new();
        for n in start..start + self.section_size {
            let key = cht_key(n);
            map.insert(key.to_vec(), store.data(section, &key).ok()??);
        }
        Some(map)
    }
}
