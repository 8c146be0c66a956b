//! # On-Demand Retrieval
//!
//! Local data first, then servers. Remote answers are verified against
//! roots taken from the local indexes before the request is sent, and
//! those roots stay live until the retrieval finishes.

use lc_02_request_distribution::RetrieveManager;
use lc_04_chain_indexer::{
    HeaderChain, SectionStore, BLOOM_BITS_INDEXER, BLOOM_TRIE_INDEXER, CHT_INDEXER,
};
use shared_types::{BlockHeader, Hash, KeyValueStore, Receipt, TxStatus, BLOOM_BITS};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::metrics::{OdrMetrics, OdrMetricsSnapshot};
use crate::config::OdrConfig;
use crate::domain::{
    BloomRequest, HeaderRangeRequest, LiveRoots, LocalData, OdrError, OdrRequest,
    ReceiptsRequest, RootGuard, TrieRequest, TxStatusRequest,
};

/// Verified retrieval of chain data.
pub struct Odr {
    config: OdrConfig,
    retriever: Arc<RetrieveManager>,
    live_roots: Arc<LiveRoots>,
    local: LocalData,
    headers: HeaderChain,
    cht: SectionStore,
    bloom_trie: SectionStore,
    metrics: OdrMetrics,
}

impl Odr {
    /// `kv` must be the store the indexers commit into.
    pub fn new(
        config: OdrConfig,
        retriever: Arc<RetrieveManager>,
        kv: Arc<dyn KeyValueStore>,
        live_roots: Arc<LiveRoots>,
    ) -> Self {
        let bloom_bits = SectionStore::new(BLOOM_BITS_INDEXER, kv.clone());
        Self {
            config,
            retriever,
            live_roots,
            local: LocalData::new(kv.clone(), bloom_bits),
            headers: HeaderChain::new(kv.clone()),
            cht: SectionStore::new(CHT_INDEXER, kv.clone()),
            bloom_trie: SectionStore::new(BLOOM_TRIE_INDEXER, kv),
            metrics: OdrMetrics::default(),
        }
    }

    pub fn config(&self) -> &OdrConfig {
        &self.config
    }

    pub fn live_roots(&self) -> &Arc<LiveRoots> {
        &self.live_roots
    }

    pub fn local(&self) -> &LocalData {
        &self.local
    }

    pub fn metrics(&self) -> OdrMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Answer `request` locally if possible, else from a server.
    ///
    /// Servers are tried until one answer verifies; verification failures
    /// never reach the caller.
    pub async fn retrieve<R: OdrRequest>(&self, request: &R) -> Result<R::Output, OdrError> {
        self.retrieve_within(request, self.config.deadline).await
    }

    /// [`Odr::retrieve`] bounded by `deadline`; `None` falls back to the
    /// retrieval manager's default.
    pub async fn retrieve_within<R: OdrRequest>(
        &self,
        request: &R,
        deadline: Option<Duration>,
    ) -> Result<R::Output, OdrError> {
        if let Some(output) = request.load_local(&self.local)? {
            self.metrics.inc_local_hits();
            debug!("[lc-03] {} answered locally", request.kind().as_str());
            return Ok(output);
        }

        let _guards: Vec<RootGuard> = request
            .trusted_roots()
            .into_iter()
            .map(|root| self.live_roots.pin(root))
            .collect();

        let result = self
            .retriever
            .retrieve(request.message(), deadline, |response| {
                request.verify(response)
            })
            .await;

        match result {
            Ok(output) => {
                self.metrics.inc_remote_answers();
                if let Err(e) = request.store_local(&self.local, &output) {
                    self.metrics.inc_cache_write_errors();
                    warn!(
                        "[lc-03] Failed to cache {} answer: {}",
                        request.kind().as_str(),
                        e
                    );
                }
                Ok(output)
            }
            Err(e) => {
                self.metrics.inc_failures();
                debug!("[lc-03] {} retrieval failed: {}", request.kind().as_str(), e);
                Err(e.into())
            }
        }
    }

    // =========================================================================
    // TYPED HELPERS
    // =========================================================================

    /// Values under `keys` in the state trie with root `root`.
    pub async fn trie_entries(
        &self,
        root: Hash,
        keys: Vec<Vec<u8>>,
    ) -> Result<Vec<Vec<u8>>, OdrError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.retrieve(&TrieRequest { root, keys }).await
    }

    /// Receipts of trusted `headers`, in order.
    pub async fn receipts(&self, headers: Vec<BlockHeader>) -> Result<Vec<Vec<Receipt>>, OdrError> {
        self.retrieve(&ReceiptsRequest { headers }).await
    }

    /// `count` canonical headers ending at `to_number`, proven through the
    /// CHT section containing `to_number`.
    pub async fn header_range(
        &self,
        to_number: u64,
        count: u64,
    ) -> Result<Vec<BlockHeader>, OdrError> {
        let section = to_number / self.config.cht_section_size;
        let root = self
            .cht
            .section_root(section)?
            .ok_or(OdrError::UnknownSection {
                index: CHT_INDEXER,
                section,
            })?;
        let request = HeaderRangeRequest::new(
            section,
            root,
            to_number,
            count,
            self.config.cht_section_size,
        )?;
        self.retrieve(&request).await
    }

    /// One canonical header by number.
    pub async fn header_by_number(&self, number: u64) -> Result<BlockHeader, OdrError> {
        self.header_range(number, 1)
            .await?
            .pop()
            .ok_or_else(|| OdrError::InvalidRequest(format!("no header {}", number)))
    }

    /// The bit vector of `bit` for each of `sections`, in order.
    ///
    /// Sections still indexed locally are read directly; only the rest
    /// go to servers, proven against their bloom-trie roots.
    pub async fn bloom_bits(&self, bit: u16, sections: &[u64]) -> Result<Vec<Vec<u8>>, OdrError> {
        if bit as usize >= BLOOM_BITS {
            return Err(OdrError::InvalidRequest(format!(
                "bloom bit {} out of range",
                bit
            )));
        }

        let mut vectors: Vec<Option<Vec<u8>>> = Vec::with_capacity(sections.len());
        let mut missing = Vec::new();
        for &section in sections {
            let local = self.local.bloom_vector(bit, section)?;
            if local.is_none() {
                let root =
                    self.bloom_trie
                        .section_root(section)?
                        .ok_or(OdrError::UnknownSection {
                            index: BLOOM_TRIE_INDEXER,
                            section,
                        })?;
                missing.push((section, root));
            }
            vectors.push(local);
        }

        if !missing.is_empty() {
            debug!(
                bit,
                "[lc-03] Fetching {} of {} bloom sections",
                missing.len(),
                sections.len()
            );
            let request = BloomRequest::new(bit, missing, self.config.bloom_section_size)?;
            let mut fetched = self.retrieve(&request).await?.into_iter();
            for slot in vectors.iter_mut().filter(|v| v.is_none()) {
                *slot = fetched.next();
            }
        } else {
            self.metrics.inc_local_hits();
        }

        vectors
            .into_iter()
            .zip(sections)
            .map(|(vector, section)| {
                vector.ok_or_else(|| {
                    OdrError::InvalidRequest(format!("bloom section {} missing", section))
                })
            })
            .collect()
    }

    /// Status of transactions by hash.
    ///
    /// Inclusions must land in a committed CHT section or on a stored
    /// canonical header above it.
    pub async fn tx_status(&self, hashes: Vec<Hash>) -> Result<Vec<TxStatus>, OdrError> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }
        let request = self.tx_status_request(hashes)?;
        self.retrieve(&request).await
    }

    fn tx_status_request(&self, hashes: Vec<Hash>) -> Result<TxStatusRequest, OdrError> {
        let section_size = self.config.cht_section_size;
        let sections = self.cht.section_count()?;
        let mut cht_roots = Vec::new();
        for section in 0..sections {
            if let Some(root) = self.cht.section_root(section)? {
                cht_roots.push((section, root));
            }
        }

        let mut recent = Vec::new();
        if let Some(head) = self.headers.head_number()? {
            for number in sections.saturating_mul(section_size)..=head {
                if let Some(header) = self.headers.header(number)? {
                    recent.push((number, header.hash()));
                }
            }
        }
        TxStatusRequest::new(hashes, cht_roots, recent, section_size)
    }
}
