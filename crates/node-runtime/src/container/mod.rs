//! # Light Client Container
//!
//! Builds every subsystem from one [`LightClientConfig`] and owns their
//! lifecycle.
//!
//! ## Wiring
//!
//! ```text
//! DatagramChannel → CapacityNegotiator → ServerPool ──(ServerFeedback)──┐
//!                                                                       ↓
//! transport ──peer_connected──→ PeerRegistry ──→ Distributor → RetrieveManager → Odr
//!           ──handle_message──────────────────→ (deliver)                         ↑
//!                                                                     roots from the indexers
//! import_header → HeaderChain → ChainEventBus → CHT / bloom bits → bloom trie
//!                                                      ↑
//!                                          Pruner (skips live roots)
//! ```
//!
//! ## Shutdown Order
//!
//! 1. Pool and bloom workers (no new dials, no new lookups)
//! 2. Distributor closed (in-flight retrievals fail with `Closed`)
//! 3. Indexers, then the pruner
//! 4. Shutdown marker cleared, storage flushed

pub mod config;

pub use config::{ConfigError, LightClientConfig, NodeAddress, Tuning};

use lc_01_server_pool::{
    CandidateRecord, CandidateSnapshot, CapacityNegotiator, DatagramChannel, DialIterator,
    DiscoveryFeed, PoolMetricsSnapshot, ServerPool,
};
use lc_02_request_distribution::{
    Distributor, DistributorMetricsSnapshot, PeerRegistry, PeerTransport, RetrieveError,
    RetrieveManager, ServerPeer,
};
use lc_03_odr::{BloomBitsService, LiveRoots, Odr, OdrError, OdrRequest};
use lc_04_chain_indexer::{
    BloomBitsBackend, BloomTrieBackend, ChainEvent, ChainEventBus, ChainIndexer, ChtBackend,
    HeaderChain, HeaderSource, Pruner, SectionProgress, BLOOM_BITS_INDEXER, BLOOM_TRIE_INDEXER,
    CHT_INDEXER,
};
use parking_lot::Mutex;
use shared_types::{
    BlockHeader, KeyValueStore, LesMessage, NodeId, ServerFeedback, TimeSource,
    MAX_PROTOCOL_VERSION, MIN_PROTOCOL_VERSION,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::LightClientError;
use crate::shutdown::ShutdownTracker;

/// Load of one connected server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerLoad {
    pub id: NodeId,
    pub protocol_version: u32,
    pub capacity: usize,
    pub in_flight: usize,
}

#[derive(Default)]
struct Tasks {
    indexers: Vec<JoinHandle<()>>,
    pruner: Option<JoinHandle<()>>,
    marker: Option<JoinHandle<()>>,
}

/// The wired light client.
pub struct LightClient {
    config: LightClientConfig,
    kv: Arc<dyn KeyValueStore>,
    pool: Arc<ServerPool>,
    registry: Arc<PeerRegistry>,
    distributor: Arc<Distributor>,
    odr: Arc<Odr>,
    bloom_service: BloomBitsService,
    headers: Arc<HeaderChain>,
    events: ChainEventBus,
    cht: Arc<ChainIndexer<ChtBackend>>,
    bloom_bits: Arc<ChainIndexer<BloomBitsBackend>>,
    bloom_trie: Arc<ChainIndexer<BloomTrieBackend>>,
    pruner: Arc<Pruner>,
    shutdown_tracker: Arc<ShutdownTracker>,
    indexer_shutdown: CancellationToken,
    pruner_shutdown: CancellationToken,
    marker_shutdown: CancellationToken,
    tasks: Mutex<Tasks>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl LightClient {
    /// Wire every subsystem. Nothing runs until [`LightClient::start`].
    pub fn new(
        config: LightClientConfig,
        kv: Arc<dyn KeyValueStore>,
        datagram: Arc<dyn DatagramChannel>,
        time: Arc<dyn TimeSource>,
    ) -> Result<Self, LightClientError> {
        config.validate()?;

        // Server selection
        let negotiator = Arc::new(CapacityNegotiator::new(
            config.tuning.negotiator.clone(),
            datagram,
        ));
        let pool = Arc::new(ServerPool::new(
            config.pool_config()?,
            negotiator,
            kv.clone(),
            time.clone(),
        )?);
        let feedback: Arc<dyn ServerFeedback> = pool.clone();

        // Request distribution + retrieval
        let registry = Arc::new(PeerRegistry::new(feedback.clone()));
        let distributor_config = config.distributor_config();
        let default_deadline = distributor_config.default_deadline;
        let distributor = Distributor::new(distributor_config, registry.clone(), feedback);
        let retriever = Arc::new(RetrieveManager::new(distributor.clone(), default_deadline));
        let live_roots = LiveRoots::new();
        let odr = Arc::new(Odr::new(
            config.odr_config(),
            retriever,
            kv.clone(),
            live_roots.clone(),
        ));
        let bloom_service = BloomBitsService::new(odr.clone());

        // Chain + indexers
        let headers = Arc::new(HeaderChain::new(kv.clone()));
        let source: Arc<dyn HeaderSource> = headers.clone();
        let cht = Arc::new(ChainIndexer::new(
            CHT_INDEXER,
            config.tuning.cht.clone(),
            kv.clone(),
            source.clone(),
            ChtBackend::new(),
        )?);
        let bloom_bits = Arc::new(ChainIndexer::new(
            BLOOM_BITS_INDEXER,
            config.tuning.bloom.clone(),
            kv.clone(),
            source.clone(),
            BloomBitsBackend::new(config.tuning.bloom.section_size),
        )?);
        let bloom_trie = Arc::new(
            ChainIndexer::new(
                BLOOM_TRIE_INDEXER,
                config.tuning.bloom.clone(),
                kv.clone(),
                source,
                BloomTrieBackend::new(bloom_bits.store().clone()),
            )?
            .with_upstream(bloom_bits.clone()),
        );

        let mut pruner = Pruner::new(config.pruner_config(), live_roots);
        pruner.add_target(cht.store().clone(), Vec::new());
        let trie_progress: Arc<dyn SectionProgress> = bloom_trie.clone();
        pruner.add_target(bloom_bits.store().clone(), vec![trie_progress]);
        pruner.add_target(bloom_trie.store().clone(), Vec::new());

        let shutdown_tracker = Arc::new(ShutdownTracker::new(
            kv.clone(),
            time,
            config.marker_refresh_interval(),
        ));

        Ok(Self {
            events: ChainEventBus::new(config.tuning.event_capacity),
            config,
            kv,
            pool,
            registry,
            distributor,
            odr,
            bloom_service,
            headers,
            cht,
            bloom_bits,
            bloom_trie,
            pruner: Arc::new(pruner),
            shutdown_tracker,
            indexer_shutdown: CancellationToken::new(),
            pruner_shutdown: CancellationToken::new(),
            marker_shutdown: CancellationToken::new(),
            tasks: Mutex::new(Tasks::default()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Start every background task. Must run inside a Tokio runtime.
    pub fn start(&self) -> Result<(), LightClientError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(LightClientError::Stopped);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(LightClientError::AlreadyStarted);
        }
        info!(
            network_id = self.config.network_id,
            "[runtime] Starting light client"
        );

        let unclean = self.shutdown_tracker.mark_startup()?;
        if !unclean.is_empty() {
            warn!("[runtime] {} unclean shutdowns on record", unclean.len());
        }

        for record in self.config.bootstrap_records()? {
            self.pool.add_candidate(record);
        }
        self.pool.start()?;
        self.bloom_service.start();

        let mut tasks = self.tasks.lock();
        tasks.indexers = vec![
            tokio::spawn(
                self.cht
                    .clone()
                    .run(self.events.subscribe(), self.indexer_shutdown.clone()),
            ),
            tokio::spawn(
                self.bloom_bits
                    .clone()
                    .run(self.events.subscribe(), self.indexer_shutdown.clone()),
            ),
            tokio::spawn(
                self.bloom_trie
                    .clone()
                    .run(self.events.subscribe(), self.indexer_shutdown.clone()),
            ),
        ];
        // Headers stored by a previous run produce no events
        if let Some(head) = self.headers.head_number()? {
            self.catch_up(head);
        }

        tasks.pruner = Some(tokio::spawn(
            self.pruner.clone().run(self.pruner_shutdown.clone()),
        ));
        tasks.marker = Some(tokio::spawn(
            self.shutdown_tracker
                .clone()
                .run(self.marker_shutdown.clone()),
        ));

        info!("[runtime] Light client started");
        Ok(())
    }

    fn catch_up(&self, head: u64) {
        let results = [
            (CHT_INDEXER, self.cht.process_head(head)),
            (BLOOM_BITS_INDEXER, self.bloom_bits.process_head(head)),
            (BLOOM_TRIE_INDEXER, self.bloom_trie.process_head(head)),
        ];
        for (name, result) in results {
            match result {
                Ok(sections) => debug!("[runtime] {} at {} sections", name, sections),
                Err(e) => warn!("[runtime] {} catch-up failed at {}: {}", name, head, e),
            }
        }
    }

    /// Stop in dependency order. Calling it again is a no-op.
    ///
    /// Retrievals fail with `Closed` from the moment this is called.
    pub async fn stop(&self) -> Result<(), LightClientError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("[runtime] Stopping light client");

        self.distributor.close();
        let pool_result = self.pool.stop().await;
        self.bloom_service.stop().await;

        let tasks = std::mem::take(&mut *self.tasks.lock());
        self.indexer_shutdown.cancel();
        for task in tasks.indexers {
            let _ = task.await;
        }
        self.pruner_shutdown.cancel();
        if let Some(task) = tasks.pruner {
            let _ = task.await;
        }
        self.marker_shutdown.cancel();
        if let Some(task) = tasks.marker {
            let _ = task.await;
        }

        if self.started.load(Ordering::SeqCst) {
            self.shutdown_tracker.mark_clean()?;
        }
        self.kv.flush()?;
        pool_result?;

        info!("[runtime] Light client stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.stopped.load(Ordering::SeqCst)
    }

    /// Unclean shutdowns found at startup (start timestamps, oldest first).
    pub fn unclean_shutdowns(&self) -> Vec<u64> {
        self.shutdown_tracker.unclean_shutdowns()
    }

    // =========================================================================
    // CALLER API
    // =========================================================================

    /// Verified answer to `request` within `deadline` (or the configured
    /// request deadline).
    pub async fn retrieve<R: OdrRequest>(
        &self,
        request: &R,
        deadline: Option<Duration>,
    ) -> Result<R::Output, OdrError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(RetrieveError::Closed.into());
        }
        self.odr.retrieve_within(request, deadline).await
    }

    pub fn odr(&self) -> &Arc<Odr> {
        &self.odr
    }

    pub fn bloom_service(&self) -> &BloomBitsService {
        &self.bloom_service
    }

    pub fn subscribe_chain_events(&self) -> broadcast::Receiver<ChainEvent> {
        self.events.subscribe()
    }

    /// Make `header` the canonical head and notify subscribers.
    pub fn import_header(&self, header: BlockHeader) -> Result<ChainEvent, LightClientError> {
        let event = self.headers.insert(header)?;
        let receivers = self.events.publish(event.clone());
        debug!(
            number = event.head().number,
            receivers, "[runtime] Chain event published"
        );
        Ok(event)
    }

    pub fn header_chain(&self) -> &Arc<HeaderChain> {
        &self.headers
    }

    // =========================================================================
    // DIAGNOSTICS
    // =========================================================================

    /// Every known server, best score first.
    pub fn peer_scores(&self) -> Vec<CandidateSnapshot> {
        self.pool.snapshot()
    }

    /// Connected servers with their capacity and current assignments.
    pub fn peer_loads(&self) -> Vec<PeerLoad> {
        self.registry
            .ids()
            .into_iter()
            .filter_map(|id| self.registry.get(&id))
            .map(|peer| PeerLoad {
                id: peer.id(),
                protocol_version: peer.protocol_version(),
                capacity: peer.capacity(),
                in_flight: self.distributor.in_flight(&peer.id()),
            })
            .collect()
    }

    /// Committed sections per index.
    pub fn indexed_sections(&self) -> Vec<(&'static str, u64)> {
        vec![
            (CHT_INDEXER, self.cht.committed_sections()),
            (BLOOM_BITS_INDEXER, self.bloom_bits.committed_sections()),
            (BLOOM_TRIE_INDEXER, self.bloom_trie.committed_sections()),
        ]
    }

    pub fn pool_metrics(&self) -> PoolMetricsSnapshot {
        self.pool.metrics()
    }

    pub fn distributor_metrics(&self) -> DistributorMetricsSnapshot {
        self.distributor.metrics()
    }

    // =========================================================================
    // TRANSPORT HOOKS
    // =========================================================================

    /// Capacity negotiation reply read off the datagram socket.
    pub fn handle_datagram(&self, from: NodeId, payload: &[u8]) {
        self.pool.negotiator().handle_reply(from, payload);
    }

    pub fn add_discovery_source(&self, feed: Box<dyn DiscoveryFeed>) {
        self.pool.add_source(feed);
    }

    /// Candidates worth dialing, as they become available.
    pub fn dial_iterator(&self) -> DialIterator {
        self.pool.dial_iterator()
    }

    /// Record a dial to `id` chosen outside the iterator.
    pub fn dial(&self, id: &NodeId) -> Option<CandidateRecord> {
        self.pool.dial(id)
    }

    /// A server finished its handshake.
    pub fn peer_connected(
        &self,
        id: NodeId,
        protocol_version: u32,
        capacity: usize,
        transport: Arc<dyn PeerTransport>,
    ) -> Result<Arc<ServerPeer>, LightClientError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(LightClientError::Stopped);
        }
        if !(MIN_PROTOCOL_VERSION..=MAX_PROTOCOL_VERSION).contains(&protocol_version) {
            return Err(LightClientError::UnsupportedProtocol {
                peer: id,
                version: protocol_version,
            });
        }
        if self.registry.get(&id).is_none() && self.registry.len() >= self.config.max_peers {
            return Err(LightClientError::TooManyPeers {
                peer: id,
                max: self.config.max_peers,
            });
        }

        let peer = Arc::new(ServerPeer::new(id, protocol_version, capacity, transport));
        self.pool.peer_connected(&id);
        self.registry.add(peer.clone());
        Ok(peer)
    }

    /// The connection to `id` is gone. Its assignments fail over at once.
    pub fn peer_disconnected(&self, id: &NodeId) {
        if self.registry.remove(id).is_some() {
            self.pool.peer_disconnected(id);
        }
    }

    /// Route a message received from `peer`. Returns true if it answered a
    /// pending request.
    pub fn handle_message(&self, peer: &NodeId, message: LesMessage) -> bool {
        match message {
            LesMessage::Proofs { .. }
            | LesMessage::Receipts { .. }
            | LesMessage::HeaderRange { .. }
            | LesMessage::BloomBits { .. }
            | LesMessage::TxStatus { .. } => self.distributor.deliver(peer, message),
            LesMessage::GetProofs { .. }
            | LesMessage::GetReceipts { .. }
            | LesMessage::GetHeaderRange { .. }
            | LesMessage::GetBloomBits { .. }
            | LesMessage::GetTxStatus { .. } => {
                debug!(
                    peer = %peer,
                    kind = message.kind().as_str(),
                    "[runtime] Ignoring request from a server"
                );
                false
            }
        }
    }
}
