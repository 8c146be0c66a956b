//! # Server Pool
//!
//! Scored, persistent table of candidate servers.
//!
//! ## Flow
//!
//! 1. Discovery feeds yield candidate records
//! 2. New (or stale) candidates are negotiated on a bounded pool
//! 3. The dial iterator hands out `Available` candidates by score, and
//!    `Unsupported` ones at most once per `blind_dial_interval`
//! 4. Request outcomes and connection events move scores
//!
//! With a non-empty allow-list only trusted servers are dialed and
//! negotiation and scoring play no part in selection.

use parking_lot::Mutex;
use shared_types::{
    BatchOperation, KeyValueStore, NodeId, RequestOutcome, ServerFeedback, TimeSource,
};
use std::cmp::Ordering as CmpOrdering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::metrics::{PoolMetrics, PoolMetricsSnapshot};
use super::negotiator::CapacityNegotiator;
use crate::config::ServerPoolConfig;
use crate::domain::{Candidate, CandidateRecord, NegotiationResult, ServerPoolError};
use crate::ports::DiscoveryFeed;

/// Storage key prefix of persisted candidates.
pub const POOL_KEY_PREFIX: &[u8] = b"serverpool:";

fn candidate_key(id: &NodeId) -> Vec<u8> {
    let mut key = POOL_KEY_PREFIX.to_vec();
    key.extend_from_slice(id.as_bytes());
    key
}

/// Diagnostics view of one candidate.
#[derive(Clone, Debug, PartialEq)]
pub struct CandidateSnapshot {
    pub id: NodeId,
    pub address: std::net::SocketAddr,
    pub score: f64,
    pub value: f64,
    pub signal: Option<NegotiationResult>,
    pub latency_ms: Option<f64>,
    pub consecutive_failures: u32,
    pub connected: bool,
    pub trusted: bool,
}

struct PoolState {
    candidates: HashMap<NodeId, Candidate>,
    negotiating: HashSet<NodeId>,
    last_blind_dial: Option<u64>,
    /// Pool-wide EWMA of response times (ms).
    latency_ms: Option<f64>,
}

/// Scored candidate table plus the tasks feeding it.
pub struct ServerPool {
    config: ServerPoolConfig,
    negotiator: Arc<CapacityNegotiator>,
    store: Arc<dyn KeyValueStore>,
    time: Arc<dyn TimeSource>,
    state: Mutex<PoolState>,
    metrics: PoolMetrics,
    negotiation_slots: Arc<Semaphore>,
    dial_ready: Notify,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    pending_sources: Mutex<Vec<Box<dyn DiscoveryFeed>>>,
    started: AtomicBool,
}

impl ServerPool {
    /// Build the pool, loading persisted candidates from `store`.
    pub fn new(
        config: ServerPoolConfig,
        negotiator: Arc<CapacityNegotiator>,
        store: Arc<dyn KeyValueStore>,
        time: Arc<dyn TimeSource>,
    ) -> Result<Self, ServerPoolError> {
        let now = time.now();
        let mut candidates = HashMap::new();

        for (key, value) in store.prefix_scan(POOL_KEY_PREFIX)? {
            match bincode::deserialize::<Candidate>(&value) {
                Ok(candidate) => {
                    candidates.insert(candidate.id(), candidate);
                }
                Err(e) => {
                    warn!("[lc-01] Skipping undecodable candidate {:?}: {}", key, e);
                }
            }
        }
        let loaded = candidates.len();

        let trusted: HashSet<NodeId> = config.trusted.iter().map(|r| r.id).collect();
        for candidate in candidates.values_mut() {
            candidate.trusted = trusted.contains(&candidate.id());
        }
        for record in &config.trusted {
            let candidate = candidates
                .entry(record.id)
                .or_insert_with(|| Candidate::new(record.clone(), now, &config));
            candidate.record = record.clone();
            candidate.trusted = true;
        }

        info!(
            "[lc-01] Server pool loaded {} candidates ({} trusted)",
            loaded,
            trusted.len()
        );

        let pool = Self {
            negotiation_slots: Arc::new(Semaphore::new(config.max_concurrent_negotiations.max(1))),
            config,
            negotiator,
            store,
            time,
            state: Mutex::new(PoolState {
                candidates,
                negotiating: HashSet::new(),
                last_blind_dial: None,
                latency_ms: None,
            }),
            metrics: PoolMetrics::default(),
            dial_ready: Notify::new(),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            pending_sources: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        };
        pool.refresh_metrics();
        Ok(pool)
    }

    pub fn config(&self) -> &ServerPoolConfig {
        &self.config
    }

    pub fn negotiator(&self) -> &Arc<CapacityNegotiator> {
        &self.negotiator
    }

    fn allow_list_mode(&self) -> bool {
        !self.config.trusted.is_empty()
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Register a discovery feed. Feeds added before `start` are started
    /// with it.
    pub fn add_source(self: &Arc<Self>, feed: Box<dyn DiscoveryFeed>) {
        if self.started.load(Ordering::SeqCst) && !self.shutdown.is_cancelled() {
            self.spawn_source(feed);
        } else {
            self.pending_sources.lock().push(feed);
        }
    }

    /// Start discovery and maintenance tasks.
    pub fn start(self: &Arc<Self>) -> Result<(), ServerPoolError> {
        if self.shutdown.is_cancelled() {
            return Err(ServerPoolError::Stopped);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ServerPoolError::AlreadyStarted);
        }

        let sources: Vec<_> = self.pending_sources.lock().drain(..).collect();
        info!("[lc-01] Starting server pool with {} discovery sources", sources.len());
        for feed in sources {
            self.spawn_source(feed);
        }

        let pool = self.clone();
        let handle = tokio::spawn(async move { pool.run_maintenance().await });
        self.tasks.lock().push(handle);
        Ok(())
    }

    /// Stop tasks and flush every candidate to storage.
    pub async fn stop(&self) -> Result<(), ServerPoolError> {
        self.shutdown.cancel();
        self.dial_ready.notify_waiters();

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }

        let batch = {
            let state = self.state.lock();
            state
                .candidates
                .values()
                .map(|c| Ok(BatchOperation::put(candidate_key(&c.id()), bincode::serialize(c)?)))
                .collect::<Result<Vec<_>, bincode::Error>>()?
        };
        let count = batch.len();
        self.store.atomic_batch_write(batch)?;
        info!("[lc-01] Server pool stopped, flushed {} candidates", count);
        Ok(())
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn spawn_source(self: &Arc<Self>, feed: Box<dyn DiscoveryFeed>) {
        let pool = self.clone();
        let handle = tokio::spawn(async move { pool.run_source(feed).await });
        self.tasks.lock().push(handle);
    }

    async fn run_source(self: Arc<Self>, mut feed: Box<dyn DiscoveryFeed>) {
        debug!("[lc-01] Discovery source '{}' started", feed.name());
        loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => return,
                next = feed.next() => next,
            };
            match next {
                Some(record) => {
                    self.add_candidate(record);
                    tokio::task::yield_now().await;
                }
                None => {
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return,
                        _ = tokio::time::sleep(self.config.source_retry_interval) => {}
                    }
                    feed.restart();
                }
            }
        }
    }

    async fn run_maintenance(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.maintenance_interval);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }
            self.renegotiate_stale();
            self.refresh_metrics();
            // Redial and blind-dial waits may have passed
            self.dial_ready.notify_waiters();
        }
    }

    // =========================================================================
    // DISCOVERY + NEGOTIATION
    // =========================================================================

    /// Merge a candidate from discovery or configuration; negotiates it
    /// when new or stale.
    pub fn add_candidate(self: &Arc<Self>, record: CandidateRecord) {
        let now = self.time.now();
        let mut evicted = None;

        let negotiate = {
            let mut state = self.state.lock();
            match state.candidates.get_mut(&record.id) {
                Some(existing) => existing.record = record.clone(),
                None => {
                    if self.allow_list_mode() {
                        debug!(peer = %record.id, "[lc-01] Ignoring untrusted candidate");
                        return;
                    }
                    if state.candidates.len() >= self.config.max_candidates {
                        match self.lowest_evictable(&state, now) {
                            Some(victim) => {
                                state.candidates.remove(&victim);
                                evicted = Some(victim);
                            }
                            None => {
                                debug!(peer = %record.id, "[lc-01] Candidate table full");
                                return;
                            }
                        }
                    }
                    state
                        .candidates
                        .insert(record.id, Candidate::new(record.clone(), now, &self.config));
                    debug!(peer = %record.id, "[lc-01] New candidate");
                }
            }

            let due = state
                .candidates
                .get(&record.id)
                .map(|c| !c.trusted && !c.connected && c.needs_negotiation(now, &self.config))
                .unwrap_or(false);
            due && state.negotiating.insert(record.id)
        };

        if let Some(victim) = evicted {
            debug!(peer = %victim, "[lc-01] Evicted lowest-scored candidate");
            if let Err(e) = self.store.delete(&candidate_key(&victim)) {
                warn!(peer = %victim, "[lc-01] Failed to delete evicted candidate: {}", e);
            }
        }
        if negotiate {
            self.spawn_negotiation(record);
        }
    }

    fn lowest_evictable(&self, state: &PoolState, now: u64) -> Option<NodeId> {
        state
            .candidates
            .values()
            .filter(|c| !c.connected && !c.trusted && !state.negotiating.contains(&c.id()))
            .min_by(|a, b| {
                a.score_at(now, &self.config)
                    .partial_cmp(&b.score_at(now, &self.config))
                    .unwrap_or(CmpOrdering::Equal)
            })
            .map(|c| c.id())
    }

    fn renegotiate_stale(self: &Arc<Self>) {
        let now = self.time.now();
        let due: Vec<CandidateRecord> = {
            let mut state = self.state.lock();
            let ids: Vec<NodeId> = state
                .candidates
                .values()
                .filter(|c| {
                    let failed_query = c.signal == Some(NegotiationResult::Unsupported)
                        && c.record.negotiation_version() >= 1;
                    let stale = c.signal == Some(NegotiationResult::Busy) || failed_query;
                    !c.trusted
                        && !c.connected
                        && stale
                        && c.needs_negotiation(now, &self.config)
                        && !state.negotiating.contains(&c.id())
                })
                .map(|c| c.id())
                .collect();
            ids.into_iter()
                .filter_map(|id| {
                    state.negotiating.insert(id);
                    state.candidates.get(&id).map(|c| c.record.clone())
                })
                .collect()
        };

        for record in due {
            debug!(peer = %record.id, "[lc-01] Re-negotiating capacity");
            self.spawn_negotiation(record);
        }
    }

    fn spawn_negotiation(self: &Arc<Self>, record: CandidateRecord) {
        let pool = self.clone();
        tokio::spawn(async move {
            let permit = tokio::select! {
                _ = pool.shutdown.cancelled() => None,
                permit = pool.negotiation_slots.clone().acquire_owned() => permit.ok(),
            };
            let Some(_permit) = permit else {
                pool.state.lock().negotiating.remove(&record.id);
                return;
            };

            let result = tokio::select! {
                _ = pool.shutdown.cancelled() => None,
                result = pool.negotiator.negotiate(&record) => Some(result),
            };
            match result {
                Some(result) => pool.on_negotiated(&record, result),
                None => {
                    pool.state.lock().negotiating.remove(&record.id);
                }
            }
        });
    }

    fn on_negotiated(&self, record: &CandidateRecord, result: NegotiationResult) {
        let now = self.time.now();
        let updated = {
            let mut state = self.state.lock();
            state.negotiating.remove(&record.id);
            let Some(candidate) = state.candidates.get_mut(&record.id) else {
                return;
            };
            candidate.signal = Some(result);
            candidate.negotiated_at = now;
            // Advertised support but no usable answer
            if result == NegotiationResult::Unsupported && record.negotiation_version() >= 1 {
                candidate.on_failure(now, &self.config);
            }
            candidate.clone()
        };

        debug!(peer = %record.id, ?result, "[lc-01] Capacity negotiated");
        self.persist(&updated);
        if result != NegotiationResult::Busy {
            self.dial_ready.notify_waiters();
        }
    }

    // =========================================================================
    // DIALING
    // =========================================================================

    /// Async iterator over candidates worth dialing.
    pub fn dial_iterator(self: &Arc<Self>) -> DialIterator {
        DialIterator { pool: self.clone() }
    }

    /// Pick the next candidate to dial and mark the attempt.
    pub fn next_dial_candidate(&self) -> Option<CandidateRecord> {
        if self.shutdown.is_cancelled() {
            return None;
        }
        let now = self.time.now();
        let picked = {
            let mut state = self.state.lock();
            let id = if self.allow_list_mode() {
                state
                    .candidates
                    .values()
                    .filter(|c| c.trusted && c.can_dial(now))
                    .map(|c| c.id())
                    .min()
            } else {
                let available = self.best_with_signal(&state, NegotiationResult::Available, now);
                let blind_allowed = state.last_blind_dial.map_or(true, |at| {
                    Duration::from_secs(now.saturating_sub(at)) >= self.config.blind_dial_interval
                });
                match available {
                    Some(id) => Some(id),
                    None if blind_allowed => {
                        let blind = self.best_with_signal(&state, NegotiationResult::Unsupported, now);
                        if blind.is_some() {
                            state.last_blind_dial = Some(now);
                        }
                        blind
                    }
                    None => None,
                }
            };
            id.and_then(|id| Self::mark_dialed(&mut state, &id, now))
        };

        if let Some(candidate) = &picked {
            self.metrics.inc_dialed();
            debug!(peer = %candidate.id(), "[lc-01] Dialing candidate");
            self.persist(candidate);
        }
        picked.map(|c| c.record)
    }

    fn best_with_signal(
        &self,
        state: &PoolState,
        signal: NegotiationResult,
        now: u64,
    ) -> Option<NodeId> {
        state
            .candidates
            .values()
            .filter(|c| c.signal == Some(signal) && c.can_dial(now))
            .max_by(|a, b| {
                a.score_at(now, &self.config)
                    .partial_cmp(&b.score_at(now, &self.config))
                    .unwrap_or(CmpOrdering::Equal)
                    // Ties resolve to the lower id
                    .then_with(|| b.id().cmp(&a.id()))
            })
            .map(|c| c.id())
    }

    fn mark_dialed(state: &mut PoolState, id: &NodeId, now: u64) -> Option<Candidate> {
        let candidate = state.candidates.get_mut(id)?;
        candidate.on_dial(now);
        Some(candidate.clone())
    }

    /// Mark a dial attempt to `id` chosen by the caller.
    pub fn dial(&self, id: &NodeId) -> Option<CandidateRecord> {
        let now = self.time.now();
        let candidate = Self::mark_dialed(&mut self.state.lock(), id, now)?;
        self.metrics.inc_dialed();
        self.persist(&candidate);
        Some(candidate.record)
    }

    // =========================================================================
    // CONNECTIONS + OUTCOMES
    // =========================================================================

    /// A connection to `id` completed its handshake.
    pub fn peer_connected(&self, id: &NodeId) {
        let now = self.time.now();
        {
            let mut state = self.state.lock();
            if let Some(candidate) = state.candidates.get_mut(id) {
                candidate.decay(now, self.config.value_half_life);
                candidate.connected = true;
                candidate.session_start_value = candidate.value;
            }
        }
        info!(peer = %id, "[lc-01] Server connected");
        self.refresh_metrics();
    }

    /// The connection to `id` closed.
    pub fn peer_disconnected(&self, id: &NodeId) {
        let now = self.time.now();
        let updated = {
            let mut state = self.state.lock();
            let Some(candidate) = state.candidates.get_mut(id) else {
                return;
            };
            if !candidate.connected {
                return;
            }
            candidate.decay(now, self.config.value_half_life);
            candidate.connected = false;
            let earned = (candidate.value - candidate.session_start_value).max(0.0);
            self.metrics.add_session_value(earned);
            candidate.clone()
        };
        info!(peer = %id, "[lc-01] Server disconnected");
        self.persist(&updated);
        self.refresh_metrics();
        self.dial_ready.notify_waiters();
    }

    /// Record how `peer` served a request.
    pub fn record_outcome(&self, peer: &NodeId, outcome: RequestOutcome) {
        let now = self.time.now();
        let updated = {
            let mut state = self.state.lock();
            if let RequestOutcome::Success { response_time } = outcome {
                let sample = response_time.as_secs_f64() * 1000.0;
                state.latency_ms = Some(match state.latency_ms {
                    Some(avg) => avg + self.config.latency_ewma_weight * (sample - avg),
                    None => sample,
                });
            }
            let Some(candidate) = state.candidates.get_mut(peer) else {
                return;
            };
            match outcome {
                RequestOutcome::Success { response_time } => {
                    candidate.on_success(response_time, now, &self.config)
                }
                RequestOutcome::Failure | RequestOutcome::Disconnect => {
                    candidate.on_failure(now, &self.config)
                }
            }
            candidate.clone()
        };
        debug!(peer = %peer, ?outcome, score = updated.score(&self.config), "[lc-01] Outcome recorded");
        self.persist(&updated);
        self.metrics.set_suggested_timeout(self.suggested_timeout());
    }

    /// Pool-wide timeout suggestion.
    pub fn suggested_timeout(&self) -> Duration {
        let latency = self.state.lock().latency_ms;
        self.timeout_from(latency)
    }

    fn timeout_from(&self, latency_ms: Option<f64>) -> Duration {
        let latency =
            latency_ms.unwrap_or_else(|| self.config.initial_latency.as_secs_f64() * 1000.0);
        self.config.timeout_for_latency(latency)
    }

    // =========================================================================
    // DIAGNOSTICS
    // =========================================================================

    /// Every candidate, best score first.
    pub fn snapshot(&self) -> Vec<CandidateSnapshot> {
        let now = self.time.now();
        let state = self.state.lock();
        let mut out: Vec<CandidateSnapshot> = state
            .candidates
            .values()
            .map(|c| {
                let mut decayed = c.clone();
                decayed.decay(now, self.config.value_half_life);
                CandidateSnapshot {
                    id: c.id(),
                    address: c.record.address,
                    score: decayed.score(&self.config),
                    value: decayed.value,
                    signal: c.signal,
                    latency_ms: c.latency_ms,
                    consecutive_failures: c.consecutive_failures,
                    connected: c.connected,
                    trusted: c.trusted,
                }
            })
            .collect();
        out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(CmpOrdering::Equal));
        out
    }

    pub fn metrics(&self) -> PoolMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn candidate_count(&self) -> usize {
        self.state.lock().candidates.len()
    }

    fn refresh_metrics(&self) {
        let now = self.time.now();
        let (total, selectable, connected, latency) = {
            let state = self.state.lock();
            let mut total = 0.0;
            let mut selectable = 0u64;
            let mut connected = 0u64;
            for c in state.candidates.values() {
                let mut decayed = c.clone();
                decayed.decay(now, self.config.value_half_life);
                total += decayed.value;
                if c.connected {
                    connected += 1;
                } else if c.trusted || c.signal == Some(NegotiationResult::Available) {
                    selectable += 1;
                }
            }
            (total, selectable, connected, state.latency_ms)
        };
        self.metrics.set_total_value(total);
        self.metrics.set_selectable(selectable);
        self.metrics.set_connected(connected);
        self.metrics.set_suggested_timeout(self.timeout_from(latency));
    }

    fn persist(&self, candidate: &Candidate) {
        let result = bincode::serialize(candidate)
            .map_err(ServerPoolError::from)
            .and_then(|bytes| {
                self.store
                    .put(&candidate_key(&candidate.id()), &bytes)
                    .map_err(ServerPoolError::from)
            });
        if let Err(e) = result {
            warn!(peer = %candidate.id(), "[lc-01] Failed to persist candidate: {}", e);
        }
    }
}

impl ServerFeedback for ServerPool {
    fn suggested_timeout(&self, peer: &NodeId) -> Duration {
        let state = self.state.lock();
        let latency = state
            .candidates
            .get(peer)
            .and_then(|c| c.latency_ms)
            .or(state.latency_ms);
        drop(state);
        self.timeout_from(latency)
    }

    fn peer_value(&self, peer: &NodeId) -> f64 {
        let now = self.time.now();
        self.state
            .lock()
            .candidates
            .get(peer)
            .map(|c| c.score_at(now, &self.config))
            .unwrap_or(0.0)
    }

    fn record_outcome(&self, peer: &NodeId, outcome: RequestOutcome) {
        ServerPool::record_outcome(self, peer, outcome)
    }
}

/// Yields candidates to connect to until the pool stops.
pub struct DialIterator {
    pool: Arc<ServerPool>,
}

impl DialIterator {
    /// Next candidate to dial; waits while none is dialable. `None` once
    /// the pool has stopped.
    pub async fn next(&mut self) -> Option<CandidateRecord> {
        loop {
            if self.pool.shutdown.is_cancelled() {
                return None;
            }
            let notified = self.pool.dial_ready.notified();
            if let Some(record) = self.pool.next_dial_candidate() {
                return Some(record);
            }
            tokio::select! {
                _ = self.pool.shutdown.cancelled() => return None,
                _ = notified => {}
                _ = tokio::time::sleep(self.pool.config.dial_poll_interval) => {}
            }
        }
    }
}
