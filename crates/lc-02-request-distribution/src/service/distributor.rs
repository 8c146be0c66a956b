//! # Request Distributor
//!
//! Assigns queued requests to peers with spare capacity, runs the
//! per-assignment deadline and moves a request through
//! `Queued -> Assigned -> {Answered, TimedOut, PeerLost}`.
//!
//! ## Invariants
//!
//! - A request holds at most one live assignment.
//! - A response is matched by wire id AND the peer it was sent to;
//!   anything else is discarded.
//! - Removing a peer fails its assignments before `PeerRegistry::remove`
//!   returns.
//! - Peers are drained in request-arrival order.

use parking_lot::Mutex;
use shared_types::{LesMessage, NodeId, RequestKind, RequestOutcome, ServerFeedback};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::metrics::{DistributorMetrics, DistributorMetricsSnapshot};
use super::registry::PeerRegistry;
use crate::config::DistributorConfig;
use crate::domain::{DistributionEvent, RequestId, RequestState, RetrieveError, ServerPeer};
use crate::ports::PeerSetListener;

// =============================================================================
// STATE
// =============================================================================

struct Entry {
    message: LesMessage,
    kind: RequestKind,
    /// Peers that have held this request.
    tried: HashSet<NodeId>,
    state: RequestState,
    assignment: Option<u64>,
    events: mpsc::UnboundedSender<DistributionEvent>,
    _slot: OwnedSemaphorePermit,
}

struct Assignment {
    request: RequestId,
    peer: NodeId,
    sent_at: Instant,
    timer: Option<AbortHandle>,
}

#[derive(Default)]
struct DistributorState {
    /// Requests waiting for a peer, in arrival order.
    queue: BTreeSet<RequestId>,
    requests: HashMap<RequestId, Entry>,
    /// Live assignments keyed by wire id.
    assignments: HashMap<u64, Assignment>,
    /// Live assignments per peer.
    load: HashMap<NodeId, usize>,
}

impl DistributorState {
    /// Drop a live assignment and free the peer's slot.
    fn release(&mut self, wire_id: u64) -> Option<Assignment> {
        let assignment = self.assignments.remove(&wire_id)?;
        if let Some(timer) = &assignment.timer {
            timer.abort();
        }
        if let Some(load) = self.load.get_mut(&assignment.peer) {
            *load = load.saturating_sub(1);
            if *load == 0 {
                self.load.remove(&assignment.peer);
            }
        }
        if let Some(entry) = self.requests.get_mut(&assignment.request) {
            entry.assignment = None;
        }
        Some(assignment)
    }

    /// Put a request back in the queue after `state`.
    fn requeue(&mut self, request: RequestId, state: RequestState) {
        if let Some(entry) = self.requests.get_mut(&request) {
            debug!("[lc-02] Request {} {:?}, re-queued", request, state);
            entry.state = RequestState::Queued;
            self.queue.insert(request);
        }
    }

    fn load_of(&self, peer: &NodeId) -> usize {
        self.load.get(peer).copied().unwrap_or(0)
    }
}

// =============================================================================
// DISTRIBUTOR
// =============================================================================

/// Matches queued requests to peers.
pub struct Distributor {
    me: Weak<Distributor>,
    config: DistributorConfig,
    registry: Arc<PeerRegistry>,
    feedback: Arc<dyn ServerFeedback>,
    state: Mutex<DistributorState>,
    slots: Arc<Semaphore>,
    next_request: AtomicU64,
    next_wire_id: AtomicU64,
    shutdown: CancellationToken,
    metrics: DistributorMetrics,
}

impl Distributor {
    /// Create a distributor and subscribe it to `registry`.
    pub fn new(
        config: DistributorConfig,
        registry: Arc<PeerRegistry>,
        feedback: Arc<dyn ServerFeedback>,
    ) -> Arc<Self> {
        let slots = Arc::new(Semaphore::new(config.max_queued_requests.max(1)));
        let distributor = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            config,
            registry: registry.clone(),
            feedback,
            state: Mutex::new(DistributorState::default()),
            slots,
            next_request: AtomicU64::new(1),
            next_wire_id: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
            metrics: DistributorMetrics::default(),
        });
        let weak = Arc::downgrade(&distributor);
        let listener: Weak<dyn PeerSetListener> = weak;
        registry.subscribe(listener);
        distributor
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> DistributorMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Admit a request. Waits while the queue is full.
    pub async fn queue(
        self: &Arc<Self>,
        message: LesMessage,
    ) -> Result<RequestTicket, RetrieveError> {
        if self.is_closed() {
            return Err(RetrieveError::Closed);
        }
        let slot = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RetrieveError::Closed)?;

        let id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut state = self.state.lock();
            // close() may have run while we waited for the slot.
            if self.is_closed() {
                return Err(RetrieveError::Closed);
            }
            state.requests.insert(
                id,
                Entry {
                    kind: message.kind(),
                    message,
                    tried: HashSet::new(),
                    state: RequestState::Queued,
                    assignment: None,
                    events: tx,
                    _slot: slot,
                },
            );
            state.queue.insert(id);
        }
        self.metrics.inc_queued();
        self.dispatch();

        Ok(RequestTicket {
            id,
            distributor: self.clone(),
            events: rx,
            finished: false,
        })
    }

    /// Route an inbound response. Returns false if nothing was waiting for it.
    pub fn deliver(&self, peer: &NodeId, response: LesMessage) -> bool {
        if !response.is_response() {
            return false;
        }
        let wire_id = response.req_id();
        {
            let mut state = self.state.lock();
            let matched = matches!(
                state.assignments.get(&wire_id),
                Some(a) if a.peer == *peer
            );
            if !matched {
                drop(state);
                self.metrics.inc_late_responses();
                debug!(
                    "[lc-02] Discarding unmatched response {} from {}",
                    wire_id, peer
                );
                return false;
            }
            let Some(assignment) = state.release(wire_id) else {
                return false;
            };
            if let Some(entry) = state.requests.get_mut(&assignment.request) {
                entry.state = RequestState::Answered;
                let _ = entry.events.send(DistributionEvent::Answered {
                    peer: *peer,
                    response,
                    elapsed: assignment.sent_at.elapsed(),
                });
            }
        }
        self.metrics.inc_answered();
        self.dispatch();
        true
    }

    /// Drop a request wherever it is. Returns false if it was already gone.
    pub fn cancel(&self, request: RequestId) -> bool {
        let was_assigned = {
            let mut state = self.state.lock();
            let Some(entry) = state.requests.remove(&request) else {
                return false;
            };
            state.queue.remove(&request);
            if let Some(wire_id) = entry.assignment {
                state.release(wire_id);
            }
            entry.assignment.is_some()
        };
        self.metrics.inc_cancelled();
        debug!(
            "[lc-02] Request {} cancelled (assigned: {})",
            request, was_assigned
        );
        if was_assigned {
            self.dispatch();
        }
        true
    }

    /// Fail every request with `Closed` and refuse new ones.
    pub fn close(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.slots.close();

        let mut state = self.state.lock();
        let wire_ids: Vec<u64> = state.assignments.keys().copied().collect();
        for wire_id in wire_ids {
            state.release(wire_id);
        }
        state.queue.clear();
        let pending = state.requests.len();
        for (_, entry) in state.requests.drain() {
            let _ = entry.events.send(DistributionEvent::Closed);
        }
        info!("[lc-02] Distributor closed, {} requests failed", pending);
    }

    /// Current state of a live request.
    pub fn request_state(&self, request: RequestId) -> Option<RequestState> {
        self.state.lock().requests.get(&request).map(|e| e.state)
    }

    pub fn queued_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn assignment_count(&self) -> usize {
        self.state.lock().assignments.len()
    }

    /// Live assignments held by `peer`.
    pub fn in_flight(&self, peer: &NodeId) -> usize {
        self.state.lock().load_of(peer)
    }

    // =========================================================================
    // TRANSITIONS
    // =========================================================================

    /// Assign every queued request that has a peer with spare capacity.
    fn dispatch(&self) {
        if self.is_closed() {
            return;
        }
        let mut sends: Vec<(Arc<ServerPeer>, LesMessage, u64)> = Vec::new();
        let mut exhausted: Vec<RequestId> = Vec::new();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let queued: Vec<RequestId> = state.queue.iter().copied().collect();

            for id in queued {
                let Some(entry) = state.requests.get(&id) else {
                    state.queue.remove(&id);
                    continue;
                };
                let candidates = self.registry.best_for(entry.kind, &entry.tried);
                if candidates.is_empty() {
                    // Nothing tried yet: wait for a peer to show up.
                    if !entry.tried.is_empty() {
                        exhausted.push(id);
                    }
                    continue;
                }
                let Some(peer) = candidates
                    .into_iter()
                    .find(|p| state.load_of(&p.id()) < p.capacity())
                else {
                    continue;
                };

                let wire_id = self.next_wire_id.fetch_add(1, Ordering::Relaxed);
                let timeout = self
                    .config
                    .assignment_timeout(entry.kind, self.feedback.suggested_timeout(&peer.id()));
                let timer = self.spawn_deadline(wire_id, timeout);

                let Some(entry) = state.requests.get_mut(&id) else {
                    continue;
                };
                entry.tried.insert(peer.id());
                entry.state = RequestState::Assigned;
                entry.assignment = Some(wire_id);
                let mut message = entry.message.clone();
                message.set_req_id(wire_id);

                state.queue.remove(&id);
                *state.load.entry(peer.id()).or_insert(0) += 1;
                state.assignments.insert(
                    wire_id,
                    Assignment {
                        request: id,
                        peer: peer.id(),
                        sent_at: Instant::now(),
                        timer,
                    },
                );
                debug!(
                    "[lc-02] Request {} assigned to {} as {} (timeout {:?})",
                    id,
                    peer.id(),
                    wire_id,
                    timeout
                );
                sends.push((peer, message, wire_id));
            }

            for id in exhausted {
                state.queue.remove(&id);
                if let Some(entry) = state.requests.remove(&id) {
                    let tried = entry.tried.len();
                    warn!("[lc-02] Request {} exhausted after {} peers", id, tried);
                    let _ = entry.events.send(DistributionEvent::Exhausted { tried });
                    self.metrics.inc_exhausted();
                }
            }
        }

        for (peer, message, wire_id) in sends {
            self.metrics.inc_assigned();
            if let Err(e) = peer.send(message) {
                warn!("[lc-02] Send to {} failed: {}", peer.id(), e);
                self.fail_assignment(wire_id, RequestState::PeerLost);
            }
        }
    }

    fn spawn_deadline(&self, wire_id: u64, timeout: Duration) -> Option<AbortHandle> {
        let me = self.me.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(distributor) = me.upgrade() {
                distributor.fail_assignment(wire_id, RequestState::TimedOut);
            }
        });
        Some(handle.abort_handle())
    }

    /// End a live assignment with a negative outcome and re-queue its request.
    fn fail_assignment(&self, wire_id: u64, reason: RequestState) {
        let peer = {
            let mut state = self.state.lock();
            let Some(assignment) = state.release(wire_id) else {
                return;
            };
            state.requeue(assignment.request, reason);
            assignment.peer
        };

        let outcome = match reason {
            RequestState::TimedOut => {
                self.metrics.inc_timed_out();
                warn!("[lc-02] Assignment {} to {} timed out", wire_id, peer);
                RequestOutcome::Failure
            }
            _ => {
                self.metrics.inc_peer_lost();
                RequestOutcome::Disconnect
            }
        };
        self.feedback.record_outcome(&peer, outcome);
        self.dispatch();
    }

    /// The owner accepted the answer from `peer`.
    fn complete(&self, request: RequestId, peer: NodeId, elapsed: Duration) {
        let removed = self.state.lock().requests.remove(&request);
        if removed.is_some() {
            self.feedback.record_outcome(
                &peer,
                RequestOutcome::Success {
                    response_time: elapsed,
                },
            );
        }
    }

    /// The owner rejected the answer from `peer`; try someone else.
    fn reject(&self, request: RequestId, peer: NodeId) {
        {
            let mut state = self.state.lock();
            if !state.requests.contains_key(&request) {
                return;
            }
            state.requeue(request, RequestState::Answered);
        }
        self.metrics.inc_rejected();
        self.feedback.record_outcome(&peer, RequestOutcome::Failure);
        self.dispatch();
    }
}

impl PeerSetListener for Distributor {
    fn peer_added(&self, _peer: &Arc<ServerPeer>) {
        self.dispatch();
    }

    fn peer_removed(&self, id: &NodeId) {
        let lost: Vec<u64> = {
            let mut state = self.state.lock();
            let wire_ids: Vec<u64> = state
                .assignments
                .iter()
                .filter(|(_, a)| a.peer == *id)
                .map(|(wire_id, _)| *wire_id)
                .collect();
            for wire_id in &wire_ids {
                if let Some(assignment) = state.release(*wire_id) {
                    state.requeue(assignment.request, RequestState::PeerLost);
                }
            }
            state.load.remove(id);
            wire_ids
        };

        if !lost.is_empty() {
            info!(
                "[lc-02] Peer {} dropped with {} requests in flight",
                id,
                lost.len()
            );
        }
        for _ in &lost {
            self.metrics.inc_peer_lost();
            self.feedback.record_outcome(id, RequestOutcome::Disconnect);
        }
        self.dispatch();
    }
}

// =============================================================================
// TICKET
// =============================================================================

/// Handle to a queued request.
///
/// Dropping an unfinished ticket cancels the request and frees its slot.
pub struct RequestTicket {
    id: RequestId,
    distributor: Arc<Distributor>,
    events: mpsc::UnboundedReceiver<DistributionEvent>,
    finished: bool,
}

impl RequestTicket {
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Next event for this request; `Closed` if the distributor went away.
    pub async fn next_event(&mut self) -> DistributionEvent {
        match self.events.recv().await {
            Some(event) => {
                if !matches!(event, DistributionEvent::Answered { .. }) {
                    self.finished = true;
                }
                event
            }
            None => {
                self.finished = true;
                DistributionEvent::Closed
            }
        }
    }

    /// Accept the answer from `peer`; the request is done.
    pub fn accept(mut self, peer: NodeId, elapsed: Duration) {
        self.finished = true;
        self.distributor.complete(self.id, peer, elapsed);
    }

    /// Reject the answer from `peer` and re-queue.
    pub fn reject(&mut self, peer: NodeId) {
        self.distributor.reject(self.id, peer);
    }
}

impl Drop for RequestTicket {
    fn drop(&mut self) {
        if !self.finished {
            self.distributor.cancel(self.id);
        }
    }
}
