//! # Capacity Negotiator
//!
//! Asks a candidate, over the datagram channel, whether it has a free
//! serving slot before the pool pays for a full connection.
//!
//! ## Correlation
//!
//! Pending queries are keyed by `(node, keccak(request bytes))`. Identical
//! concurrent queries to one node share a single datagram; replies resolve
//! every waiter on the key at once. Replies for keys with no waiter (late
//! or duplicate) are dropped and counted.

use parking_lot::Mutex;
use shared_types::{keccak256, Hash, NodeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::config::NegotiatorConfig;
use crate::domain::{
    CandidateRecord, CapacityQueryParams, NegotiationError, NegotiationResult, QueryBatch,
    ReplyBatch, CAPACITY_QUERY_NAME, LES_SERVICE,
};
use crate::ports::DatagramChannel;

type PendingKey = (NodeId, Hash);

/// Counters kept by the negotiator.
#[derive(Debug, Default)]
pub struct NegotiatorStats {
    pub sent: AtomicU64,
    pub answered: AtomicU64,
    pub timed_out: AtomicU64,
    pub unmatched_replies: AtomicU64,
    pub malformed_replies: AtomicU64,
}

/// Pre-connection capacity query client.
pub struct CapacityNegotiator {
    config: NegotiatorConfig,
    channel: Arc<dyn DatagramChannel>,
    pending: Mutex<HashMap<PendingKey, Vec<oneshot::Sender<NegotiationResult>>>>,
    stats: NegotiatorStats,
}

impl CapacityNegotiator {
    pub fn new(config: NegotiatorConfig, channel: Arc<dyn DatagramChannel>) -> Self {
        Self {
            config,
            channel,
            pending: Mutex::new(HashMap::new()),
            stats: NegotiatorStats::default(),
        }
    }

    pub fn stats(&self) -> &NegotiatorStats {
        &self.stats
    }

    /// Number of keys still awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    fn capacity_request(&self) -> Result<Vec<u8>, NegotiationError> {
        let mut batch = QueryBatch::default();
        batch.add(
            LES_SERVICE,
            CAPACITY_QUERY_NAME,
            &CapacityQueryParams {
                bias_secs: self.config.bias_secs,
                add_tokens: vec![0],
            },
        )?;
        batch.encode()
    }

    /// Query `candidate` for spare capacity.
    ///
    /// Never fails and never waits longer than the configured timeout: no
    /// negotiation support, a send error, a missing reply or a malformed
    /// one all resolve to `Unsupported`.
    pub async fn negotiate(&self, candidate: &CandidateRecord) -> NegotiationResult {
        if candidate.negotiation_version() < 1 {
            return NegotiationResult::Unsupported;
        }

        let request = match self.capacity_request() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("[lc-01] Failed to encode capacity query: {}", e);
                return NegotiationResult::Unsupported;
            }
        };
        let key = (candidate.id, keccak256(&request));

        let (tx, rx) = oneshot::channel();
        let first = {
            let mut pending = self.pending.lock();
            let waiters = pending.entry(key).or_default();
            waiters.push(tx);
            waiters.len() == 1
        };

        if first {
            self.stats.sent.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = self.channel.send(candidate, request) {
                debug!(peer = %candidate.id, "[lc-01] Capacity query send failed: {}", e);
                self.pending.lock().remove(&key);
                return NegotiationResult::Unsupported;
            }
        }

        match tokio::time::timeout(self.config.timeout, rx).await {
            Ok(Ok(result)) => result,
            // Sender dropped: the entry was cleared by a failed send
            Ok(Err(_)) => NegotiationResult::Unsupported,
            Err(_) => {
                self.stats.timed_out.fetch_add(1, Ordering::Relaxed);
                let mut pending = self.pending.lock();
                if let Some(waiters) = pending.get_mut(&key) {
                    waiters.retain(|w| !w.is_closed());
                    if waiters.is_empty() {
                        pending.remove(&key);
                    }
                }
                debug!(peer = %candidate.id, "[lc-01] Capacity query timed out");
                NegotiationResult::Unsupported
            }
        }
    }

    /// Feed a datagram received from `from`.
    pub fn handle_reply(&self, from: NodeId, payload: &[u8]) {
        let reply = match ReplyBatch::decode(payload) {
            Ok(reply) => reply,
            Err(e) => {
                self.stats.malformed_replies.fetch_add(1, Ordering::Relaxed);
                debug!(peer = %from, "[lc-01] Dropping malformed capacity reply: {}", e);
                return;
            }
        };

        let Some(waiters) = self.pending.lock().remove(&(from, reply.request_hash)) else {
            self.stats.unmatched_replies.fetch_add(1, Ordering::Relaxed);
            debug!(peer = %from, "[lc-01] Dropping unmatched capacity reply");
            return;
        };

        let result = match reply.get::<Vec<u64>>(CAPACITY_QUERY_NAME) {
            Some(capacities) if capacities.len() == 1 => {
                if capacities[0] > 0 {
                    NegotiationResult::Available
                } else {
                    NegotiationResult::Busy
                }
            }
            _ => NegotiationResult::Unsupported,
        };

        self.stats.answered.fetch_add(1, Ordering::Relaxed);
        for waiter in waiters {
            let _ = waiter.send(result);
        }
    }
}
