//! # Outbound Ports
//!
//! What the pool needs from its host: a datagram channel for capacity
//! queries and discovery feeds producing candidates.

use async_trait::async_trait;

use crate::domain::{CandidateRecord, NegotiationError};

/// Unreliable, low-cost datagram channel used for capacity queries.
///
/// Sends never block on the network. Replies are fed back through
/// `CapacityNegotiator::handle_reply` by whoever reads the socket.
pub trait DatagramChannel: Send + Sync {
    fn send(&self, to: &CandidateRecord, payload: Vec<u8>) -> Result<(), NegotiationError>;
}

/// Lazy, restartable, possibly repeating sequence of candidates.
#[async_trait]
pub trait DiscoveryFeed: Send {
    /// Next candidate; `None` once the feed has nothing more for now.
    async fn next(&mut self) -> Option<CandidateRecord>;

    /// Rewind after `next` returned `None`.
    fn restart(&mut self);

    /// Name used in logs.
    fn name(&self) -> &str {
        "discovery"
    }
}
