//! Request lifecycle types.

use shared_types::{LesMessage, NodeId};
use std::time::Duration;

/// Identifier of a logical request; increases with arrival.
pub type RequestId = u64;

/// State of a live request.
///
/// `Queued -> Assigned -> {Answered, TimedOut, PeerLost}`, then back to
/// `Queued`. Finished requests leave the distributor and have no state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestState {
    Queued,
    Assigned,
    /// Answer handed to the owner, awaiting accept or reject.
    Answered,
    TimedOut,
    PeerLost,
}

/// Events delivered to the owner of a queued request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DistributionEvent {
    /// `peer` answered after `elapsed`; awaiting accept or reject.
    Answered {
        peer: NodeId,
        response: LesMessage,
        elapsed: Duration,
    },
    /// No untried eligible peer is left.
    Exhausted { tried: usize },
    /// The distributor shut down.
    Closed,
}
