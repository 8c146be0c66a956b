//! # Outbound Ports

use shared_types::{LesMessage, NodeId};
use std::sync::Arc;

use crate::domain::{ServerPeer, TransportError};

/// Send half of a peer connection.
///
/// `send` queues the message and returns without waiting on the network;
/// replies arrive through `Distributor::deliver`.
pub trait PeerTransport: Send + Sync {
    fn send(&self, message: LesMessage) -> Result<(), TransportError>;
}

/// Observer of registry membership.
///
/// Called synchronously, after the registry lock is released.
pub trait PeerSetListener: Send + Sync {
    fn peer_added(&self, peer: &Arc<ServerPeer>);
    fn peer_removed(&self, id: &NodeId);
}
