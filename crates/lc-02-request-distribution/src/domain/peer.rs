//! Connected server peers.

use parking_lot::RwLock;
use shared_types::{LesMessage, NodeId, RequestKind};
use std::fmt;
use std::sync::Arc;

use super::errors::TransportError;
use crate::ports::PeerTransport;

/// Connection state of a peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerState {
    Negotiating,
    Connected,
    Disconnecting,
    Disconnected,
}

/// A connected light server as seen by the registry.
pub struct ServerPeer {
    id: NodeId,
    protocol_version: u32,
    /// Concurrent assignments the peer accepts.
    capacity: usize,
    transport: Arc<dyn PeerTransport>,
    state: RwLock<PeerState>,
}

impl ServerPeer {
    pub fn new(
        id: NodeId,
        protocol_version: u32,
        capacity: usize,
        transport: Arc<dyn PeerTransport>,
    ) -> Self {
        Self {
            id,
            protocol_version,
            capacity: capacity.max(1),
            transport,
            state: RwLock::new(PeerState::Negotiating),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn protocol_version(&self) -> u32 {
        self.protocol_version
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn state(&self) -> PeerState {
        *self.state.read()
    }

    pub(crate) fn set_state(&self, state: PeerState) {
        *self.state.write() = state;
    }

    /// True if the peer speaks a version serving `kind`.
    pub fn serves(&self, kind: RequestKind) -> bool {
        self.protocol_version >= kind.min_protocol_version()
    }

    pub fn send(&self, message: LesMessage) -> Result<(), TransportError> {
        self.transport.send(message)
    }
}

impl fmt::Debug for ServerPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerPeer")
            .field("id", &self.id)
            .field("protocol_version", &self.protocol_version)
            .field("capacity", &self.capacity)
            .field("state", &self.state())
            .finish()
    }
}
