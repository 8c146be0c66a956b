//! # Peer Registry
//!
//! Connected server peers and the order in which they are offered work.

use parking_lot::RwLock;
use shared_types::{NodeId, RequestKind, ServerFeedback};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use crate::domain::{PeerState, ServerPeer};
use crate::ports::PeerSetListener;

/// Connected peers, keyed by node id.
pub struct PeerRegistry {
    peers: RwLock<HashMap<NodeId, Arc<ServerPeer>>>,
    listeners: RwLock<Vec<Weak<dyn PeerSetListener>>>,
    feedback: Arc<dyn ServerFeedback>,
}

impl PeerRegistry {
    pub fn new(feedback: Arc<dyn ServerFeedback>) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            feedback,
        }
    }

    /// Register a membership observer. Held weakly.
    pub fn subscribe(&self, listener: Weak<dyn PeerSetListener>) {
        self.listeners.write().push(listener);
    }

    /// Add a peer and mark it connected. Replaces an entry with the same id.
    pub fn add(&self, peer: Arc<ServerPeer>) {
        let id = peer.id();
        peer.set_state(PeerState::Connected);
        let replaced = self.peers.write().insert(id, peer.clone());

        if let Some(old) = replaced {
            old.set_state(PeerState::Disconnected);
            self.for_each_listener(|l| l.peer_removed(&id));
        }
        info!(
            "[lc-02] Peer {} registered (version {}, capacity {})",
            id,
            peer.protocol_version(),
            peer.capacity()
        );
        self.for_each_listener(|l| l.peer_added(&peer));
    }

    /// Remove a peer.
    ///
    /// Listeners run before this returns, so every assignment bound to the
    /// peer has already been failed over when the caller continues.
    pub fn remove(&self, id: &NodeId) -> Option<Arc<ServerPeer>> {
        let removed = self.peers.write().remove(id)?;
        removed.set_state(PeerState::Disconnecting);
        self.for_each_listener(|l| l.peer_removed(id));
        removed.set_state(PeerState::Disconnected);
        info!("[lc-02] Peer {} removed", id);
        Some(removed)
    }

    pub fn get(&self, id: &NodeId) -> Option<Arc<ServerPeer>> {
        self.peers.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.peers.read().keys().copied().collect()
    }

    /// Connected peers able to serve `kind`, best value first.
    ///
    /// Peers in `exclude` are skipped. Ties go to the lower node id.
    pub fn best_for(&self, kind: RequestKind, exclude: &HashSet<NodeId>) -> Vec<Arc<ServerPeer>> {
        let mut eligible: Vec<(f64, Arc<ServerPeer>)> = self
            .peers
            .read()
            .values()
            .filter(|p| p.state() == PeerState::Connected)
            .filter(|p| p.serves(kind))
            .filter(|p| !exclude.contains(&p.id()))
            .map(|p| (self.feedback.peer_value(&p.id()), p.clone()))
            .collect();

        eligible.sort_by(|(va, a), (vb, b)| {
            vb.partial_cmp(va)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id().cmp(&b.id()))
        });
        debug!(
            "[lc-02] {} eligible peers for {}",
            eligible.len(),
            kind.as_str()
        );
        eligible.into_iter().map(|(_, p)| p).collect()
    }

    fn for_each_listener(&self, f: impl Fn(&dyn PeerSetListener)) {
        let live: Vec<Arc<dyn PeerSetListener>> = {
            let mut listeners = self.listeners.write();
            listeners.retain(|l| l.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in live {
            f(listener.as_ref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TransportError;
    use crate::ports::PeerTransport;
    use parking_lot::Mutex;
    use shared_types::{LesMessage, RequestOutcome};
    use std::time::Duration;

    struct NullTransport;

    impl PeerTransport for NullTransport {
        fn send(&self, _message: LesMessage) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct ValueTable(Mutex<HashMap<NodeId, f64>>);

    impl ServerFeedback for ValueTable {
        fn suggested_timeout(&self, _peer: &NodeId) -> Duration {
            Duration::from_secs(1)
        }
        fn peer_value(&self, peer: &NodeId) -> f64 {
            self.0.lock().get(peer).copied().unwrap_or(0.0)
        }
        fn record_outcome(&self, _peer: &NodeId, _outcome: RequestOutcome) {}
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl PeerSetListener for Recorder {
        fn peer_added(&self, peer: &Arc<ServerPeer>) {
            self.0.lock().push(format!("+{}", peer.id().0[0]));
        }
        fn peer_removed(&self, id: &NodeId) {
            self.0.lock().push(format!("-{}", id.0[0]));
        }
    }

    fn peer(n: u8, version: u32) -> Arc<ServerPeer> {
        Arc::new(ServerPeer::new(
            NodeId::new([n; 32]),
            version,
            2,
            Arc::new(NullTransport),
        ))
    }

    #[test]
    fn test_best_for_orders_by_value_and_filters_version() {
        let values = Arc::new(ValueTable::default());
        values.0.lock().insert(NodeId::new([1; 32]), 1.0);
        values.0.lock().insert(NodeId::new([2; 32]), 5.0);
        let registry = PeerRegistry::new(values);

        registry.add(peer(1, 3));
        registry.add(peer(2, 3));
        registry.add(peer(3, 2));

        let order: Vec<u8> = registry
            .best_for(RequestKind::TrieNode, &HashSet::new())
            .iter()
            .map(|p| p.id().0[0])
            .collect();
        assert_eq!(order, vec![2, 1, 3]);

        // Version 2 cannot serve tx status.
        let order: Vec<u8> = registry
            .best_for(RequestKind::TxStatus, &HashSet::new())
            .iter()
            .map(|p| p.id().0[0])
            .collect();
        assert_eq!(order, vec![2, 1]);

        let exclude: HashSet<_> = [NodeId::new([2; 32])].into_iter().collect();
        let order: Vec<u8> = registry
            .best_for(RequestKind::TrieNode, &exclude)
            .iter()
            .map(|p| p.id().0[0])
            .collect();
        assert_eq!(order, vec![1, 3]);
    }

    #[test]
    fn test_listeners_observe_membership() {
        let registry = PeerRegistry::new(Arc::new(ValueTable::default()));
        let recorder = Arc::new(Recorder::default());
        let weak = Arc::downgrade(&recorder);
        let weak: Weak<dyn PeerSetListener> = weak;
        registry.subscribe(weak);

        let p = peer(7, 3);
        registry.add(p.clone());
        assert_eq!(p.state(), PeerState::Connected);
        assert!(registry.get(&p.id()).is_some());

        registry.remove(&p.id());
        assert_eq!(p.state(), PeerState::Disconnected);
        assert!(registry.remove(&p.id()).is_none());
        assert!(registry.is_empty());

        assert_eq!(*recorder.0.lock(), vec!["+7".to_string(), "-7".to_string()]);
    }

    #[test]
    fn test_dropped_listener_is_pruned() {
        let registry = PeerRegistry::new(Arc::new(ValueTable::default()));
        {
            let recorder = Arc::new(Recorder::default());
            let weak = Arc::downgrade(&recorder);
            let weak: Weak<dyn PeerSetListener> = weak;
            registry.subscribe(weak);
        }
        registry.add(peer(1, 3));
        assert!(registry.listeners.read().is_empty());
    }
}
