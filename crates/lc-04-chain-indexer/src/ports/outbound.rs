//! # Outbound Ports

use shared_types::{BlockHeader, Hash};
use tokio::sync::watch;

/// Canonical headers by number.
pub trait HeaderSource: Send + Sync {
    fn canonical_header(&self, number: u64) -> Option<BlockHeader>;
}

/// Committed-section progress of an upstream indexer.
pub trait SectionProgress: Send + Sync {
    fn name(&self) -> &str;

    fn committed_sections(&self) -> u64;

    /// Receiver that changes whenever a section is committed.
    fn watch_sections(&self) -> watch::Receiver<u64>;
}

/// Roots that in-flight retrievals are verifying against.
pub trait LiveRootCheck: Send + Sync {
    fn is_live(&self, root: &Hash) -> bool;
}

/// No retrieval ever holds a root.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoLiveRoots;

impl LiveRootCheck for NoLiveRoots {
    fn is_live(&self, _root: &Hash) -> bool {
        false
    }
}
