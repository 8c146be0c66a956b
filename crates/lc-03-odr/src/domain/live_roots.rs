//! Reference counts of roots that in-flight retrievals verify against.

use lc_04_chain_indexer::LiveRootCheck;
use parking_lot::Mutex;
use shared_types::Hash;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct LiveRoots {
    counts: Mutex<HashMap<Hash, usize>>,
}

impl LiveRoots {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Hold `root` until the guard drops.
    pub fn pin(self: &Arc<Self>, root: Hash) -> RootGuard {
        *self.counts.lock().entry(root).or_insert(0) += 1;
        RootGuard {
            roots: self.clone(),
            root,
        }
    }

    pub fn holders(&self, root: &Hash) -> usize {
        self.counts.lock().get(root).copied().unwrap_or(0)
    }

    /// Distinct roots held.
    pub fn len(&self) -> usize {
        self.counts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.lock().is_empty()
    }

    fn release(&self, root: &Hash) {
        let mut counts = self.counts.lock();
        if let Some(count) = counts.get_mut(root) {
            *count -= 1;
            if *count == 0 {
                counts.remove(root);
            }
        }
    }
}

impl LiveRootCheck for LiveRoots {
    fn is_live(&self, root: &Hash) -> bool {
        self.counts.lock().contains_key(root)
    }
}

/// Keeps one root live.
#[derive(Debug)]
pub struct RootGuard {
    roots: Arc<LiveRoots>,
    root: Hash,
}

impl RootGuard {
    pub fn root(&self) -> &Hash {
        &self.root
    }
}

impl Drop for RootGuard {
    fn drop(&mut self) {
        self.roots.release(&self.root);
    }
}
