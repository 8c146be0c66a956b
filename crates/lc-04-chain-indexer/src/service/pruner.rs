//! # Section Pruner
//!
//! Deletes the data of superseded committed sections. Roots and metadata
//! are kept so old sections still verify.
//!
//! Pruning walks a contiguous prefix and stops at the first section whose
//! root a live retrieval holds, or that a dependent indexer still needs.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::store::SectionStore;
use crate::config::PrunerConfig;
use crate::domain::IndexerError;
use crate::ports::{LiveRootCheck, SectionProgress};

struct PruneTarget {
    store: SectionStore,
    /// Indexers reading this store's section data when they commit.
    dependents: Vec<Arc<dyn SectionProgress>>,
}

/// Periodic pruner over a set of section stores.
pub struct Pruner {
    config: PrunerConfig,
    targets: Vec<PruneTarget>,
    live_roots: Arc<dyn LiveRootCheck>,
}

impl Pruner {
    pub fn new(config: PrunerConfig, live_roots: Arc<dyn LiveRootCheck>) -> Self {
        Self {
            config,
            targets: Vec::new(),
            live_roots,
        }
    }

    /// Prune `store`, never ahead of what `dependents` have committed.
    pub fn add_target(&mut self, store: SectionStore, dependents: Vec<Arc<dyn SectionProgress>>) {
        self.targets.push(PruneTarget { store, dependents });
    }

    /// One pass over all targets. Returns the number of sections pruned.
    pub fn prune_once(&self) -> Result<u64, IndexerError> {
        if self.config.no_prune {
            return Ok(0);
        }

        let mut total = 0;
        for target in &self.targets {
            total += self.prune_target(target)?;
        }
        if total > 0 {
            info!("[lc-04] Pruned {} sections", total);
        }
        Ok(total)
    }

    fn prune_target(&self, target: &PruneTarget) -> Result<u64, IndexerError> {
        let store = &target.store;
        let committed = store.section_count()?;
        let limit = target
            .dependents
            .iter()
            .map(|d| d.committed_sections())
            .fold(committed.saturating_sub(self.config.keep_sections), u64::min);

        let mut next = store.pruned_count()?;
        let mut pruned = 0;
        while next < limit {
            let Some(root) = store.section_root(next)? else {
                break;
            };
            if self.live_roots.is_live(&root) {
                debug!(
                    section = next,
                    "[lc-04] {} section held by a live retrieval",
                    store.name()
                );
                break;
            }
            let removed = store.prune_section(next)?;
            debug!(
                section = next,
                "[lc-04] {} section pruned ({} entries)",
                store.name(),
                removed
            );
            next += 1;
            pruned += 1;
        }
        Ok(pruned)
    }

    /// Prune every `interval` until `shutdown`.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        if self.config.no_prune {
            info!("[lc-04] Pruning disabled");
            return;
        }
        let mut ticker = tokio::time::interval(self.config.interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.prune_once() {
                        warn!("[lc-04] Pruning failed: {}", e);
                    }
                }
            }
        }
        info!("[lc-04] Pruner stopped");
    }
}
