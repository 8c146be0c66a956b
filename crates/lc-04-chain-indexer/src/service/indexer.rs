//! # Chain Indexer
//!
//! Processes confirmed headers in increasing number order into fixed-size
//! sections and commits each one through its backend.
//!
//! ## Invariants
//!
//! - Committed sections are contiguous from 0 and never recomputed.
//! - A child does not start section N before its upstream committed N.
//! - A reorg restarts the section being processed; committed ones stay.

use parking_lot::{Mutex, RwLock};
use shared_types::{Hash, KeyValueStore};
use std::future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::store::SectionStore;
use crate::backends::IndexerBackend;
use crate::config::IndexerConfig;
use crate::domain::{ChainEvent, IndexerError, IndexerStatus};
use crate::ports::{HeaderSource, SectionProgress};

/// Section indexer driven by chain events.
pub struct ChainIndexer<B: IndexerBackend> {
    config: IndexerConfig,
    store: SectionStore,
    headers: Arc<dyn HeaderSource>,
    upstream: Option<Arc<dyn SectionProgress>>,
    /// Held for the whole of a section; serializes commits.
    backend: Mutex<B>,
    committed: watch::Sender<u64>,
    status: RwLock<IndexerStatus>,
    last_head: AtomicU64,
    reorg_epoch: AtomicU64,
}

impl<B: IndexerBackend> ChainIndexer<B> {
    pub fn new(
        name: &str,
        config: IndexerConfig,
        kv: Arc<dyn KeyValueStore>,
        headers: Arc<dyn HeaderSource>,
        backend: B,
    ) -> Result<Self, IndexerError> {
        config.validate()?;
        let store = SectionStore::new(name, kv);
        let sections = store.section_count()?;
        let (committed, _) = watch::channel(sections);
        info!("[lc-04] {} indexer opened with {} sections", name, sections);

        Ok(Self {
            config,
            store,
            headers,
            upstream: None,
            backend: Mutex::new(backend),
            committed,
            status: RwLock::new(IndexerStatus::Idle),
            last_head: AtomicU64::new(0),
            reorg_epoch: AtomicU64::new(0),
        })
    }

    /// Gate processing on `upstream`'s committed sections.
    pub fn with_upstream(mut self, upstream: Arc<dyn SectionProgress>) -> Self {
        self.upstream = Some(upstream);
        self
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn store(&self) -> &SectionStore {
        &self.store
    }

    pub fn status(&self) -> IndexerStatus {
        self.status.read().clone()
    }

    /// Committed sections.
    pub fn sections(&self) -> Result<u64, IndexerError> {
        self.store.section_count()
    }

    pub fn section_root(&self, section: u64) -> Result<Option<Hash>, IndexerError> {
        self.store.section_root(section)
    }

    /// Commit every section confirmed at `head`. Returns the committed
    /// section count.
    pub fn process_head(&self, head: u64) -> Result<u64, IndexerError> {
        self.last_head.store(head, Ordering::SeqCst);

        let mut target = self.config.confirmed_sections(head);
        if let Some(upstream) = &self.upstream {
            target = target.min(upstream.committed_sections());
        }

        let mut backend = self.backend.lock();
        let mut next = self.store.section_count()?;
        while next < target {
            *self.status.write() = IndexerStatus::Processing { section: next };
            match self.process_section(&mut backend, next) {
                Ok(root) => {
                    info!(
                        section = next,
                        "[lc-04] {} section committed, root {}",
                        self.store.name(),
                        hex::encode(&root[..8])
                    );
                    next += 1;
                    self.committed.send_replace(next);
                }
                Err(IndexerError::Reorged(section)) => {
                    debug!(
                        section,
                        "[lc-04] {} section restarts after reorg",
                        self.store.name()
                    );
                    break;
                }
                Err(e) => {
                    error!(
                        section = next,
                        "[lc-04] {} indexer halted: {}",
                        self.store.name(),
                        e
                    );
                    *self.status.write() = IndexerStatus::Halted {
                        section: next,
                        error: e.to_string(),
                    };
                    return Err(e);
                }
            }
        }

        *self.status.write() = IndexerStatus::Idle;
        Ok(next)
    }

    /// Blocks above `common_ancestor` were replaced.
    ///
    /// Abandons the section in progress; committed sections are kept.
    pub fn reorg(&self, common_ancestor: u64) {
        self.reorg_epoch.fetch_add(1, Ordering::SeqCst);
        let covered = self
            .store
            .section_count()
            .map(|count| count * self.config.section_size)
            .unwrap_or(0);
        if common_ancestor + 1 < covered {
            warn!(
                "[lc-04] {} reorg to block {} reaches into committed sections, keeping them",
                self.store.name(),
                common_ancestor
            );
        } else {
            debug!(
                "[lc-04] {} reorg to block {}",
                self.store.name(),
                common_ancestor
            );
        }
    }

    fn process_section(&self, backend: &mut B, section: u64) -> Result<Hash, IndexerError> {
        let epoch = self.reorg_epoch.load(Ordering::SeqCst);
        backend.reset(section, &self.store)?;

        let first = self.config.section_start(section);
        let mut parent = match first {
            0 => None,
            n => Some(
                self.headers
                    .canonical_header(n - 1)
                    .ok_or(IndexerError::MissingHeader(n - 1))?
                    .hash(),
            ),
        };

        for number in first..first + self.config.section_size {
            if self.reorg_epoch.load(Ordering::SeqCst) != epoch {
                return Err(IndexerError::Reorged(section));
            }
            let header = self
                .headers
                .canonical_header(number)
                .ok_or(IndexerError::MissingHeader(number))?;
            if header.number != number || parent.is_some_and(|p| p != header.parent_hash) {
                return Err(IndexerError::BrokenLink { number });
            }
            parent = Some(header.hash());
            backend.process(&header)?;
        }

        if self.reorg_epoch.load(Ordering::SeqCst) != epoch {
            return Err(IndexerError::Reorged(section));
        }
        let commit = backend.commit(section)?;
        let root = commit.root;
        self.store.commit_section(section, commit)?;
        Ok(root)
    }

    fn on_head(&self, head: u64) {
        if let Err(e) = self.process_head(head) {
            warn!("[lc-04] {} failed at head {}: {}", self.store.name(), head, e);
        }
    }

    /// Follow `events` (and upstream commits) until `shutdown`.
    pub async fn run(
        self: Arc<Self>,
        mut events: broadcast::Receiver<ChainEvent>,
        shutdown: CancellationToken,
    ) {
        let mut upstream = self.upstream.as_ref().map(|u| u.watch_sections());
        info!("[lc-04] {} indexer running", self.store.name());

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Ok(ChainEvent::Head(header)) => self.on_head(header.number),
                    Ok(ChainEvent::Reorg { common_ancestor, head }) => {
                        self.reorg(common_ancestor);
                        self.on_head(head.number);
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("[lc-04] {} missed {} chain events", self.store.name(), missed);
                        self.on_head(self.last_head.load(Ordering::SeqCst));
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                changed = upstream_changed(&mut upstream) => {
                    if changed.is_err() {
                        upstream = None;
                    } else {
                        self.on_head(self.last_head.load(Ordering::SeqCst));
                    }
                }
            }
        }
        info!("[lc-04] {} indexer stopped", self.store.name());
    }
}

async fn upstream_changed(
    upstream: &mut Option<watch::Receiver<u64>>,
) -> Result<(), watch::error::RecvError> {
    match upstream {
        Some(rx) => rx.changed().await,
        None => future::pending().await,
    }
}

impl<B: IndexerBackend> SectionProgress for ChainIndexer<B> {
    fn name(&self) -> &str {
        self.store.name()
    }

    fn committed_sections(&self) -> u64 {
        *self.committed.borrow()
    }

    fn watch_sections(&self) -> watch::Receiver<u64> {
        self.committed.subscribe()
    }
}
