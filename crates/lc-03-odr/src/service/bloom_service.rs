//! # Bloom Bits Service
//!
//! Log filtering asks for many (bit, sections) vectors at once. Lookups go
//! through a bounded queue served by a fixed set of workers, so a burst
//! of filter work cannot flood the distributor.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::odr::Odr;
use crate::domain::OdrError;

struct BloomTask {
    bit: u16,
    sections: Vec<u64>,
    reply: oneshot::Sender<Result<Vec<Vec<u8>>, OdrError>>,
}

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<BloomTask>>>;

/// Worker pool answering bloom bit lookups through [`Odr`].
pub struct BloomBitsService {
    odr: Arc<Odr>,
    workers: usize,
    sender: Mutex<Option<mpsc::Sender<BloomTask>>>,
    receiver: SharedReceiver,
    shutdown: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl BloomBitsService {
    pub fn new(odr: Arc<Odr>) -> Self {
        let workers = odr.config().bloom_workers.max(1);
        let (tx, rx) = mpsc::channel(odr.config().bloom_queue.max(1));
        Self {
            odr,
            workers,
            sender: Mutex::new(Some(tx)),
            receiver: Arc::new(tokio::sync::Mutex::new(rx)),
            shutdown: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the workers. Calling it again is a no-op.
    pub fn start(&self) {
        let mut handles = self.handles.lock();
        if !handles.is_empty() || self.shutdown.is_cancelled() {
            return;
        }
        for worker in 0..self.workers {
            handles.push(tokio::spawn(work(
                worker,
                self.odr.clone(),
                self.receiver.clone(),
                self.shutdown.clone(),
            )));
        }
        info!("[lc-03] Bloom bits service started with {} workers", self.workers);
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled() && !self.handles.lock().is_empty()
    }

    /// Vectors of `bit` for `sections`. Waits while the queue is full.
    pub async fn lookup(&self, bit: u16, sections: Vec<u64>) -> Result<Vec<Vec<u8>>, OdrError> {
        let sender = self.sender.lock().clone().ok_or(OdrError::ServiceStopped)?;
        let (reply, answer) = oneshot::channel();
        sender
            .send(BloomTask {
                bit,
                sections,
                reply,
            })
            .await
            .map_err(|_| OdrError::ServiceStopped)?;
        answer.await.map_err(|_| OdrError::ServiceStopped)?
    }

    /// Stop the workers. Queued and in-flight lookups get `ServiceStopped`.
    pub async fn stop(&self) {
        self.sender.lock().take();
        self.shutdown.cancel();

        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            let _ = handle.await;
        }

        let mut receiver = self.receiver.lock().await;
        receiver.close();
        while let Ok(task) = receiver.try_recv() {
            let _ = task.reply.send(Err(OdrError::ServiceStopped));
        }
        info!("[lc-03] Bloom bits service stopped");
    }
}

async fn work(worker: usize, odr: Arc<Odr>, receiver: SharedReceiver, shutdown: CancellationToken) {
    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            task = async { receiver.lock().await.recv().await } => task,
        };
        let Some(task) = next else {
            break;
        };

        debug!(
            worker,
            bit = task.bit,
            "[lc-03] Bloom lookup over {} sections",
            task.sections.len()
        );
        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(OdrError::ServiceStopped),
            result = odr.bloom_bits(task.bit, &task.sections) => result,
        };
        let _ = task.reply.send(result);
    }
}
