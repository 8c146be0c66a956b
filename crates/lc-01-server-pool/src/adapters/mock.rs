//! In-memory datagram channel and discovery feed for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use shared_types::NodeId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::domain::{capacity_reply, CandidateRecord, NegotiationError, ReplyBatch};
use crate::ports::{DatagramChannel, DiscoveryFeed};
use crate::service::CapacityNegotiator;

/// Inbound datagram: sender and payload.
pub type Datagram = (NodeId, Vec<u8>);

/// Datagram channel answering capacity queries from a script.
///
/// Unscripted nodes swallow the query, as an unreachable node would.
pub struct ScriptedDatagramChannel {
    script: Mutex<HashMap<NodeId, Option<Vec<u64>>>>,
    sent: Mutex<Vec<Datagram>>,
    replies: mpsc::UnboundedSender<Datagram>,
    fail: AtomicBool,
}

impl ScriptedDatagramChannel {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Datagram>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Arc::new(Self {
            script: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            replies: tx,
            fail: AtomicBool::new(false),
        });
        (channel, rx)
    }

    /// Reply to `node` with `capacities`; `None` replies without a
    /// capacity result.
    pub fn script(&self, node: NodeId, capacities: Option<Vec<u64>>) {
        self.script.lock().insert(node, capacities);
    }

    /// Stop answering `node`.
    pub fn unscript(&self, node: &NodeId) {
        self.script.lock().remove(node);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn sent_to(&self, node: &NodeId) -> usize {
        self.sent.lock().iter().filter(|(to, _)| to == node).count()
    }

    pub fn last_sent(&self) -> Option<Datagram> {
        self.sent.lock().last().cloned()
    }
}

impl DatagramChannel for ScriptedDatagramChannel {
    fn send(&self, to: &CandidateRecord, payload: Vec<u8>) -> Result<(), NegotiationError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NegotiationError::Transport("scripted failure".into()));
        }
        self.sent.lock().push((to.id, payload.clone()));

        let scripted = self.script.lock().get(&to.id).cloned();
        let reply = match scripted {
            None => return Ok(()),
            Some(Some(capacities)) => capacity_reply(&payload, &capacities)?,
            Some(None) => ReplyBatch::for_request(&payload).encode()?,
        };
        let _ = self.replies.send((to.id, reply));
        Ok(())
    }
}

/// Forward inbound datagrams to `negotiator` until the channel closes.
pub fn spawn_reply_pump(
    negotiator: Arc<CapacityNegotiator>,
    mut rx: mpsc::UnboundedReceiver<Datagram>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some((from, payload)) = rx.recv().await {
            negotiator.handle_reply(from, &payload);
        }
    })
}

/// Discovery feed over a fixed list.
#[derive(Clone, Debug, Default)]
pub struct VecDiscoveryFeed {
    records: Vec<CandidateRecord>,
    position: usize,
}

impl VecDiscoveryFeed {
    pub fn new(records: Vec<CandidateRecord>) -> Self {
        Self {
            records,
            position: 0,
        }
    }
}

#[async_trait]
impl DiscoveryFeed for VecDiscoveryFeed {
    async fn next(&mut self) -> Option<CandidateRecord> {
        let record = self.records.get(self.position).cloned();
        if record.is_some() {
            self.position += 1;
        }
        record
    }

    fn restart(&mut self) {
        self.position = 0;
    }

    fn name(&self) -> &str {
        "static"
    }
}
