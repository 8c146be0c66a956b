//! In-memory peer transport and a scripted server for tests.

use shared_types::{LesMessage, NodeId};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::domain::TransportError;
use crate::ports::PeerTransport;
use crate::service::Distributor;

/// Transport that forwards requests into a channel.
pub struct ChannelTransport {
    outbox: mpsc::UnboundedSender<LesMessage>,
    sent: AtomicUsize,
    closed: AtomicBool,
}

impl ChannelTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<LesMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            outbox: tx,
            sent: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        });
        (transport, rx)
    }

    /// Make every further send fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn sent_count(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }
}

impl PeerTransport for ChannelTransport {
    fn send(&self, message: LesMessage) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.sent.fetch_add(1, Ordering::SeqCst);
        self.outbox.send(message).map_err(|_| TransportError::Closed)
    }
}

/// What a scripted server does with one request.
#[derive(Clone, Debug)]
pub enum Reply {
    /// Deliver `response` after `after`. Its req id is overwritten.
    Answer {
        after: Duration,
        response: LesMessage,
    },
    /// Never answer.
    Ignore,
}

/// Serve requests from `inbox` as `peer`, delivering replies into
/// `distributor`.
pub fn spawn_responder<F>(
    distributor: Arc<Distributor>,
    peer: NodeId,
    mut inbox: mpsc::UnboundedReceiver<LesMessage>,
    handler: F,
) -> JoinHandle<()>
where
    F: Fn(&LesMessage) -> Reply + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(request) = inbox.recv().await {
            if let Reply::Answer {
                after,
                mut response,
            } = handler(&request)
            {
                response.set_req_id(request.req_id());
                let distributor = distributor.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    distributor.deliver(&peer, response);
                });
            }
        }
    })
}
