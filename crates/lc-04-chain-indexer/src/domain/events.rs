//! Chain head notifications.

use shared_types::BlockHeader;
use tokio::sync::broadcast;

/// Change of the local canonical chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChainEvent {
    /// `header` extends the chain.
    Head(BlockHeader),
    /// Blocks above `common_ancestor` were replaced; `head` is the new tip.
    Reorg {
        common_ancestor: u64,
        head: BlockHeader,
    },
}

impl ChainEvent {
    pub fn head(&self) -> &BlockHeader {
        match self {
            ChainEvent::Head(head) | ChainEvent::Reorg { head, .. } => head,
        }
    }
}

/// Broadcast bus for [`ChainEvent`]s.
#[derive(Clone, Debug)]
pub struct ChainEventBus {
    sender: broadcast::Sender<ChainEvent>,
}

impl ChainEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish to current subscribers. Returns how many received it.
    pub fn publish(&self, event: ChainEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChainEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
