use stakeroom_protocol::ConnectionId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

use crate::registry::OutboundSender;

/// Socket events delivered to the room actor.
#[derive(Debug)]
pub enum Message {
    Opened {
        id: ConnectionId,
        sender: OutboundSender,
    },
    Closed {
        id: ConnectionId,
    },
    Text {
        id: ConnectionId,
        text: String,
    },
    Pong {
        id: ConnectionId,
    },
}

/// Handle socket tasks use to reach the room actor.
#[derive(Clone, Debug)]
pub struct Mailbox {
    sender: mpsc::Sender<Message>,
    next_id: Arc<AtomicU64>,
}

impl Mailbox {
    pub(super) fn new(sender: mpsc::Sender<Message>) -> Self {
        Self {
            sender,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Allocate an id for a newly accepted socket.
    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub async fn opened(&self, id: ConnectionId, sender: OutboundSender) {
        if self
            .sender
            .send(Message::Opened { id, sender })
            .await
            .is_err()
        {
            warn!(conn = %id, "room mailbox closed; open dropped");
        }
    }

    pub async fn closed(&self, id: ConnectionId) {
        if self.sender.send(Message::Closed { id }).await.is_err() {
            warn!(conn = %id, "room mailbox closed; close dropped");
        }
    }

    pub async fn text(&self, id: ConnectionId, text: String) {
        if self.sender.send(Message::Text { id, text }).await.is_err() {
            warn!(conn = %id, "room mailbox closed; frame dropped");
        }
    }

    pub async fn pong(&self, id: ConnectionId) {
        if self.sender.send(Message::Pong { id }).await.is_err() {
            warn!(conn = %id, "room mailbox closed; pong dropped");
        }
    }
}
