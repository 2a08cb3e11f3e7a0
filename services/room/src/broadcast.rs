//! Fan-out of server messages to open connections.
//!
//! A message is serialized once and the shared text is queued on every open
//! connection. Closed connections are skipped silently; reaping them is the
//! liveness monitor's job.

use stakeroom_protocol::{ConnectionId, ServerMessage};
use std::sync::Arc;
use tracing::{error, warn};

use crate::registry::{Connection, ConnectionRegistry, EnqueueError, Outbound};

fn encode(message: &ServerMessage) -> Option<Arc<str>> {
    match message.encode() {
        Ok(text) => Some(Arc::from(text)),
        Err(err) => {
            error!(?err, ?message, "failed to encode server message");
            None
        }
    }
}

fn deliver(id: ConnectionId, connection: &Connection, text: &Arc<str>) -> bool {
    match connection.enqueue(Outbound::Text(Arc::clone(text))) {
        Ok(()) => true,
        Err(EnqueueError::Full) => {
            warn!(conn = %id, "outbound queue full; dropping message");
            false
        }
        Err(EnqueueError::Closed) => false,
    }
}

/// Send `message` to every open connection. Returns how many accepted it.
pub fn broadcast(registry: &ConnectionRegistry, message: &ServerMessage) -> usize {
    let Some(text) = encode(message) else {
        return 0;
    };
    let mut delivered = 0;
    registry.for_each_live(|id, connection| {
        if deliver(id, connection, &text) {
            delivered += 1;
        }
    });
    delivered
}

/// Send `message` to one connection.
pub fn send_to(registry: &ConnectionRegistry, id: ConnectionId, message: &ServerMessage) -> bool {
    let Some(connection) = registry.get(id) else {
        return false;
    };
    send(id, connection, message)
}

pub(crate) fn send(id: ConnectionId, connection: &Connection, message: &ServerMessage) -> bool {
    match encode(message) {
        Some(text) => deliver(id, connection, &text),
        None => false,
    }
}
