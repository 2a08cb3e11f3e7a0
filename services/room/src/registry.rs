use stakeroom_protocol::{ConnectionId, UserId};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Frames queued for a connection's writer task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    Text(Arc<str>),
    Ping,
    Close,
}

pub type OutboundSender = mpsc::Sender<Outbound>;
pub type OutboundReceiver = mpsc::Receiver<Outbound>;

pub fn outbound_channel(capacity: usize) -> (OutboundSender, OutboundReceiver) {
    mpsc::channel(capacity)
}

#[derive(Debug, PartialEq, Eq)]
pub enum EnqueueError {
    Closed,
    Full,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BindError {
    #[error("connection is not registered")]
    UnknownConnection,
    #[error("connection already bound to {0}")]
    AlreadyBound(UserId),
}

#[derive(Debug)]
pub struct Connection {
    user: Option<UserId>,
    sender: OutboundSender,
    alive: bool,
}

impl Connection {
    pub fn user(&self) -> Option<&UserId> {
        self.user.as_ref()
    }

    /// A connection is open while its writer task still holds the receiver.
    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub(crate) fn set_alive(&mut self, alive: bool) {
        self.alive = alive;
    }

    pub fn enqueue(&self, frame: Outbound) -> Result<(), EnqueueError> {
        match self.sender.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(EnqueueError::Full),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(EnqueueError::Closed),
        }
    }
}

/// Live sockets and the identity each one joined as.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: BTreeMap<ConnectionId, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly accepted socket. Returns false if the id is taken.
    pub fn register(&mut self, id: ConnectionId, sender: OutboundSender) -> bool {
        if self.connections.contains_key(&id) {
            return false;
        }
        self.connections.insert(
            id,
            Connection {
                user: None,
                sender,
                alive: true,
            },
        );
        true
    }

    /// Associate `user` with the connection.
    ///
    /// Binding the same user again is accepted and returns `Ok(false)`; a
    /// connection never switches to a different user.
    pub fn bind(&mut self, id: ConnectionId, user: UserId) -> Result<bool, BindError> {
        let connection = self
            .connections
            .get_mut(&id)
            .ok_or(BindError::UnknownConnection)?;
        match &connection.user {
            Some(existing) if *existing == user => Ok(false),
            Some(existing) => Err(BindError::AlreadyBound(existing.clone())),
            None => {
                connection.user = Some(user);
                Ok(true)
            }
        }
    }

    pub fn resolve(&self, id: ConnectionId) -> Option<&UserId> {
        self.connections.get(&id).and_then(Connection::user)
    }

    /// Forget a connection. Safe to call more than once.
    pub fn unbind(&mut self, id: ConnectionId) -> Option<Connection> {
        self.connections.remove(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    /// Record a probe response. Returns false for unknown connections.
    pub fn mark_alive(&mut self, id: ConnectionId) -> bool {
        match self.connections.get_mut(&id) {
            Some(connection) => {
                connection.set_alive(true);
                true
            }
            None => false,
        }
    }

    /// Visit every connection whose writer is still running.
    pub fn for_each_live(&self, mut f: impl FnMut(ConnectionId, &Connection)) {
        for (id, connection) in &self.connections {
            if connection.is_open() {
                f(*id, connection);
            }
        }
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (ConnectionId, &mut Connection)> {
        self.connections
            .iter_mut()
            .map(|(id, connection)| (*id, connection))
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_bind_resolve() {
        let mut registry = ConnectionRegistry::new();
        let id = ConnectionId::new(1);
        let (tx, _rx) = outbound_channel(4);

        assert!(registry.register(id, tx.clone()));
        assert!(!registry.register(id, tx));
        assert_eq!(registry.resolve(id), None);

        assert_eq!(registry.bind(id, UserId::from("alice")), Ok(true));
        assert_eq!(registry.resolve(id), Some(&UserId::from("alice")));
        assert_eq!(registry.bind(id, UserId::from("alice")), Ok(false));
        assert_eq!(
            registry.bind(id, UserId::from("bob")),
            Err(BindError::AlreadyBound(UserId::from("alice")))
        );
        assert_eq!(registry.resolve(id), Some(&UserId::from("alice")));
    }

    #[test]
    fn test_bind_unknown_connection() {
        let mut registry = ConnectionRegistry::new();
        assert_eq!(
            registry.bind(ConnectionId::new(9), UserId::from("alice")),
            Err(BindError::UnknownConnection)
        );
    }

    #[test]
    fn test_unbind_is_idempotent() {
        let mut registry = ConnectionRegistry::new();
        let id = ConnectionId::new(1);
        let (tx, _rx) = outbound_channel(4);
        registry.register(id, tx);
        registry.bind(id, UserId::from("alice")).unwrap();

        assert!(registry.unbind(id).is_some());
        assert!(registry.unbind(id).is_none());
        assert_eq!(registry.resolve(id), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_for_each_live_skips_closed_writers() {
        let mut registry = ConnectionRegistry::new();
        let (open_tx, _open_rx) = outbound_channel(4);
        let (closed_tx, closed_rx) = outbound_channel(4);
        registry.register(ConnectionId::new(1), open_tx);
        registry.register(ConnectionId::new(2), closed_tx);
        drop(closed_rx);

        let mut seen = Vec::new();
        registry.for_each_live(|id, _| seen.push(id));
        assert_eq!(seen, vec![ConnectionId::new(1)]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_enqueue_reports_full_and_closed() {
        let mut registry = ConnectionRegistry::new();
        let id = ConnectionId::new(1);
        let (tx, rx) = outbound_channel(1);
        registry.register(id, tx);
        let connection = registry.get(id).unwrap();

        assert_eq!(connection.enqueue(Outbound::Ping), Ok(()));
        assert_eq!(connection.enqueue(Outbound::Ping), Err(EnqueueError::Full));
        drop(rx);
        assert_eq!(connection.enqueue(Outbound::Ping), Err(EnqueueError::Closed));
    }
}
