use stakeroom_protocol::ConnectionId;

use crate::registry::{ConnectionRegistry, Outbound};

/// Outcome of one probe pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Sweep {
    pub probed: usize,
    pub evicted: Vec<ConnectionId>,
}

/// Evict connections that ignored the previous probe and ping the rest.
///
/// A connection must answer (see [`ConnectionRegistry::mark_alive`]) before
/// the next sweep or it is closed and removed.
pub fn sweep(registry: &mut ConnectionRegistry) -> Sweep {
    let mut sweep = Sweep::default();
    for (id, connection) in registry.iter_mut() {
        if !connection.is_alive() {
            sweep.evicted.push(id);
            continue;
        }
        connection.set_alive(false);
        // A full or closed queue still counts as unconfirmed.
        if connection.enqueue(Outbound::Ping).is_ok() {
            sweep.probed += 1;
        }
    }

    for id in &sweep.evicted {
        if let Some(connection) = registry.unbind(*id) {
            let _ = connection.enqueue(Outbound::Close);
        }
    }
    sweep
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::outbound_channel;

    #[test]
    fn test_unresponsive_connection_is_evicted_on_second_sweep() {
        let mut registry = ConnectionRegistry::new();
        let quiet = ConnectionId::new(1);
        let chatty = ConnectionId::new(2);
        let (quiet_tx, mut quiet_rx) = outbound_channel(4);
        let (chatty_tx, mut chatty_rx) = outbound_channel(4);
        registry.register(quiet, quiet_tx);
        registry.register(chatty, chatty_tx);

        let first = sweep(&mut registry);
        assert_eq!(first.probed, 2);
        assert!(first.evicted.is_empty());
        assert_eq!(quiet_rx.try_recv().unwrap(), Outbound::Ping);
        assert_eq!(chatty_rx.try_recv().unwrap(), Outbound::Ping);

        assert!(registry.mark_alive(chatty));

        let second = sweep(&mut registry);
        assert_eq!(second.evicted, vec![quiet]);
        assert_eq!(second.probed, 1);
        assert_eq!(quiet_rx.try_recv().unwrap(), Outbound::Close);
        assert_eq!(chatty_rx.try_recv().unwrap(), Outbound::Ping);
        assert!(registry.get(quiet).is_none());
        assert!(registry.get(chatty).is_some());
    }

    #[test]
    fn test_closed_writer_is_evicted() {
        let mut registry = ConnectionRegistry::new();
        let id = ConnectionId::new(1);
        let (tx, rx) = outbound_channel(4);
        registry.register(id, tx);
        drop(rx);

        assert_eq!(sweep(&mut registry).probed, 0);
        assert_eq!(sweep(&mut registry).evicted, vec![id]);
        assert!(registry.is_empty());
    }
}
