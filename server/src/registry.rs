//! Live connections and their outbound queues.

use dicearena_types::{api::Frame, dice::ConnectionId};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard,
    },
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Something for a connection's writer task to put on the wire.
#[derive(Clone, Debug, PartialEq)]
pub enum Outbound {
    Text(String),
    Ping,
}

pub type Outbox = mpsc::UnboundedSender<Outbound>;

/// Every connected socket, whether or not it has joined a match.
#[derive(Default)]
pub struct Registry {
    next: AtomicU64,
    connections: Mutex<HashMap<ConnectionId, Outbox>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn connections(&self) -> MutexGuard<'_, HashMap<ConnectionId, Outbox>> {
        match self.connections.lock() {
            Ok(connections) => connections,
            Err(poisoned) => {
                warn!("connection registry lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Assign a fresh id to a connection's outbound queue.
    pub fn register(&self, outbox: Outbox) -> ConnectionId {
        let conn = ConnectionId(self.next.fetch_add(1, Ordering::Relaxed) + 1);
        self.connections().insert(conn, outbox);
        debug!(%conn, "connection registered");
        conn
    }

    pub fn remove(&self, conn: ConnectionId) -> bool {
        let removed = self.connections().remove(&conn).is_some();
        if removed {
            debug!(%conn, "connection removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.connections().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue a frame for one connection. Returns false if it is gone.
    pub fn send(&self, conn: ConnectionId, frame: &Frame) -> bool {
        let Some(outbox) = self.connections().get(&conn).cloned() else {
            debug!(%conn, "dropping frame for unknown connection");
            return false;
        };
        outbox.send(Outbound::Text(frame.encode())).is_ok()
    }

    /// Queue a frame for every connection; returns how many accepted it.
    pub fn broadcast(&self, frame: &Frame) -> usize {
        let text = frame.encode();
        let outboxes: Vec<Outbox> = self.connections().values().cloned().collect();
        outboxes
            .iter()
            .filter(|outbox| outbox.send(Outbound::Text(text.clone())).is_ok())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_assigns_distinct_ids() {
        let registry = Registry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let first = registry.register(tx.clone());
        let second = registry.register(tx);
        assert_ne!(first, second);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_send_targets_one_connection() {
        let registry = Registry::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let first = registry.register(tx1);
        registry.register(tx2);

        assert!(registry.send(first, &Frame::error("nope")));
        assert_eq!(
            rx1.try_recv().unwrap(),
            Outbound::Text(Frame::error("nope").encode())
        );
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_skips_closed_queues() {
        let registry = Registry::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, rx2) = mpsc::unbounded_channel();
        registry.register(tx1);
        registry.register(tx2);
        drop(rx2);

        let frame = Frame::LobbyList { lobbies: vec![] };
        assert_eq!(registry.broadcast(&frame), 1);
        assert_eq!(rx1.try_recv().unwrap(), Outbound::Text(frame.encode()));
    }

    #[test]
    fn test_removed_connection_gets_nothing() {
        let registry = Registry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = registry.register(tx);
        assert!(registry.remove(conn));
        assert!(!registry.remove(conn));
        assert!(registry.is_empty());
        assert!(!registry.send(conn, &Frame::error("late")));
        assert!(rx.try_recv().is_err());
    }
}
