//! Connection registry: one handle per accepted socket.
//!
//! The state task never writes to a socket directly. Each connection owns
//! a writer task draining an unbounded queue; the registry holds the
//! sending ends. Sends are best-effort: a full teardown or broken pipe
//! just drops the frame, and the connection's reader path reaps the peer.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use tokio::sync::mpsc;

use crate::proto::Frame;

/// Identifier for one accepted connection, unique for the server's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Per-connection bookkeeping.
pub struct ConnHandle {
    tx: mpsc::UnboundedSender<Frame>,
    /// Peer socket address.
    pub addr: SocketAddr,
    /// Set once the connection sends a server-to-server frame; peers are
    /// excluded from the `/info` user count.
    pub is_server_peer: bool,
}

/// All live connections.
#[derive(Default)]
pub struct Registry {
    conns: HashMap<ConnId, ConnHandle>,
    next_id: u64,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and hand out its id.
    pub fn register(
        &mut self,
        addr: SocketAddr,
        tx: mpsc::UnboundedSender<Frame>,
        is_server_peer: bool,
    ) -> ConnId {
        let id = ConnId(self.next_id);
        self.next_id += 1;
        self.conns.insert(
            id,
            ConnHandle {
                tx,
                addr,
                is_server_peer,
            },
        );
        id
    }

    /// Drop a connection's handle, closing its outgoing queue.
    pub fn remove(&mut self, id: ConnId) -> Option<ConnHandle> {
        self.conns.remove(&id)
    }

    /// Check whether a connection is still registered.
    pub fn contains(&self, id: ConnId) -> bool {
        self.conns.contains_key(&id)
    }

    /// Look up a connection's handle.
    pub fn get(&self, id: ConnId) -> Option<&ConnHandle> {
        self.conns.get(&id)
    }

    /// Queue a frame for a connection. Best-effort.
    pub fn send(&self, id: ConnId, frame: Frame) {
        if let Some(conn) = self.conns.get(&id) {
            let _ = conn.tx.send(frame);
        }
    }

    /// Queue a server-scope text reply for a connection.
    pub fn reply(&self, id: ConnId, text: impl Into<String>) {
        self.send(id, Frame::server_reply(text));
    }

    /// Mark a connection as a server peer.
    pub fn mark_server_peer(&mut self, id: ConnId) {
        if let Some(conn) = self.conns.get_mut(&id) {
            conn.is_server_peer = true;
        }
    }

    /// Check whether a connection is a server peer.
    pub fn is_server_peer(&self, id: ConnId) -> bool {
        self.conns.get(&id).is_some_and(|c| c.is_server_peer)
    }

    /// Number of connected users, excluding server peers.
    pub fn user_count(&self) -> usize {
        self.conns.values().filter(|c| !c.is_server_peer).count()
    }

    /// Total number of live connections.
    pub fn len(&self) -> usize {
        self.conns.len()
    }

    /// Check whether no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Build a registry with `n` fake connections and their receive ends.
    pub fn registry_with(n: usize) -> (Registry, Vec<(ConnId, mpsc::UnboundedReceiver<Frame>)>) {
        let mut registry = Registry::new();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let mut ends = Vec::new();
        for _ in 0..n {
            let (tx, rx) = mpsc::unbounded_channel();
            let id = registry.register(addr, tx, false);
            ends.push((id, rx));
        }
        (registry, ends)
    }

    /// Drain everything currently queued for a connection.
    pub fn drain(rx: &mut mpsc::UnboundedReceiver<Frame>) -> Vec<Frame> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(frame);
        }
        out
    }
}
