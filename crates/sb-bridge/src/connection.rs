use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use sb_core::types::ClientId;
use tracing::debug;

use crate::protocol::ServerMessage;

/// Connection lifecycle. There is no reconnect state: a client that comes
/// back opens a new connection with a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Open,
            _ => ConnectionState::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Connecting => 0,
            ConnectionState::Open => 1,
            ConnectionState::Closed => 2,
        }
    }
}

/// Sending half of one client connection.
///
/// Messages go into an unbounded queue drained by the socket writer, so a
/// slow client never blocks the session pumps.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: ClientId,
    tx: flume::Sender<ServerMessage>,
    state: Arc<AtomicU8>,
}

impl ClientHandle {
    pub fn new() -> (Self, flume::Receiver<ServerMessage>) {
        let (tx, rx) = flume::unbounded();
        (
            Self {
                id: ClientId::new(),
                tx,
                state: Arc::new(AtomicU8::new(ConnectionState::Connecting.as_u8())),
            },
            rx,
        )
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// Queue a message. Returns `false` if the connection is closed or its
    /// receiver is gone.
    pub fn send(&self, msg: ServerMessage) -> bool {
        if self.is_closed() {
            debug!(client_id = %self.id, kind = msg.kind(), "dropping message for closed connection");
            return false;
        }
        self.tx.send(msg).is_ok()
    }
}

/// Live connections by id. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct Connections {
    inner: Arc<DashMap<ClientId, ClientHandle>>,
}

impl Connections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: ClientHandle) {
        self.inner.insert(handle.id(), handle);
    }

    pub fn remove(&self, id: ClientId) -> Option<ClientHandle> {
        self.inner.remove(&id).map(|(_, h)| h)
    }

    pub fn get(&self, id: ClientId) -> Option<ClientHandle> {
        self.inner.get(&id).map(|h| h.clone())
    }

    /// Send to one connection. `false` if it is unknown or closed.
    pub fn send_to(&self, id: ClientId, msg: ServerMessage) -> bool {
        match self.get(id) {
            Some(handle) => handle.send(msg),
            None => false,
        }
    }

    pub fn ids(&self) -> Vec<ClientId> {
        self.inner.iter().map(|e| *e.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ping() -> ServerMessage {
        ServerMessage::AgentOutput {
            agent_id: "a".into(),
            data: "x".into(),
        }
    }

    #[test]
    fn closed_handle_refuses_messages() {
        let (handle, rx) = ClientHandle::new();
        handle.set_state(ConnectionState::Open);
        assert!(handle.send(ping()));
        handle.set_state(ConnectionState::Closed);
        assert!(!handle.send(ping()));
        assert_eq!(rx.len(), 1);
    }

    #[test]
    fn send_fails_once_receiver_dropped() {
        let (handle, rx) = ClientHandle::new();
        drop(rx);
        assert!(!handle.send(ping()));
    }

    #[test]
    fn connections_track_by_id() {
        let conns = Connections::new();
        let (handle, _rx) = ClientHandle::new();
        let id = handle.id();
        conns.insert(handle);
        assert_eq!(conns.len(), 1);
        assert!(conns.send_to(id, ping()));
        assert!(conns.remove(id).is_some());
        assert!(!conns.send_to(id, ping()));
    }
}
