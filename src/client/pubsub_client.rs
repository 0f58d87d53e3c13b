//! Client representation
//!
//! `Client` is the dispatcher's handle on a live connection: a comparable id,
//! the peer address, the last identity seen on it, and the sending side of the
//! queue drained by the connection's writer task. The dispatcher never touches
//! the socket itself.

use std::fmt;
use std::net::SocketAddr;

use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::broker::topic::ClientIdentity;
use crate::utils::error::SendError;

/// Opaque identifier of a connection. Ids are random and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.0.simple().to_string();
        write!(f, "conn-{}", &hex[..8])
    }
}

/// What the writer task of a connection is asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// One encoded envelope; the transport adds its own framing.
    Frame(String),
    Close,
}

#[derive(Debug)]
pub struct Client {
    pub id: ConnectionId,
    pub addr: Option<SocketAddr>,
    pub identity: Option<ClientIdentity>,
    sender: UnboundedSender<Outgoing>,
}

impl Client {
    /// Create a client around the sending half of its writer queue.
    pub fn new(sender: UnboundedSender<Outgoing>, addr: Option<SocketAddr>) -> Self {
        Self {
            id: ConnectionId::new(),
            addr,
            identity: None,
            sender,
        }
    }

    /// Queue one frame for the writer task. Fails once the writer has stopped.
    pub fn send(&self, frame: String) -> Result<(), SendError> {
        self.sender
            .send(Outgoing::Frame(frame))
            .map_err(|_| SendError(self.id))
    }

    /// Ask the writer to close the connection. Safe on an already closed one.
    pub fn close(&self) {
        let _ = self.sender.send(Outgoing::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
