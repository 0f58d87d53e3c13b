//! Topic management
//!
//! A `Topic` always has exactly one producer: it is created by a producer
//! registration and removed from the registry together with its producer, so
//! the producer slot is not optional. Subscribers are keyed by identity, which
//! keeps subscriber identities unique within a topic.
//!
//! Concurrency note: topics are only ever touched by the dispatcher.

use std::collections::HashMap;

use crate::client::ConnectionId;

pub type ClientIdentity = String;

/// An identity bound to the connection it registered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub identity: ClientIdentity,
    pub conn: ConnectionId,
}

impl Binding {
    pub fn new(identity: &str, conn: ConnectionId) -> Self {
        Self {
            identity: identity.to_string(),
            conn,
        }
    }
}

#[derive(Debug)]
pub struct Topic {
    pub name: String,
    pub producer: Binding,
    pub subscribers: HashMap<ClientIdentity, ConnectionId>,
}

impl Topic {
    /// Create a new topic owned by `producer`.
    pub fn new(name: &str, producer: Binding) -> Self {
        Self {
            name: name.to_string(),
            producer,
            subscribers: HashMap::new(),
        }
    }

    /// Add a subscriber. Returns `false` if the identity is already subscribed.
    pub fn subscribe(&mut self, identity: &str, conn: ConnectionId) -> bool {
        if self.subscribers.contains_key(identity) {
            return false;
        }
        self.subscribers.insert(identity.to_string(), conn);
        true
    }

    /// Remove a subscriber by identity.
    pub fn unsubscribe(&mut self, identity: &str) -> Option<ConnectionId> {
        self.subscribers.remove(identity)
    }

    /// Remove every subscription held by `conn`, whatever identity it used.
    pub fn unsubscribe_conn(&mut self, conn: ConnectionId) -> Vec<ClientIdentity> {
        let identities: Vec<ClientIdentity> = self
            .subscribers
            .iter()
            .filter(|(_, c)| **c == conn)
            .map(|(identity, _)| identity.clone())
            .collect();
        for identity in &identities {
            self.subscribers.remove(identity);
        }
        identities
    }

    pub fn is_produced_by(&self, conn: ConnectionId) -> bool {
        self.producer.conn == conn
    }

    pub fn has_subscriber(&self, identity: &str) -> bool {
        self.subscribers.contains_key(identity)
    }

    /// Whether `conn` holds any binding in this topic.
    pub fn references(&self, conn: ConnectionId) -> bool {
        self.producer.conn == conn || self.subscribers.values().any(|c| *c == conn)
    }
}
