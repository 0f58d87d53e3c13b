//! Disconnect reconciliation
//!
//! When a connection goes away every topic it produced is withdrawn and every
//! subscription it held is dropped. Subscribers of the withdrawn topics become
//! close candidates; a candidate is only reclaimed when neither its identity
//! nor its connection is still bound anywhere in the registry.
//!
//! The scan is O(topics x subscribers) per disconnect.

use std::collections::HashMap;

use crate::broker::registry::Registry;
use crate::broker::topic::ClientIdentity;
use crate::client::ConnectionId;

/// What a disconnect did to the registry.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Cascade {
    /// Topics removed because the connection was their producer.
    pub withdrawn: Vec<String>,
    /// Topics the connection was unsubscribed from.
    pub unsubscribed: Vec<String>,
    /// Connections left without any binding, sorted.
    pub orphans: Vec<ConnectionId>,
}

pub fn reconcile(registry: &mut Registry, conn: ConnectionId) -> Cascade {
    let mut cascade = Cascade::default();
    let mut candidates: HashMap<ClientIdentity, ConnectionId> = HashMap::new();

    for name in registry.topics_produced_by(conn) {
        if let Some(topic) = registry.remove(&name) {
            candidates.extend(topic.subscribers);
            cascade.withdrawn.push(name);
        }
    }

    for topic in registry.topics_mut() {
        if !topic.unsubscribe_conn(conn).is_empty() {
            cascade.unsubscribed.push(topic.name.clone());
        }
    }

    cascade.withdrawn.sort();
    cascade.unsubscribed.sort();
    cascade.orphans = orphans(registry, candidates);
    cascade
}

/// Connections among `candidates` that the registry no longer references.
pub fn orphans(
    registry: &Registry,
    candidates: HashMap<ClientIdentity, ConnectionId>,
) -> Vec<ConnectionId> {
    let mut orphans: Vec<ConnectionId> = candidates
        .into_iter()
        .filter(|(identity, conn)| {
            !registry.is_identity_bound(identity) && !registry.is_conn_bound(*conn)
        })
        .map(|(_, conn)| conn)
        .collect();
    orphans.sort();
    orphans.dedup();
    orphans
}
