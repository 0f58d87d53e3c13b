//! Topic registry
//!
//! The authoritative map from topic name to its producer and subscribers.
//! Every mutating method is called from the dispatcher only, so the registry
//! carries no lock.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tracing::{debug, warn};

use crate::broker::envelope::{Envelope, Outbound};
use crate::broker::topic::{Binding, ClientIdentity, Topic};
use crate::client::ConnectionId;
use crate::utils::error::RegistryConflict;

/// Outcome of an accepted registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// A new topic was created with this producer.
    Created,
    /// The producer was already bound; its binding now points at the
    /// connection it re-registered from.
    AlreadyBound,
    Subscribed,
}

/// Per-topic entry of a status snapshot. `producers` holds at most one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicStatus {
    pub producers: Vec<ClientIdentity>,
    pub subscribers: Vec<ClientIdentity>,
}

pub type Snapshot = BTreeMap<String, TopicStatus>;

#[derive(Debug, Default)]
pub struct Registry {
    topics: HashMap<String, Topic>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            topics: HashMap::new(),
        }
    }

    pub fn register_producer(
        &mut self,
        topic: &str,
        identity: &str,
        conn: ConnectionId,
    ) -> Result<Registration, RegistryConflict> {
        match self.topics.get_mut(topic) {
            None => {
                self.topics
                    .insert(topic.to_string(), Topic::new(topic, Binding::new(identity, conn)));
                Ok(Registration::Created)
            }
            Some(existing) if existing.producer.identity == identity => {
                existing.producer.conn = conn;
                Ok(Registration::AlreadyBound)
            }
            Some(existing) => Err(RegistryConflict::TopicExists {
                topic: topic.to_string(),
                producer: existing.producer.identity.clone(),
            }),
        }
    }

    pub fn register_subscriber(
        &mut self,
        topic: &str,
        identity: &str,
        conn: ConnectionId,
    ) -> Result<Registration, RegistryConflict> {
        let Some(existing) = self.topics.get_mut(topic) else {
            return Err(RegistryConflict::UnknownTopic {
                topic: topic.to_string(),
            });
        };
        if !existing.subscribe(identity, conn) {
            debug!(%topic, %identity, "duplicate subscription ignored");
            return Err(RegistryConflict::AlreadySubscribed {
                topic: topic.to_string(),
                identity: identity.to_string(),
            });
        }
        Ok(Registration::Subscribed)
    }

    /// Remove `topic` if `identity` on `conn` is its producer and hand back its
    /// former subscribers for the orphan scan.
    pub fn withdraw_producer(
        &mut self,
        topic: &str,
        identity: &str,
        conn: ConnectionId,
    ) -> Option<HashMap<ClientIdentity, ConnectionId>> {
        match self.topics.get(topic) {
            Some(existing) if existing.producer == Binding::new(identity, conn) => {
                self.topics.remove(topic).map(|removed| removed.subscribers)
            }
            Some(_) => {
                warn!(%topic, %identity, %conn, "withdraw ignored: not the producer of this topic");
                None
            }
            None => {
                warn!(%topic, %identity, "withdraw ignored: topic does not exist");
                None
            }
        }
    }

    pub fn withdraw_subscriber(&mut self, topic: &str, identity: &str) -> bool {
        let removed = self
            .topics
            .get_mut(topic)
            .and_then(|existing| existing.unsubscribe(identity))
            .is_some();
        if !removed {
            warn!(%topic, %identity, "withdraw ignored: not a subscriber of this topic");
        }
        removed
    }

    /// Address a copy of `envelope` to every subscriber of its topic. Nothing
    /// is produced for a missing topic or one without subscribers.
    pub fn publish(&self, envelope: &Envelope) -> Vec<Outbound> {
        let Some(topic) = self.topics.get(&envelope.topic) else {
            debug!(topic = %envelope.topic, "publish to unknown topic dropped");
            return Vec::new();
        };
        topic
            .subscribers
            .values()
            .map(|conn| Outbound {
                conn: *conn,
                envelope: envelope.clone(),
            })
            .collect()
    }

    pub fn producer_of(&self, topic: &str) -> Option<&Binding> {
        self.topics.get(topic).map(|t| &t.producer)
    }

    pub fn topic(&self, name: &str) -> Option<&Topic> {
        self.topics.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.topics.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.topics
            .values()
            .map(|topic| {
                let mut subscribers: Vec<ClientIdentity> =
                    topic.subscribers.keys().cloned().collect();
                subscribers.sort();
                (
                    topic.name.clone(),
                    TopicStatus {
                        producers: vec![topic.producer.identity.clone()],
                        subscribers,
                    },
                )
            })
            .collect()
    }

    /// Whether `identity` is a producer or a subscriber anywhere.
    pub fn is_identity_bound(&self, identity: &str) -> bool {
        self.topics
            .values()
            .any(|t| t.producer.identity == identity || t.has_subscriber(identity))
    }

    /// Whether `conn` holds any binding anywhere.
    pub fn is_conn_bound(&self, conn: ConnectionId) -> bool {
        self.topics.values().any(|t| t.references(conn))
    }

    pub(crate) fn topics_produced_by(&self, conn: ConnectionId) -> Vec<String> {
        self.topics
            .values()
            .filter(|t| t.is_produced_by(conn))
            .map(|t| t.name.clone())
            .collect()
    }

    pub(crate) fn remove(&mut self, name: &str) -> Option<Topic> {
        self.topics.remove(name)
    }

    pub(crate) fn topics_mut(&mut self) -> impl Iterator<Item = &mut Topic> {
        self.topics.values_mut()
    }
}
