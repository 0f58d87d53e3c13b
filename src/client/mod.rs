//! The `client` module defines the representation of a connected client.
//!
//! It provides the `Client` handle the dispatcher keeps for each connection,
//! the `ConnectionId` used to reference it from the topic registry, and the
//! `Outgoing` commands understood by the transport writer tasks. `session` is
//! the other side of the wire: the smoke-test client behind `topicd client`.

pub mod pubsub_client;
pub mod session;
pub use pubsub_client::{Client, ConnectionId, Outgoing};
