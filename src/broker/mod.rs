//! topicd broker
//!
//! The broker module contains the topic registry and the single-writer
//! dispatcher that owns it:
//!
//! - `envelope`: wire message type and its codec
//! - `topic`: one topic with its producer binding and subscribers
//! - `registry`: the topic map and its registration rules
//! - `reconciler`: the disconnect cascade and orphan scan
//! - `engine`: the dispatcher loop (`Broker`) and the `BrokerHandle` used by
//!   transports and the console

pub mod engine;
pub mod envelope;
pub mod reconciler;
pub mod registry;
pub mod topic;

pub use engine::{Broker, BrokerHandle, ClientInfo, Event};
pub use envelope::{Envelope, MessageType, Mode, Request};
pub use registry::{Registry, Snapshot, TopicStatus};
