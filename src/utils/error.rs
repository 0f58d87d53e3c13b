//! The `error` module defines the error types used within `topicd`.
//!
//! Client traffic never produces a fatal error: codec and validation failures
//! are logged and dropped, registry conflicts are answered with a `reject`
//! envelope, and send failures are treated as disconnects. Only `BrokerError`
//! reaches the process edge.

use std::io;

use thiserror::Error;

use crate::client::ConnectionId;

/// A frame that could not be turned into an `Envelope`.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("missing or mistyped field: {0}")]
    Fields(#[source] serde_json::Error),

    #[error("unknown message type '{0}'")]
    UnknownType(String),

    #[error("invalid mode '{mode}' for a {kind} message")]
    InvalidMode { kind: String, mode: String },

    #[error("timestamp '{0}' is not ISO-8601")]
    Timestamp(String),
}

/// A registration the registry refused. The `Display` text is what the
/// client sees as the `reason` of its `reject` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryConflict {
    #[error("topic exists")]
    TopicExists { topic: String, producer: String },

    #[error("topic does not exist")]
    UnknownTopic { topic: String },

    #[error("already subscribed")]
    AlreadySubscribed { topic: String, identity: String },
}

/// The writer side of a connection is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("connection {0} is gone")]
pub struct SendError(pub ConnectionId);

/// A publish from a connection that is not the topic's bound producer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{identity} is not the producer of topic '{topic}'")]
pub struct Unauthorized {
    pub identity: String,
    pub topic: String,
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("dispatcher is no longer running")]
    DispatcherGone,
}
