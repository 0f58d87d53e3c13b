//! Envelope definitions and codec
//!
//! `Envelope` is the only message shape on the wire. Every frame carries the
//! same six fields:
//!
//! - `type`: `register`, `withdraw`, `message` or `status` from clients;
//!   `reject` and `status` from the broker
//! - `id`: the client identity (the server id on `reject`)
//! - `topic`: topic name used for routing
//! - `mode`: `producer` or `subscriber`; only meaningful for `register` and
//!   `withdraw`, the broker sends `""`
//! - `timestamp`: ISO-8601 text, forwarded verbatim
//! - `payload`: arbitrary JSON, forwarded verbatim

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::broker::registry::Snapshot;
use crate::broker::topic::ClientIdentity;
use crate::client::ConnectionId;
use crate::utils::error::{CodecError, RegistryConflict, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Register,
    Withdraw,
    Publish,
    Status,
    Reject,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Register => "register",
            MessageType::Withdraw => "withdraw",
            MessageType::Publish => "message",
            MessageType::Status => "status",
            MessageType::Reject => "reject",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Producer,
    Subscriber,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Producer => "producer",
            Mode::Subscriber => "subscriber",
        }
    }

    fn from_wire(raw: &str) -> Option<Self> {
        match raw {
            "producer" => Some(Mode::Producer),
            "subscriber" => Some(Mode::Subscriber),
            _ => None,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a validated client envelope asks for. Registration and withdrawal
/// always carry their mode; `reject` is never a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Register(Mode),
    Withdraw(Mode),
    Publish,
    Status,
}

impl Request {
    pub fn kind(self) -> MessageType {
        match self {
            Request::Register(_) => MessageType::Register,
            Request::Withdraw(_) => MessageType::Withdraw,
            Request::Publish => MessageType::Publish,
            Request::Status => MessageType::Status,
        }
    }

    fn mode(self) -> Option<Mode> {
        match self {
            Request::Register(mode) | Request::Withdraw(mode) => Some(mode),
            Request::Publish | Request::Status => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub kind: MessageType,
    pub id: ClientIdentity,
    pub topic: String,
    pub mode: Option<Mode>,
    pub timestamp: String,
    pub payload: Value,
}

/// An envelope addressed to one connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub conn: ConnectionId,
    pub envelope: Envelope,
}

#[derive(Deserialize)]
struct InboundFields {
    #[serde(rename = "type")]
    kind: String,
    id: String,
    topic: String,
    mode: String,
    timestamp: String,
    payload: Value,
}

#[derive(Serialize)]
struct OutboundFields<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    id: &'a str,
    topic: &'a str,
    mode: &'a str,
    timestamp: &'a str,
    payload: &'a Value,
}

/// Decode and validate one frame.
pub fn parse(raw: &[u8]) -> Result<(Request, Envelope), CodecError> {
    let value: Value = serde_json::from_slice(raw)?;
    if !value.is_object() {
        return Err(CodecError::NotAnObject);
    }

    let fields: InboundFields = serde_json::from_value(value).map_err(ValidationError::Fields)?;

    let request = match fields.kind.as_str() {
        "register" => Request::Register(required_mode(&fields)?),
        "withdraw" => Request::Withdraw(required_mode(&fields)?),
        "message" => Request::Publish,
        "status" => Request::Status,
        other => return Err(ValidationError::UnknownType(other.to_string()).into()),
    };
    let mode = request.mode().or_else(|| Mode::from_wire(&fields.mode));

    if !is_iso8601(&fields.timestamp) {
        return Err(ValidationError::Timestamp(fields.timestamp).into());
    }

    let envelope = Envelope {
        kind: request.kind(),
        id: fields.id,
        topic: fields.topic,
        mode,
        timestamp: fields.timestamp,
        payload: fields.payload,
    };
    Ok((request, envelope))
}

fn required_mode(fields: &InboundFields) -> Result<Mode, ValidationError> {
    Mode::from_wire(&fields.mode).ok_or_else(|| ValidationError::InvalidMode {
        kind: fields.kind.clone(),
        mode: fields.mode.clone(),
    })
}

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"];
const OFFSET_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f%:z", "%Y-%m-%dT%H:%M%:z"];

/// The ISO-8601 subset Python's `datetime.fromisoformat` produces and reads
/// back:
/// - a bare date, `YYYY-MM-DD`
/// - a date, `T` or a space, then `HH:MM` or `HH:MM:SS[.fraction]`
/// - optionally followed by `Z` or a `+HH:MM` / `-HH:MM` offset
///
/// Week dates, ordinal dates and the compact (no separator) forms are refused.
fn is_iso8601(raw: &str) -> bool {
    if DateTime::parse_from_rfc3339(raw).is_ok()
        || NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_ok()
    {
        return true;
    }

    let mut normalized = raw.replacen(' ', "T", 1);
    if let Some(rest) = normalized.strip_suffix('Z') {
        normalized = format!("{rest}+00:00");
    }
    NAIVE_FORMATS
        .iter()
        .any(|f| NaiveDateTime::parse_from_str(&normalized, f).is_ok())
        || OFFSET_FORMATS
            .iter()
            .any(|f| DateTime::parse_from_str(&normalized, f).is_ok())
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl Envelope {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&OutboundFields {
            kind: self.kind.as_str(),
            id: &self.id,
            topic: &self.topic,
            mode: self.mode.map(Mode::as_str).unwrap_or(""),
            timestamp: &self.timestamp,
            payload: &self.payload,
        })
    }

    /// The answer to a refused registration.
    pub fn reject(server_id: &str, identity: &str, topic: &str, conflict: &RegistryConflict) -> Self {
        Self {
            kind: MessageType::Reject,
            id: server_id.to_string(),
            topic: topic.to_string(),
            mode: None,
            timestamp: now(),
            payload: json!({
                "message": format!("Reject {identity} for topic {topic}"),
                "reason": conflict.to_string(),
            }),
        }
    }

    /// The answer to a `status` request, echoing the requester's id and topic.
    pub fn status_reply(identity: &str, topic: &str, snapshot: &Snapshot) -> Self {
        Self {
            kind: MessageType::Status,
            id: identity.to_string(),
            topic: topic.to_string(),
            mode: None,
            timestamp: now(),
            payload: json!({ "registered_topics": snapshot }),
        }
    }
}
