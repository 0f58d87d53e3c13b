//! Smoke-test client
//!
//! Speaks the envelope protocol over a WebSocket as one identity: produce a
//! few messages, subscribe and print what arrives, withdraw a registration,
//! or ask for the broker's status.

use std::error::Error;
use std::time::Duration;

use clap::ValueEnum;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Action {
    Produce,
    Subscribe,
    Withdraw,
    Status,
}

/// Which registration a `withdraw` removes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Role {
    #[default]
    Producer,
    Subscriber,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Producer => "producer",
            Role::Subscriber => "subscriber",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub url: String,
    pub id: String,
    pub topic: String,
    pub role: Role,
    /// JSON payload of each published message.
    pub payload: String,
    /// Messages to publish, or to wait for when subscribing.
    pub count: usize,
}

fn envelope(kind: &str, id: &str, topic: &str, mode: &str, payload: Value) -> WsMessage {
    let value = json!({
        "type": kind,
        "id": id,
        "topic": topic,
        "mode": mode,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "payload": payload,
    });
    WsMessage::text(value.to_string())
}

pub async fn run(action: Action, opts: &ClientOptions) -> Result<(), Box<dyn Error>> {
    let (mut ws_stream, _response) = connect_async(opts.url.as_str()).await?;
    let (id, topic) = (opts.id.as_str(), opts.topic.as_str());

    match action {
        Action::Produce => {
            let payload: Value = serde_json::from_str(&opts.payload)?;
            ws_stream
                .send(envelope("register", id, topic, "producer", json!({})))
                .await?;
            for _ in 0..opts.count {
                ws_stream
                    .send(envelope("message", id, topic, "producer", payload.clone()))
                    .await?;
            }
            // A rejected registration is the only reply a producer gets.
            while let Ok(Some(Ok(WsMessage::Text(reply)))) =
                tokio::time::timeout(Duration::from_millis(500), ws_stream.next()).await
            {
                println!("Reply: {reply}");
            }
        }
        Action::Subscribe => {
            ws_stream
                .send(envelope("register", id, topic, "subscriber", json!({})))
                .await?;
            let mut received = 0;
            while received < opts.count {
                let Some(msg) = ws_stream.next().await else {
                    break;
                };
                if let WsMessage::Text(text) = msg? {
                    println!("Incoming: {text}");
                    let value: Value = serde_json::from_str(text.as_str())?;
                    match value["type"].as_str() {
                        Some("message") => received += 1,
                        Some("reject") => break,
                        _ => {}
                    }
                }
            }
        }
        Action::Withdraw => {
            ws_stream
                .send(envelope("withdraw", id, topic, opts.role.as_str(), json!({})))
                .await?;
            println!("Withdrew {id} as {} from {topic}", opts.role.as_str());
        }
        Action::Status => {
            ws_stream
                .send(envelope("status", id, topic, "", json!({})))
                .await?;
            if let Some(Ok(WsMessage::Text(reply))) = ws_stream.next().await {
                println!("Status: {reply}");
            }
        }
    }

    ws_stream.close(None).await?;
    Ok(())
}
