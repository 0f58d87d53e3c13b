//! Operator console
//!
//! A line-oriented prompt on stdin. It only ever asks the dispatcher for
//! snapshots; the one command with a side effect is `exit`, which requests a
//! broker shutdown.

use std::fmt::Write as _;
use std::str::FromStr;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use crate::broker::{BrokerHandle, ClientInfo, Snapshot};

const HELP: &str = "commands: show topics | show clients | help | exit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    ShowTopics,
    ShowClients,
    Help,
    Exit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let words: Vec<String> = s.split_whitespace().map(str::to_lowercase).collect();
        let words: Vec<&str> = words.iter().map(String::as_str).collect();
        match words.as_slice() {
            ["show", "topics"] => Ok(Command::ShowTopics),
            ["show", "clients"] => Ok(Command::ShowClients),
            ["help"] | ["?"] => Ok(Command::Help),
            ["exit"] | ["quit"] => Ok(Command::Exit),
            _ => Err(format!("unknown command {:?}, try `help`", s.trim())),
        }
    }
}

/// Why the console stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleExit {
    Exit,
    InputClosed,
}

pub fn render_topics(snapshot: &Snapshot) -> String {
    if snapshot.is_empty() {
        return "no topics registered".to_string();
    }
    let mut out = String::new();
    for (name, status) in snapshot {
        let _ = writeln!(
            out,
            "{name}: producer={} subscribers=[{}]",
            status.producers.join(","),
            status.subscribers.join(", ")
        );
    }
    out.pop();
    out
}

pub fn render_clients(clients: &[ClientInfo]) -> String {
    if clients.is_empty() {
        return "no clients connected".to_string();
    }
    let mut out = String::new();
    for info in clients {
        let addr = info
            .addr
            .map(|a| a.to_string())
            .unwrap_or_else(|| "-".to_string());
        let identity = info.identity.as_deref().unwrap_or("-");
        let _ = writeln!(out, "{} {addr} {identity}", info.conn);
    }
    out.pop();
    out
}

/// Run the console on stdin/stdout.
pub async fn run(broker: BrokerHandle) -> ConsoleExit {
    run_with(BufReader::new(tokio::io::stdin()), tokio::io::stdout(), broker).await
}

pub async fn run_with<R, W>(input: R, mut output: W, broker: BrokerHandle) -> ConsoleExit
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return ConsoleExit::InputClosed,
            Err(e) => {
                warn!(error = %e, "console input failed");
                return ConsoleExit::InputClosed;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let reply = match line.parse::<Command>() {
            Ok(Command::ShowTopics) => match broker.topics().await {
                Ok(snapshot) => render_topics(&snapshot),
                Err(e) => e.to_string(),
            },
            Ok(Command::ShowClients) => match broker.clients().await {
                Ok(clients) => render_clients(&clients),
                Err(e) => e.to_string(),
            },
            Ok(Command::Help) => HELP.to_string(),
            Ok(Command::Exit) => {
                debug!("exit requested from console");
                broker.shutdown();
                return ConsoleExit::Exit;
            }
            Err(hint) => hint,
        };

        if output.write_all(format!("{reply}\n").as_bytes()).await.is_err()
            || output.flush().await.is_err()
        {
            return ConsoleExit::InputClosed;
        }
    }
}

#[cfg(test)]
mod tests;
