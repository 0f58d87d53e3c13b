//! # topicd
//!
//! `topicd` is an in-memory topic broker. Each topic has exactly one producer
//! and any number of subscribers; messages from the producer fan out to every
//! subscriber. Clients speak JSON envelopes over WebSockets or
//! newline-delimited TCP.
//!
//! ## Core Modules
//!
//! - `broker`: the dispatcher task, the topic registry, the envelope codec and
//!   the disconnect cascade.
//! - `client`: per-connection handles the dispatcher writes through.
//! - `config`: layered settings (defaults, file, `TOPICD_*` environment).
//! - `console`: the operator prompt on stdin.
//! - `transport`: the accept loop and the WebSocket / TCP framings.
//! - `utils`: error types and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod console;
pub mod transport;
pub mod utils;
