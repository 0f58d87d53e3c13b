//! The `transport` module is the connection layer: it accepts sockets, splits
//! the byte stream into explicit frames, and forwards them to the dispatcher
//! through a `BrokerHandle`. Each connection gets a writer task draining its
//! `Outgoing` queue and a reader loop; when either side stops, both stop and
//! the dispatcher is told the connection is gone.
//!
//! Two framings are supported, picked by `server.transport`:
//! - `websocket`: one WebSocket message per envelope
//! - `tcp`: one `\n`-terminated line per envelope

pub mod tcp;
pub mod websocket;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::broker::BrokerHandle;
use crate::config::{Settings, TransportKind};
use crate::utils::error::BrokerError;

/// Bind `server.host:server.port` and serve until the listener fails.
pub async fn start_server(settings: Settings, broker: BrokerHandle) -> Result<(), BrokerError> {
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| BrokerError::Bind { addr, source })?;
    serve(listener, settings, broker).await
}

/// Accept connections on an already bound listener.
pub async fn serve(
    listener: TcpListener,
    settings: Settings,
    broker: BrokerHandle,
) -> Result<(), BrokerError> {
    let transport = settings.server.transport;
    let max_frame_bytes = settings.broker.max_frame_bytes;
    let slots = Arc::new(Semaphore::new(settings.broker.max_connections));

    info!(
        server_id = %settings.server.id,
        addr = ?listener.local_addr().ok(),
        %transport,
        "broker listening"
    );

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(error = %e, "accept failed");
                return Err(e.into());
            }
        };

        let Ok(permit) = slots.clone().try_acquire_owned() else {
            warn!(%peer, max = settings.broker.max_connections, "connection limit reached, dropping");
            continue;
        };

        let broker = broker.clone();
        tokio::spawn(async move {
            match transport {
                TransportKind::Websocket => {
                    websocket::handle_connection(stream, peer, broker, max_frame_bytes).await
                }
                TransportKind::Tcp => {
                    tcp::handle_connection(stream, peer, broker, max_frame_bytes).await
                }
            }
            drop(permit);
        });
    }
}

#[cfg(test)]
mod tests;
