//! WebSocket transport
//!
//! Every text or binary WebSocket message is one envelope, so the frame
//! boundary never depends on how TCP segments arrive. Ping/pong is answered by
//! `tungstenite`; a close frame or end of stream ends the connection.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::spawn;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::accept_async;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::BrokerHandle;
use crate::client::{Client, Outgoing};

pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    broker: BrokerHandle,
    max_frame_bytes: usize,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%peer, error = %e, "WebSocket handshake error");
            return;
        }
    };
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outgoing>();
    let client = Client::new(tx, Some(peer));
    let conn = client.id;

    if broker.connected(client).is_err() {
        return;
    }

    // Dropped by the writer when it stops, which also stops the reader.
    let (writer_done, mut writer_stopped) = oneshot::channel::<()>();

    spawn(async move {
        while let Some(out) = rx.recv().await {
            match out {
                Outgoing::Frame(text) => {
                    if let Err(e) = ws_sender.send(WsMessage::text(text)).await {
                        warn!(%conn, error = %e, "failed to send message");
                        break;
                    }
                }
                Outgoing::Close => break,
            }
        }
        let _ = ws_sender.close().await;
        drop(writer_done);
        debug!(%conn, "send loop closed");
    });

    loop {
        let raw = tokio::select! {
            _ = &mut writer_stopped => break,
            msg = ws_receiver.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => text.as_bytes().to_vec(),
                Some(Ok(WsMessage::Binary(data))) => data.to_vec(),
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    debug!(%conn, error = %e, "read failed");
                    break;
                }
            },
        };

        if raw.len() > max_frame_bytes {
            warn!(%conn, size = raw.len(), max = max_frame_bytes, "oversized frame dropped");
            continue;
        }
        if broker.frame(conn, raw).is_err() {
            break;
        }
    }

    info!(%conn, %peer, "connection closed");
    broker.disconnected(conn);
}
