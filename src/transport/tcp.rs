//! Line-delimited TCP transport
//!
//! Each envelope is one JSON document terminated by `\n` (a trailing `\r` is
//! tolerated). Several envelopes in one segment, or one envelope split over
//! many, are framed correctly. Lines are handed to the dispatcher as raw bytes,
//! so a line that is not UTF-8 is rejected there like any other malformed
//! frame. A line longer than `max_frame_bytes` is discarded up to its newline;
//! neither case closes the connection.

use std::io;
use std::net::SocketAddr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::spawn;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{Decoder, Encoder, Framed};
use tracing::{debug, info, warn};

use crate::broker::BrokerHandle;
use crate::client::{Client, Outgoing};

/// One decoded line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Frame(Bytes),
    /// A line over the limit was skipped.
    Oversized,
}

/// Newline framing over raw bytes with a maximum line length.
#[derive(Debug)]
pub struct LineCodec {
    max_length: usize,
    /// Scan offset into the buffer; bytes before it hold no newline.
    next_index: usize,
    /// Set while dropping the rest of an oversized line.
    discarding: bool,
}

impl LineCodec {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: false,
        }
    }

    fn finish(&self, mut line: BytesMut) -> Line {
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        if line.len() > self.max_length {
            Line::Oversized
        } else {
            Line::Frame(line.freeze())
        }
    }
}

impl Decoder for LineCodec {
    type Item = Line;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Line>, io::Error> {
        loop {
            let newline = src[self.next_index..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| self.next_index + offset);

            match (self.discarding, newline) {
                (true, Some(at)) => {
                    src.advance(at + 1);
                    self.next_index = 0;
                    self.discarding = false;
                    return Ok(Some(Line::Oversized));
                }
                (true, None) => {
                    src.advance(src.len());
                    self.next_index = 0;
                    return Ok(None);
                }
                (false, Some(at)) => {
                    let mut line = src.split_to(at + 1);
                    line.truncate(at);
                    self.next_index = 0;
                    return Ok(Some(self.finish(line)));
                }
                (false, None) if src.len() > self.max_length + 1 => {
                    self.discarding = true;
                }
                (false, None) => {
                    self.next_index = src.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Line>, io::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if src.is_empty() {
            return Ok(None);
        }
        // Unterminated last line.
        let line = src.split_to(src.len());
        self.next_index = 0;
        Ok(Some(self.finish(line)))
    }
}

impl Encoder<String> for LineCodec {
    type Error = io::Error;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> Result<(), io::Error> {
        dst.reserve(line.len() + 1);
        dst.put_slice(line.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}

pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    broker: BrokerHandle,
    max_frame_bytes: usize,
) {
    let framed = Framed::new(stream, LineCodec::new(max_frame_bytes));
    let (mut sink, mut lines) = framed.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outgoing>();
    let client = Client::new(tx, Some(peer));
    let conn = client.id;

    if broker.connected(client).is_err() {
        return;
    }

    let (writer_done, mut writer_stopped) = oneshot::channel::<()>();

    spawn(async move {
        while let Some(out) = rx.recv().await {
            match out {
                Outgoing::Frame(text) => {
                    if let Err(e) = sink.send(text).await {
                        warn!(%conn, error = %e, "failed to send line");
                        break;
                    }
                }
                Outgoing::Close => break,
            }
        }
        let _ = sink.close().await;
        drop(writer_done);
        debug!(%conn, "send loop closed");
    });

    loop {
        let raw = tokio::select! {
            _ = &mut writer_stopped => break,
            line = lines.next() => match line {
                Some(Ok(Line::Frame(raw))) => raw,
                Some(Ok(Line::Oversized)) => {
                    warn!(%conn, max = max_frame_bytes, "oversized line dropped");
                    continue;
                }
                Some(Err(e)) => {
                    debug!(%conn, error = %e, "read failed");
                    break;
                }
                None => break,
            },
        };

        if raw.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        if broker.frame(conn, raw.to_vec()).is_err() {
            break;
        }
    }

    info!(%conn, %peer, "connection closed");
    broker.disconnected(conn);
}
