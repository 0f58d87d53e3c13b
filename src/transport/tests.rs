use super::serve;
use super::tcp::{Line, LineCodec};
use crate::broker::{Broker, BrokerHandle, Snapshot};
use crate::client::session::{self, Action, ClientOptions, Role};
use crate::config::{Settings, TransportKind};
use futures_util::{SinkExt, Stream, StreamExt};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};

const WAIT: Duration = Duration::from_secs(5);

async fn start_broker(settings: Settings) -> (SocketAddr, BrokerHandle) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let (broker, handle) = Broker::new(settings.server.id.clone());
    tokio::spawn(broker.run());
    tokio::spawn(serve(listener, settings, handle.clone()));
    (addr, handle)
}

fn settings_for(transport: TransportKind) -> Settings {
    let mut settings = Settings::default();
    settings.server.transport = transport;
    settings
}

fn envelope(kind: &str, id: &str, topic: &str, mode: &str, payload: Value) -> String {
    json!({
        "type": kind,
        "id": id,
        "topic": topic,
        "mode": mode,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "payload": payload,
    })
    .to_string()
}

async fn wait_until<F>(handle: &BrokerHandle, mut check: F)
where
    F: FnMut(&Snapshot) -> bool,
{
    timeout(WAIT, async {
        loop {
            let snapshot = handle.topics().await.expect("dispatcher running");
            if check(&snapshot) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn next_json<S>(ws: &mut S) -> Value
where
    S: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    loop {
        let msg = timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for a message")
            .expect("stream ended")
            .expect("read failed");
        if let WsMessage::Text(text) = msg {
            return serde_json::from_str(text.as_str()).expect("valid JSON");
        }
    }
}

#[tokio::test]
async fn websocket_publish_reaches_subscriber() {
    let (addr, handle) = start_broker(settings_for(TransportKind::Websocket)).await;
    let url = format!("ws://{addr}");

    let (mut producer, _) = connect_async(url.as_str()).await.expect("producer connect");
    let (mut subscriber, _) = connect_async(url.as_str()).await.expect("subscriber connect");

    producer
        .send(WsMessage::text(envelope("register", "P1", "orders", "producer", json!({}))))
        .await
        .unwrap();
    wait_until(&handle, |s| s.contains_key("orders")).await;

    subscriber
        .send(WsMessage::text(envelope("register", "S1", "orders", "subscriber", json!({}))))
        .await
        .unwrap();
    wait_until(&handle, |s| {
        s.get("orders")
            .is_some_and(|t| t.subscribers == vec!["S1".to_string()])
    })
    .await;

    producer
        .send(WsMessage::text(envelope("message", "P1", "orders", "producer", json!({"n": 1}))))
        .await
        .unwrap();

    let received = next_json(&mut subscriber).await;
    assert_eq!(received["type"], "message");
    assert_eq!(received["topic"], "orders");
    assert_eq!(received["payload"], json!({"n": 1}));
}

#[tokio::test]
async fn websocket_subscribe_to_unknown_topic_is_rejected() {
    let (addr, _handle) = start_broker(settings_for(TransportKind::Websocket)).await;
    let (mut ws, _) = connect_async(format!("ws://{addr}")).await.expect("connect");

    ws.send(WsMessage::text(envelope("register", "S1", "ghost", "subscriber", json!({}))))
        .await
        .unwrap();

    let reply = next_json(&mut ws).await;
    assert_eq!(reply["type"], "reject");
    assert_eq!(reply["topic"], "ghost");
    assert_eq!(reply["id"], "topicd");
}

#[tokio::test]
async fn websocket_disconnect_withdraws_topic() {
    let (addr, handle) = start_broker(settings_for(TransportKind::Websocket)).await;
    let (mut ws, _) = connect_async(format!("ws://{addr}")).await.expect("connect");

    ws.send(WsMessage::text(envelope("register", "P1", "t", "producer", json!({}))))
        .await
        .unwrap();
    wait_until(&handle, |s| s.contains_key("t")).await;

    ws.close(None).await.unwrap();
    wait_until(&handle, |s| s.is_empty()).await;
}

#[tokio::test]
async fn tcp_frames_coalesced_lines() {
    let (addr, _handle) = start_broker(settings_for(TransportKind::Tcp)).await;
    let stream = TcpStream::connect(addr).await.expect("connect");
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    // Two envelopes in a single write.
    let batch = format!(
        "{}\n{}\n",
        envelope("register", "P1", "sensors", "producer", json!({})),
        envelope("status", "P1", "logs", "producer", json!({})),
    );
    write_half.write_all(batch.as_bytes()).await.unwrap();

    let line = timeout(WAIT, lines.next_line())
        .await
        .expect("timed out")
        .unwrap()
        .expect("connection closed");
    let reply: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(reply["type"], "status");
    assert_eq!(reply["topic"], "logs");
    assert_eq!(
        reply["payload"]["registered_topics"]["sensors"],
        json!({"producers": ["P1"], "subscribers": []})
    );
}

#[tokio::test]
async fn tcp_envelope_split_across_writes() {
    let (addr, handle) = start_broker(settings_for(TransportKind::Tcp)).await;
    let mut stream = TcpStream::connect(addr).await.expect("connect");

    let frame = envelope("register", "P1", "split", "producer", json!({}));
    let (head, tail) = frame.split_at(frame.len() / 2);
    stream.write_all(head.as_bytes()).await.unwrap();
    stream.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    stream.write_all(tail.as_bytes()).await.unwrap();
    stream.write_all(b"\n").await.unwrap();

    wait_until(&handle, |s| s.contains_key("split")).await;
}

#[tokio::test]
async fn tcp_oversized_line_is_dropped_and_connection_stays_open() {
    let mut settings = settings_for(TransportKind::Tcp);
    settings.broker.max_frame_bytes = 256;
    let (addr, handle) = start_broker(settings).await;
    let mut stream = TcpStream::connect(addr).await.expect("connect");

    let oversized = envelope("register", "P1", &"x".repeat(512), "producer", json!({}));
    let valid = envelope("register", "P1", "after-oversized", "producer", json!({}));
    stream
        .write_all(format!("{oversized}\n{valid}\n").as_bytes())
        .await
        .unwrap();

    wait_until(&handle, |s| s.contains_key("after-oversized")).await;
    assert_eq!(handle.topics().await.unwrap().len(), 1);
}

#[tokio::test]
async fn tcp_invalid_utf8_line_keeps_connection() {
    let (addr, handle) = start_broker(settings_for(TransportKind::Tcp)).await;
    let mut stream = TcpStream::connect(addr).await.expect("connect");

    stream.write_all(b"\xff\xfe garbage\n").await.unwrap();
    let valid = envelope("register", "P1", "after-garbage", "producer", json!({}));
    stream.write_all(format!("{valid}\n").as_bytes()).await.unwrap();

    wait_until(&handle, |s| s.contains_key("after-garbage")).await;

    // Still open: a status request on the same socket is answered.
    let status = envelope("status", "P1", "after-garbage", "", json!({}));
    stream.write_all(format!("{status}\n").as_bytes()).await.unwrap();
    let mut lines = BufReader::new(stream).lines();
    let line = timeout(WAIT, lines.next_line())
        .await
        .expect("timed out")
        .unwrap()
        .expect("connection closed");
    let reply: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(reply["type"], "status");
}

#[tokio::test]
async fn websocket_withdraw_action_removes_subscription() {
    let (addr, handle) = start_broker(settings_for(TransportKind::Websocket)).await;
    let url = format!("ws://{addr}");

    let (mut producer, _) = connect_async(url.as_str()).await.expect("producer connect");
    producer
        .send(WsMessage::text(envelope("register", "P1", "orders", "producer", json!({}))))
        .await
        .unwrap();
    wait_until(&handle, |s| s.contains_key("orders")).await;

    let (mut subscriber, _) = connect_async(url.as_str()).await.expect("subscriber connect");
    subscriber
        .send(WsMessage::text(envelope("register", "S1", "orders", "subscriber", json!({}))))
        .await
        .unwrap();
    wait_until(&handle, |s| {
        s.get("orders")
            .is_some_and(|t| t.subscribers == vec!["S1".to_string()])
    })
    .await;

    let options = ClientOptions {
        url,
        id: "S1".into(),
        topic: "orders".into(),
        role: Role::Subscriber,
        payload: "{}".into(),
        count: 1,
    };
    session::run(Action::Withdraw, &options).await.expect("withdraw");

    wait_until(&handle, |s| s.get("orders").is_some_and(|t| t.subscribers.is_empty())).await;
    assert_eq!(handle.topics().await.unwrap()["orders"].producers, vec!["P1".to_string()]);
}

#[tokio::test]
async fn connection_limit_drops_extra_sockets() {
    let mut settings = settings_for(TransportKind::Tcp);
    settings.broker.max_connections = 1;
    let (addr, handle) = start_broker(settings).await;

    let _first = TcpStream::connect(addr).await.expect("first connect");
    timeout(WAIT, async {
        while handle.clients().await.expect("dispatcher running").is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("first connection never registered");

    let mut second = TcpStream::connect(addr).await.expect("second connect");
    let mut buf = [0u8; 16];
    let read = timeout(WAIT, second.read(&mut buf)).await.expect("timed out");
    assert!(matches!(read, Ok(0) | Err(_)));
    assert_eq!(handle.clients().await.unwrap().len(), 1);
}

#[test]
fn line_codec_splits_and_strips_carriage_return() {
    let mut codec = LineCodec::new(64);
    let mut buf = BytesMut::from(&b"one\r\ntwo\nthr"[..]);

    assert_eq!(codec.decode(&mut buf).unwrap(), Some(Line::Frame("one".into())));
    assert_eq!(codec.decode(&mut buf).unwrap(), Some(Line::Frame("two".into())));
    assert_eq!(codec.decode(&mut buf).unwrap(), None);

    buf.extend_from_slice(b"ee\n");
    assert_eq!(codec.decode(&mut buf).unwrap(), Some(Line::Frame("three".into())));
    assert!(buf.is_empty());
}

#[test]
fn line_codec_skips_oversized_line_across_reads() {
    let mut codec = LineCodec::new(4);
    let mut buf = BytesMut::from(&b"abcdefgh"[..]);
    assert_eq!(codec.decode(&mut buf).unwrap(), None);
    assert!(buf.is_empty());

    buf.extend_from_slice(b"ijk\nok\n");
    assert_eq!(codec.decode(&mut buf).unwrap(), Some(Line::Oversized));
    assert_eq!(codec.decode(&mut buf).unwrap(), Some(Line::Frame("ok".into())));
}

#[test]
fn line_codec_passes_non_utf8_bytes_through() {
    let mut codec = LineCodec::new(64);
    let mut buf = BytesMut::from(&b"\xff\xfe\n"[..]);
    assert_eq!(
        codec.decode(&mut buf).unwrap(),
        Some(Line::Frame(vec![0xff, 0xfe].into()))
    );
}

#[test]
fn line_codec_returns_unterminated_tail_at_eof() {
    let mut codec = LineCodec::new(64);
    let mut buf = BytesMut::from(&b"tail"[..]);
    assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some(Line::Frame("tail".into())));
    assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
}

#[test]
fn line_codec_appends_newline_on_encode() {
    let mut codec = LineCodec::new(64);
    let mut buf = BytesMut::new();
    codec.encode("{}".to_string(), &mut buf).unwrap();
    assert_eq!(&buf[..], b"{}\n");
}
