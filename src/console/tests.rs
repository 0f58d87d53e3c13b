use super::*;
use crate::broker::{Broker, TopicStatus};
use crate::client::{Client, ConnectionId};
use serde_json::json;
use std::collections::BTreeMap;
use tokio::sync::mpsc;

#[test]
fn parses_commands_case_and_space_insensitively() {
    assert_eq!("show topics".parse::<Command>(), Ok(Command::ShowTopics));
    assert_eq!("  SHOW   Clients ".parse::<Command>(), Ok(Command::ShowClients));
    assert_eq!("Help".parse::<Command>(), Ok(Command::Help));
    assert_eq!("exit".parse::<Command>(), Ok(Command::Exit));
    assert!("show".parse::<Command>().is_err());
    assert!("drop topics".parse::<Command>().is_err());
}

#[test]
fn renders_topics_in_name_order() {
    let mut snapshot: Snapshot = BTreeMap::new();
    snapshot.insert(
        "orders".into(),
        TopicStatus {
            producers: vec!["P1".into()],
            subscribers: vec!["S1".into(), "S2".into()],
        },
    );
    snapshot.insert(
        "alerts".into(),
        TopicStatus {
            producers: vec!["P2".into()],
            subscribers: vec![],
        },
    );

    assert_eq!(
        render_topics(&snapshot),
        "alerts: producer=P2 subscribers=[]\norders: producer=P1 subscribers=[S1, S2]"
    );
    assert_eq!(render_topics(&BTreeMap::new()), "no topics registered");
}

#[test]
fn renders_clients_with_placeholders() {
    let conn = ConnectionId::new();
    let rows = vec![ClientInfo {
        conn,
        addr: None,
        identity: None,
    }];
    assert_eq!(render_clients(&rows), format!("{conn} - -"));
    assert_eq!(render_clients(&[]), "no clients connected");
}

#[tokio::test]
async fn console_queries_dispatcher_and_exits() {
    let (broker, handle) = Broker::new("topicd");
    let dispatcher = tokio::spawn(broker.run());

    let (tx, _rx) = mpsc::unbounded_channel();
    let client = Client::new(tx, None);
    let conn = client.id;
    handle.connected(client).unwrap();
    let register = json!({
        "type": "register",
        "id": "P1",
        "topic": "orders",
        "mode": "producer",
        "timestamp": "2024-01-01T00:00:00",
        "payload": {},
    });
    handle
        .frame(conn, register.to_string().into_bytes())
        .unwrap();

    let input: &[u8] = b"show topics\nshow clients\nbogus\nexit\nshow topics\n";
    let mut output = Vec::new();
    let exit = run_with(input, &mut output, handle.clone()).await;

    assert_eq!(exit, ConsoleExit::Exit);
    let text = String::from_utf8(output).unwrap();
    assert!(text.contains("orders: producer=P1 subscribers=[]"));
    assert!(text.contains(&format!("{conn} - P1")));
    assert!(text.contains("unknown command"));

    dispatcher.await.unwrap();
    assert!(handle.is_closed());
}

#[tokio::test]
async fn console_stops_when_input_ends() {
    let (_broker, handle) = Broker::new("topicd");
    let input: &[u8] = b"help\n";
    let mut output = Vec::new();

    assert_eq!(run_with(input, &mut output, handle).await, ConsoleExit::InputClosed);
    assert_eq!(String::from_utf8(output).unwrap(), format!("{HELP}\n"));
}
