//! End-to-end tests against a bound gateway.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use trawl_core::{DatasourceSet, Record};
use trawl_datasources::live::LiveOptions;
use trawl_datasources::{LiveDatasource, MemoryDatasource};
use trawl_server::{Gateway, ServerConfig};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn record(id: &str, doc: Value) -> Record {
    let Value::Object(fields) = doc else {
        panic!("record must be an object");
    };
    Record::new(id, fields)
}

fn datasources() -> DatasourceSet {
    let mut set = DatasourceSet::new();
    set.insert(
        "people",
        "People",
        Arc::new(MemoryDatasource::new(vec![
            record("1", json!({"name": "alice", "city": "Leeds"})),
            record("2", json!({"name": "alice", "city": "York"})),
            record("3", json!({"name": "bob", "city": "Leeds"})),
        ])),
    );
    set.insert(
        "feed",
        "Feed",
        Arc::new(LiveDatasource::new(&LiveOptions::default())),
    );
    set
}

async fn start() -> (SocketAddr, CancellationToken) {
    let config = ServerConfig {
        address: "127.0.0.1:0".into(),
        ..ServerConfig::default()
    };
    let gateway = Gateway::bind(&config, datasources()).await.unwrap();
    let addr = gateway.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    tokio::spawn(gateway.run(shutdown.clone()));
    (addr, shutdown)
}

async fn connect(addr: SocketAddr) -> Client {
    let (mut client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    let initial = next_json(&mut client).await;
    assert_eq!(initial["type"], "INITIAL_STATE_RECEIVE");
    client
}

async fn send(client: &mut Client, msg: Value) {
    client
        .send(Message::Text(msg.to_string().into()))
        .await
        .unwrap();
}

async fn next_json(client: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .unwrap();
        match frame {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Collects frames until the first terminal for `request_id`.
async fn until_terminal(client: &mut Client, request_id: &str) -> Vec<Value> {
    let mut frames = Vec::new();
    loop {
        let msg = next_json(client).await;
        assert_eq!(msg["request-id"], request_id, "{msg}");
        let terminal = matches!(
            msg["type"].as_str(),
            Some("REQUEST_COMPLETED" | "REQUEST_CANCELED" | "ERROR")
        );
        frames.push(msg);
        if terminal {
            return frames;
        }
    }
}

#[tokio::test]
async fn test_initial_state_lists_datasources() {
    let (addr, shutdown) = start().await;
    let (mut client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();

    let initial = next_json(&mut client).await;
    assert_eq!(initial["type"], "INITIAL_STATE_RECEIVE");
    assert_eq!(initial["version"], env!("CARGO_PKG_VERSION"));
    let ids: Vec<&str> = initial["datasources"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, ["feed", "people"]);
    assert_eq!(initial["datasources"][1]["type"], "memory");

    shutdown.cancel();
}

#[tokio::test]
async fn test_search_then_items() {
    let (addr, shutdown) = start().await;
    let mut client = connect(addr).await;

    send(
        &mut client,
        json!({
            "type": "SEARCH_REQUEST",
            "request-id": "s1",
            "datasources": ["people"],
            "fields": ["name"],
            "query": "alice",
        }),
    )
    .await;

    let frames = until_terminal(&mut client, "s1").await;
    let terminal = frames.last().unwrap();
    assert_eq!(terminal["type"], "REQUEST_COMPLETED");
    assert_eq!(terminal["datasource"], "people");

    let nodes: Vec<&Value> = frames
        .iter()
        .filter(|f| f["type"] == "SEARCH_RECEIVE")
        .flat_map(|f| f["results"].as_array().unwrap())
        .collect();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0]["count"], 2);
    assert_eq!(nodes[0]["fields"], json!({"name": "alice"}));
    let node_id = nodes[0]["id"].as_str().unwrap().to_string();

    send(
        &mut client,
        json!({"type": "ITEMS_REQUEST", "request-id": "i1", "items": [node_id]}),
    )
    .await;
    let frames = until_terminal(&mut client, "i1").await;
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0]["type"], "ITEMS_RECEIVE");
    assert_eq!(frames[0]["item-id"], node_id);
    assert_eq!(frames[0]["items"].as_array().unwrap().len(), 2);
    assert_eq!(frames[1]["type"], "REQUEST_COMPLETED");

    shutdown.cancel();
}

#[tokio::test]
async fn test_fields_request() {
    let (addr, shutdown) = start().await;
    let mut client = connect(addr).await;

    send(
        &mut client,
        json!({"type": "FIELDS_REQUEST", "request-id": "f1", "datasources": ["people"]}),
    )
    .await;

    let msg = next_json(&mut client).await;
    assert_eq!(msg["type"], "FIELDS_RECEIVE");
    assert_eq!(msg["datasource"], "people");
    let paths: Vec<&str> = msg["fields"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["path"].as_str().unwrap())
        .collect();
    assert_eq!(paths, ["city", "name"]);

    shutdown.cancel();
}

#[tokio::test]
async fn test_bad_frames_keep_session_open() {
    let (addr, shutdown) = start().await;
    let mut client = connect(addr).await;

    client
        .send(Message::Text("not json".to_string().into()))
        .await
        .unwrap();
    let msg = next_json(&mut client).await;
    assert_eq!(msg["type"], "ERROR");
    assert_eq!(msg["request-id"], "");

    send(&mut client, json!({"type": "DANCE", "request-id": "d1"})).await;
    let msg = next_json(&mut client).await;
    assert_eq!(msg["type"], "ERROR");
    assert_eq!(msg["request-id"], "d1");

    send(
        &mut client,
        json!({"type": "SEARCH_REQUEST", "request-id": "s2", "query": "bob"}),
    )
    .await;
    let msg = next_json(&mut client).await;
    assert_eq!(msg["type"], "ERROR");
    assert_eq!(msg["message"], "no datasource set");

    send(
        &mut client,
        json!({
            "type": "SEARCH_REQUEST",
            "request-id": "s3",
            "datasource": "people",
            "fields": ["city"],
            "query": "bob",
        }),
    )
    .await;
    let frames = until_terminal(&mut client, "s3").await;
    assert_eq!(frames.last().unwrap()["type"], "REQUEST_COMPLETED");

    shutdown.cancel();
}

#[tokio::test]
async fn test_cancel_unknown_request_is_silent() {
    let (addr, shutdown) = start().await;
    let mut client = connect(addr).await;

    send(&mut client, json!({"type": "CANCEL_REQUEST", "request-id": "ghost"})).await;
    send(
        &mut client,
        json!({"type": "ITEMS_REQUEST", "request-id": "i2", "items": []}),
    )
    .await;

    let msg = next_json(&mut client).await;
    assert_eq!(msg["type"], "REQUEST_COMPLETED");
    assert_eq!(msg["request-id"], "i2");

    shutdown.cancel();
}

async fn post_document(addr: SocketAddr, datasource: &str, body: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "POST /submit?datasource={datasource} HTTP/1.1\r\n\
         Host: {addr}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test]
async fn test_submit_is_broadcast_to_sessions() {
    let (addr, shutdown) = start().await;
    let mut first = connect(addr).await;
    let mut second = connect(addr).await;

    let response = post_document(addr, "feed", r#"{"user": {"name": "carol"}, "text": "hi"}"#).await;
    assert!(response.starts_with("HTTP/1.1 202"), "{response}");

    for client in [&mut first, &mut second] {
        let msg = next_json(client).await;
        assert_eq!(msg["type"], "LIVE_RECEIVE");
        assert_eq!(msg["datasource"], "feed");
        let graphs = msg["graphs"].as_array().unwrap();
        assert_eq!(graphs.len(), 1);
        assert_eq!(graphs[0]["fields"]["user.name"], "carol");
    }

    let response = post_document(addr, "people", r#"{"a": "b"}"#).await;
    assert!(response.starts_with("HTTP/1.1 400"), "{response}");

    shutdown.cancel();
}
