//! Client gateway integration tests over real WebSocket connections

mod common;

use common::*;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio_tungstenite::tungstenite::Message;

#[tokio::test]
async fn test_successful_call() {
    let server = start_server().await;
    let mut ws = connect_ws(server.gateway).await;

    let reply = call_ws(&mut ws, "add", json!({"a": 1, "b": 2}), json!(1)).await;
    assert!(reply.is_success());
    assert_eq!(reply.result, json!(3));
    assert_eq!(reply.id, json!(1));
}

#[tokio::test]
async fn test_success_reply_has_null_error_on_the_wire() {
    let server = start_server().await;
    let mut ws = connect_ws(server.gateway).await;

    send_ws(&mut ws, call_text("add", json!({"a": 2, "b": 2}), json!("w"))).await;
    let raw = loop {
        match futures::StreamExt::next(&mut ws).await {
            Some(Ok(Message::Text(text))) => break text,
            Some(Ok(_)) => continue,
            other => panic!("connection ended: {:?}", other),
        }
    };
    let value: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value, json!({"result": 4, "error": null, "id": "w"}));
}

#[tokio::test]
async fn test_unknown_method() {
    let server = start_server().await;
    let mut ws = connect_ws(server.gateway).await;

    let reply = call_ws(&mut ws, "doesNotExist", json!({}), json!("q")).await;
    assert!(reply.is_error());
    assert_eq!(reply.id, json!("q"));
    let diagnostic = reply.result.as_str().unwrap();
    assert!(!diagnostic.is_empty());
    assert!(diagnostic.contains("doesNotExist"));
}

#[tokio::test]
async fn test_bad_arguments() {
    let server = start_server().await;
    let mut ws = connect_ws(server.gateway).await;

    let missing = call_ws(&mut ws, "add", json!({"a": 1}), json!(1)).await;
    assert!(missing.is_error());
    assert_eq!(missing.id, json!(1));

    let extra = call_ws(&mut ws, "add", json!({"a": 1, "b": 2, "c": 3}), json!(2)).await;
    assert!(extra.is_error());

    let mistyped = call_ws(&mut ws, "add", json!({"a": "1", "b": 2}), json!(3)).await;
    assert!(mistyped.is_error());

    // Connection is still usable
    let ok = call_ws(&mut ws, "add", json!({"a": 1, "b": 1}), json!(4)).await;
    assert_eq!(ok.result, json!(2));
}

#[tokio::test]
async fn test_invocation_failure() {
    let server = start_server().await;
    let mut ws = connect_ws(server.gateway).await;

    let reply = call_ws(&mut ws, "fail", json!({}), json!(9)).await;
    assert!(reply.is_error());
    assert_eq!(reply.result, json!("Invocation failed: counter offline"));
}

#[tokio::test]
async fn test_panic_is_contained() {
    let server = start_server().await;
    let mut ws = connect_ws(server.gateway).await;

    let reply = call_ws(&mut ws, "boom", json!({}), json!(1)).await;
    assert!(reply.is_error());
    assert!(reply
        .result
        .as_str()
        .unwrap()
        .contains("operation blew up"));

    let reply = call_ws(&mut ws, "add", json!({"a": 5, "b": 5}), json!(2)).await;
    assert_eq!(reply.result, json!(10));
}

#[tokio::test]
async fn test_id_round_trip() {
    let server = start_server().await;
    let mut ws = connect_ws(server.gateway).await;

    let ids = vec![
        Value::Null,
        json!(42),
        json!(-1),
        json!("req-7"),
        json!({"tab": 3, "seq": [1, 2]}),
        serde_json::from_str("1180591620717411303424").unwrap(),
        serde_json::from_str("1.0715660391465826e-75").unwrap(),
        serde_json::from_str("0.8414709848078965").unwrap(),
    ];
    for id in ids {
        let reply = call_ws(&mut ws, "add", json!({"a": 0, "b": 0}), id.clone()).await;
        assert_eq!(reply.id, id);
    }
}

#[tokio::test]
async fn test_order_preservation() {
    let server = start_server().await;
    let mut ws = connect_ws(server.gateway).await;

    // The first call is the slowest; replies must still come back in order
    send_ws(&mut ws, call_text("sleep", json!({"ms": 60}), json!(1))).await;
    send_ws(&mut ws, call_text("sleep", json!({"ms": 10}), json!(2))).await;
    send_ws(&mut ws, call_text("add", json!({"a": 1, "b": 2}), json!(3))).await;

    for expected in 1..=3 {
        let reply = recv_ws(&mut ws).await;
        assert_eq!(reply.id, json!(expected));
        assert!(reply.is_success());
    }
}

#[tokio::test]
async fn test_isolation_between_connections() {
    let server = start_server().await;
    let mut a = connect_ws(server.gateway).await;
    let mut b = connect_ws(server.gateway).await;

    // A is busy with a slow call and then a panic
    send_ws(&mut a, call_text("sleep", json!({"ms": 300}), json!("a1"))).await;
    send_ws(&mut a, call_text("boom", json!({}), json!("a2"))).await;

    // B is served while A is still working
    let started = Instant::now();
    let reply = call_ws(&mut b, "add", json!({"a": 20, "b": 22}), json!("b1")).await;
    assert_eq!(reply.result, json!(42));
    assert_eq!(reply.id, json!("b1"));
    assert!(started.elapsed() < Duration::from_millis(300));

    let first = recv_ws(&mut a).await;
    assert_eq!(first.id, json!("a1"));
    let second = recv_ws(&mut a).await;
    assert_eq!(second.id, json!("a2"));
    assert!(second.is_error());

    let reply = call_ws(&mut b, "add", json!({"a": 1, "b": 1}), json!("b2")).await;
    assert_eq!(reply.result, json!(2));
}

#[tokio::test]
async fn test_malformed_messages_get_error_replies() {
    let server = start_server().await;
    let mut ws = connect_ws(server.gateway).await;

    send_ws(&mut ws, "definitely not json".to_string()).await;
    let reply = recv_ws(&mut ws).await;
    assert!(reply.is_error());
    assert_eq!(reply.id, Value::Null);

    send_ws(&mut ws, r#"{"params":{},"id":77}"#.to_string()).await;
    let reply = recv_ws(&mut ws).await;
    assert!(reply.is_error());
    assert_eq!(reply.id, json!(77));

    let reply = call_ws(&mut ws, "add", json!({"a": 1, "b": 2}), json!(78)).await;
    assert_eq!(reply.result, json!(3));
}

#[tokio::test]
async fn test_binary_frames_are_ignored() {
    let server = start_server().await;
    let mut ws = connect_ws(server.gateway).await;

    ws.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
    let reply = call_ws(&mut ws, "add", json!({"a": 1, "b": 2}), json!(1)).await;
    assert_eq!(reply.id, json!(1));
}

#[tokio::test]
async fn test_client_close_does_not_affect_server() {
    let server = start_server().await;

    let mut first = connect_ws(server.gateway).await;
    let _ = call_ws(&mut first, "add", json!({"a": 1, "b": 2}), json!(1)).await;
    first.close(None).await.unwrap();

    let mut second = connect_ws(server.gateway).await;
    let reply = call_ws(&mut second, "add", json!({"a": 3, "b": 4}), json!(1)).await;
    assert_eq!(reply.result, json!(7));
}

#[tokio::test]
async fn test_client_close_is_acknowledged() {
    let server = start_server().await;
    let mut ws = connect_ws(server.gateway).await;
    let _ = call_ws(&mut ws, "add", json!({"a": 1, "b": 1}), json!(1)).await;

    ws.send(Message::Close(None)).await.unwrap();

    let echoed = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for the close reply");
    assert!(
        matches!(echoed, Some(Ok(Message::Close(_)))),
        "expected a close frame, got {:?}",
        echoed
    );
}
