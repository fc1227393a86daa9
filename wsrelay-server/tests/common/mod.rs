//! Shared fixtures for the relay integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use wsrelay_core::{codec, Error, ReplyEnvelope};
use wsrelay_server::{from_fn, from_typed_fn, Dispatcher, RelayServer};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct AddParams {
    a: i64,
    b: i64,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SleepParams {
    ms: u64,
}

/// Dispatcher with one operation per outcome the relay must handle
pub fn test_dispatcher() -> Dispatcher {
    Dispatcher::builder()
        .handler("add", from_typed_fn(|p: AddParams| async move { Ok(p.a + p.b) }))
        .handler(
            "fail",
            from_fn(|_| async { Err(Error::Invocation("counter offline".to_string())) }),
        )
        .handler(
            "boom",
            from_fn(|_| async {
                let divisor: Option<i64> = None;
                Ok(json!(10 / divisor.expect("operation blew up")))
            }),
        )
        .handler(
            "sleep",
            from_typed_fn(|p: SleepParams| async move {
                tokio::time::sleep(Duration::from_millis(p.ms)).await;
                Ok(p.ms)
            }),
        )
        .build()
}

pub struct TestServer {
    pub gateway: SocketAddr,
    pub backend: SocketAddr,
    handle: JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Start a relay with gateway and backend listeners on ephemeral ports
pub async fn start_server() -> TestServer {
    let localhost: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let server = RelayServer::builder()
        .bind(localhost)
        .backend(localhost)
        .dispatcher(test_dispatcher())
        .build()
        .await
        .unwrap();

    let gateway = server.local_addr().unwrap();
    let backend = server.backend_addr().unwrap();
    let handle = tokio::spawn(async move {
        let _ = server.run().await;
    });

    TestServer {
        gateway,
        backend,
        handle,
    }
}

pub async fn connect_ws(addr: SocketAddr) -> WsClient {
    let (ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
    ws
}

pub fn call_text(method: &str, params: Value, id: Value) -> String {
    json!({"method": method, "params": params, "id": id}).to_string()
}

pub async fn send_ws(ws: &mut WsClient, text: String) {
    ws.send(Message::Text(text)).await.unwrap();
}

/// Next reply frame, skipping control frames
pub async fn recv_ws(ws: &mut WsClient) -> ReplyEnvelope {
    let next = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return text,
                Some(Ok(_)) => continue,
                other => panic!("connection ended: {:?}", other),
            }
        }
    })
    .await
    .expect("timed out waiting for reply");

    codec::decode_reply(&next).unwrap()
}

pub async fn call_ws(ws: &mut WsClient, method: &str, params: Value, id: Value) -> ReplyEnvelope {
    send_ws(ws, call_text(method, params, id)).await;
    recv_ws(ws).await
}

pub struct BackendClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl BackendClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, writer) = stream.into_split();
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    pub async fn send_line(&mut self, text: &str) {
        self.writer.write_all(text.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
    }

    pub async fn recv_raw(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("timed out waiting for reply")
            .unwrap()
            .expect("backend closed the connection")
    }

    pub async fn call(&mut self, method: &str, params: Value, id: Value) -> ReplyEnvelope {
        self.send_line(&call_text(method, params, id)).await;
        codec::decode_reply(&self.recv_raw().await).unwrap()
    }
}
