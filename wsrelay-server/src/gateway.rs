//! Client gateway: WebSocket connection handling
//!
//! Terminates browser connections and relays every inbound text message
//! through the dispatcher, writing exactly one reply per message back on the
//! same connection.
//!
//! # Connection Lifecycle
//!
//! 1. **Accept**: TCP connection accepted by the server loop
//! 2. **Upgrade**: WebSocket handshake
//! 3. **Process**: read text frames one at a time, relay, queue the reply
//! 4. **Close**: a client close frame is answered by tungstenite while the
//!    reader keeps polling until the stream ends
//! 5. **Cleanup**: when either half ends, stop the other and record metrics
//!
//! # Task Model
//!
//! Each connection runs two tasks:
//! - **Receive task**: reads frames and dispatches calls, strictly in order
//! - **Send task**: drains an unbounded channel into the socket
//!
//! Because the receive task awaits each dispatch before reading the next
//! frame, replies leave in the order their calls arrived. Connections never
//! wait on each other.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use wsrelay_core::{Error, Result};

use crate::dispatcher::Dispatcher;
use crate::metrics::{ServerMetrics, GATEWAY_INGRESS};

/// Outgoing half of a client connection
///
/// Cloning yields another sender into the same writer task.
#[derive(Clone)]
pub struct Connection {
    /// Connection ID assigned by the accept loop
    pub id: u64,
    tx: mpsc::UnboundedSender<Message>,
}

impl Connection {
    /// Create a new connection handle
    pub fn new(id: u64, tx: mpsc::UnboundedSender<Message>) -> Self {
        Self { id, tx }
    }

    /// Queue a text frame for the client
    pub fn send_text(&self, text: String) -> Result<()> {
        self.tx
            .send(Message::Text(text))
            .map_err(|_| Error::ConnectionClosed)
    }
}

/// Handle a single WebSocket client connection
#[tracing::instrument(skip(stream, dispatcher, metrics), fields(conn_id = conn_id))]
pub async fn handle_connection(
    stream: TcpStream,
    conn_id: u64,
    dispatcher: Dispatcher,
    metrics: Option<Arc<ServerMetrics>>,
) -> Result<()> {
    tracing::debug!("Upgrading connection to WebSocket");
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| Error::WebSocket(e.to_string()))?;

    if let Some(ref m) = metrics {
        m.record_connection(GATEWAY_INGRESS);
    }
    tracing::info!("Client connected");

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let conn = Connection::new(conn_id, tx);

    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = ws_sender.send(msg).await {
                tracing::error!(error = %e, "Error sending message");
                return;
            }
        }
        // Fails harmlessly when the client already completed the close handshake
        if let Err(e) = ws_sender.close().await {
            tracing::debug!(error = %e, "Close after drain");
        }
    });

    let metrics_clone = metrics.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(message) = ws_receiver.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    if let Err(e) = handle_message(&text, &dispatcher, &conn).await {
                        tracing::error!(error = %e, "Error handling message");
                        if let Some(ref m) = metrics_clone {
                            m.record_error(e.kind());
                        }
                        if matches!(e, Error::ConnectionClosed) {
                            break;
                        }
                    }
                }
                Ok(Message::Close(_)) => {
                    // Keep polling so tungstenite flushes its close reply; the stream then ends
                    tracing::info!("Connection closed by client");
                }
                Ok(Message::Binary(data)) => {
                    tracing::debug!(len = data.len(), "Ignoring binary frame");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, "WebSocket error");
                    if let Some(ref m) = metrics_clone {
                        m.record_error("websocket");
                    }
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        }
        _ = &mut recv_task => {
            // Dropping the last sender ends the writer once queued replies are out
            if let Err(e) = send_task.await {
                tracing::debug!(error = %e, "Send task ended abnormally");
            }
        }
    }

    if let Some(ref m) = metrics {
        m.record_disconnection(GATEWAY_INGRESS);
    }
    tracing::info!("Connection cleaned up");

    Ok(())
}

/// Relay one text frame and queue the reply
async fn handle_message(text: &str, dispatcher: &Dispatcher, conn: &Connection) -> Result<()> {
    tracing::debug!(len = text.len(), "Received message");
    let reply = dispatcher.relay(text).await?;
    conn.send_text(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::from_fn;
    use serde_json::json;

    #[tokio::test]
    async fn test_handle_message_queues_one_reply() {
        let dispatcher = Dispatcher::builder()
            .handler("ping", from_fn(|_| async { Ok(json!("pong")) }))
            .build();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = Connection::new(1, tx);

        handle_message(r#"{"method":"ping","params":{},"id":1}"#, &dispatcher, &conn)
            .await
            .unwrap();

        match rx.recv().await {
            Some(Message::Text(text)) => {
                assert_eq!(text, r#"{"result":"pong","error":null,"id":1}"#)
            }
            other => panic!("Expected text frame, got {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_handle_message_replies_to_garbage() {
        let dispatcher = Dispatcher::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = Connection::new(2, tx);

        handle_message("{{{", &dispatcher, &conn).await.unwrap();

        match rx.recv().await {
            Some(Message::Text(text)) => {
                assert!(text.contains("\"error\":true"));
                assert!(text.contains("\"id\":null"));
            }
            other => panic!("Expected text frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Connection::new(3, tx);
        drop(rx);

        assert!(matches!(
            conn.send_text("x".to_string()),
            Err(Error::ConnectionClosed)
        ));
    }
}
