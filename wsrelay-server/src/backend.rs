//! Backend socket: request/response ingress over plain TCP
//!
//! A second way into the same dispatcher, meant for local processes rather
//! than browsers. A request is one JSON document; it ends where the document
//! ends, so compact and pretty-printed calls are both accepted:
//!
//! ```text
//! -> {"method":"count","params":{"stop":3},"id":1}
//! <- {"result":[0,1,2],"error":null,"id":1}
//! ```
//!
//! Replies are written compact, each followed by a newline, so line-oriented
//! peers can read them with `readline`.
//!
//! Each connection has at most one outstanding request: the next document is
//! not read until the reply to the current one has been written. Whitespace
//! between documents is skipped. Text that is not JSON is answered with one
//! error reply per line. A document larger than [`MAX_MESSAGE_SIZE`] gets an
//! error reply and the connection is closed. EOF or an I/O error closes that
//! connection and nothing else.

use std::sync::Arc;

use serde::de::IgnoredAny;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use wsrelay_core::{Error, Result};

use crate::dispatcher::Dispatcher;
use crate::metrics::{ServerMetrics, BACKEND_INGRESS};

/// Largest request the backend socket buffers, matching the gateway's
/// WebSocket message limit
pub const MAX_MESSAGE_SIZE: usize = 64 << 20;

const READ_CHUNK: usize = 8 * 1024;

/// Handle a single backend socket connection
#[tracing::instrument(skip(stream, dispatcher, metrics), fields(conn_id = conn_id))]
pub async fn handle_backend_connection(
    stream: TcpStream,
    conn_id: u64,
    dispatcher: Dispatcher,
    metrics: Option<Arc<ServerMetrics>>,
) -> Result<()> {
    if let Some(ref m) = metrics {
        m.record_connection(BACKEND_INGRESS);
    }
    tracing::info!("Backend peer connected");

    let result = serve_documents(stream, &dispatcher, MAX_MESSAGE_SIZE).await;

    if let Err(ref e) = result {
        tracing::error!(error = %e, "Backend connection failed");
        if let Some(ref m) = metrics {
            m.record_error(e.kind());
        }
    }
    if let Some(ref m) = metrics {
        m.record_disconnection(BACKEND_INGRESS);
    }
    tracing::info!("Backend connection closed");

    result
}

/// Where the next request in the read buffer ends
#[derive(Debug, PartialEq, Eq)]
enum Frame {
    /// A complete JSON document of this many bytes
    Document(usize),
    /// Bytes that cannot be JSON, up to and including the next newline
    Garbage(usize),
    /// More input is needed
    Incomplete,
}

/// Find the next request at the start of `buf`, which holds no leading
/// whitespace
fn next_frame(buf: &[u8], eof: bool) -> Frame {
    let mut documents = serde_json::Deserializer::from_slice(buf).into_iter::<IgnoredAny>();

    match documents.next() {
        None => Frame::Incomplete,
        Some(Ok(_)) => {
            let end = documents.byte_offset();
            // A bare number at the end of the buffer may still have digits in flight
            if end == buf.len() && !eof && buf[end - 1].is_ascii_digit() {
                Frame::Incomplete
            } else {
                Frame::Document(end)
            }
        }
        Some(Err(e)) if e.is_eof() => {
            if eof {
                Frame::Garbage(buf.len())
            } else {
                Frame::Incomplete
            }
        }
        Some(Err(_)) => match buf.iter().position(|&b| b == b'\n') {
            Some(newline) => Frame::Garbage(newline + 1),
            None if eof => Frame::Garbage(buf.len()),
            None => Frame::Incomplete,
        },
    }
}

async fn serve_documents(
    stream: TcpStream,
    dispatcher: &Dispatcher,
    max_message_size: usize,
) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    let mut buf: Vec<u8> = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];
    let mut eof = false;

    loop {
        let blank = buf.iter().take_while(|b| b.is_ascii_whitespace()).count();
        buf.drain(..blank);

        let frame = if buf.is_empty() {
            Frame::Incomplete
        } else {
            next_frame(&buf, eof)
        };

        match frame {
            Frame::Document(len) | Frame::Garbage(len) => {
                let text = String::from_utf8_lossy(&buf[..len]).trim_end().to_string();
                buf.drain(..len);

                tracing::debug!(len = text.len(), "Received backend request");
                let reply = dispatcher.relay(&text).await?;
                write_reply(&mut writer, reply).await?;
            }
            Frame::Incomplete if eof => return Ok(()),
            Frame::Incomplete if buf.len() > max_message_size => {
                tracing::warn!(buffered = buf.len(), "Backend request too large, closing");
                let refusal = Error::MalformedEnvelope {
                    reason: format!("message exceeds {} bytes", max_message_size),
                    id: Value::Null,
                };
                let reply = dispatcher.refuse(&refusal)?;
                write_reply(&mut writer, reply).await?;
                return Ok(());
            }
            Frame::Incomplete => {
                let n = reader
                    .read(&mut chunk)
                    .await
                    .map_err(|e| Error::Io(e.to_string()))?;
                if n == 0 {
                    eof = true;
                } else {
                    buf.extend_from_slice(&chunk[..n]);
                }
            }
        }
    }
}

async fn write_reply(writer: &mut OwnedWriteHalf, mut reply: String) -> Result<()> {
    reply.push('\n');
    writer
        .write_all(reply.as_bytes())
        .await
        .map_err(|e| Error::Io(e.to_string()))?;
    writer.flush().await.map_err(|e| Error::Io(e.to_string()))
}
