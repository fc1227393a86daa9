//! Relay server: client gateway, backend socket and dispatcher
//!
//! This crate turns a registry of named operations into a running service
//! with up to three listeners:
//!
//! - **Client gateway**: WebSocket connections from browsers
//! - **Backend socket**: a stream of JSON documents over plain TCP
//! - **Index page**: an HTTP page that tells the browser where the gateway is
//!
//! Both message ingresses feed the same [`Dispatcher`], so a call produces
//! the same reply whichever way it arrives.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use serde::Deserialize;
//! use wsrelay_server::{from_typed_fn, RelayServer};
//!
//! #[derive(Deserialize)]
//! #[serde(deny_unknown_fields)]
//! struct AddParams { a: i64, b: i64 }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = RelayServer::builder()
//!         .bind_str("127.0.0.1:8001")?
//!         .handler("add", from_typed_fn(|p: AddParams| async move { Ok(p.a + p.b) }))
//!         .build()
//!         .await?;
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Accept loops**: one per listener, each assigning connection ids
//! - **Connection tasks**: one per connection; messages on a connection are
//!   handled strictly in arrival order
//! - **Dispatcher**: shared read-only registry; contains every failure,
//!   including panics, as an error reply
//!
//! A failing or misbehaving connection never affects another one.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use wsrelay_core::{Error, Result};

mod backend;
mod builder;
mod dispatcher;
mod gateway;
mod handler;
mod metrics;
pub mod page;

pub use backend::handle_backend_connection;
pub use builder::ServerBuilder;
pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use gateway::{handle_connection, Connection};
pub use handler::{from_blocking_fn, from_fn, from_typed_fn, AsyncHandler, Handler, HandlerResult};
pub use metrics::{ServerMetrics, BACKEND_INGRESS, GATEWAY_INGRESS};

/// Pause after a failed `accept()` before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Running HTTP server future for the index page
pub(crate) type HttpServer = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A relay server with all of its listeners bound
///
/// # Lifecycle
///
/// 1. **Build**: `RelayServer::builder()` binds every configured listener
/// 2. **Inspect**: `local_addr()` and friends report the bound addresses
/// 3. **Run**: `run()` serves until the task is dropped; a failed `accept()`
///    is logged and retried, never fatal
pub struct RelayServer {
    /// Listener for WebSocket clients
    gateway: TcpListener,
    /// Listener for backend peers, if enabled
    backend: Option<TcpListener>,
    /// Bound index page server, if enabled
    http: Option<(SocketAddr, HttpServer)>,
    /// Operation registry shared by both ingresses
    dispatcher: Dispatcher,
    /// Optional OpenTelemetry instruments
    metrics: Option<Arc<ServerMetrics>>,
}

impl RelayServer {
    /// Create a new server builder
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Address the client gateway is bound to
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.gateway.local_addr()
    }

    /// Address the backend socket is bound to, if enabled
    pub fn backend_addr(&self) -> Option<SocketAddr> {
        self.backend
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
    }

    /// Address the index page is served on, if enabled
    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.http.as_ref().map(|(addr, _)| *addr)
    }

    /// The dispatcher both ingresses use
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Serve all listeners
    ///
    /// Runs until the task is dropped. Each connection is handled in its own
    /// task, so connection-level errors are logged and never end the server;
    /// a failed `accept()` is logged, counted and retried.
    ///
    /// # Errors
    ///
    /// None today: the accept loops absorb their own failures.
    #[tracing::instrument(skip(self), name = "server.run")]
    pub async fn run(self) -> Result<()> {
        tracing::info!("Starting wsrelay server");

        let RelayServer {
            gateway,
            backend,
            http,
            dispatcher,
            metrics,
        } = self;

        let gateway_loop = accept_gateway(gateway, dispatcher.clone(), metrics.clone());

        let backend_loop = async {
            match backend {
                Some(listener) => accept_backend(listener, dispatcher.clone(), metrics.clone()).await,
                None => Ok(()),
            }
        };

        let http_loop = async move {
            if let Some((addr, server)) = http {
                tracing::debug!(addr = %addr, "Serving index page");
                server.await;
            }
            Ok::<(), Error>(())
        };

        tokio::try_join!(gateway_loop, backend_loop, http_loop)?;
        Ok(())
    }
}

async fn accept_gateway(
    listener: TcpListener,
    dispatcher: Dispatcher,
    metrics: Option<Arc<ServerMetrics>>,
) -> Result<()> {
    let conn_counter = AtomicU64::new(0);

    loop {
        let (stream, addr) = next_connection(|| listener.accept(), metrics.as_deref()).await;
        let conn_id = conn_counter.fetch_add(1, Ordering::SeqCst);
        let dispatcher = dispatcher.clone();
        let metrics = metrics.clone();

        tracing::info!(conn_id = conn_id, addr = %addr, "New client connection accepted");

        tokio::spawn(async move {
            if let Err(e) = gateway::handle_connection(stream, conn_id, dispatcher, metrics.clone()).await {
                tracing::error!(conn_id = conn_id, error = %e, "Connection error");
                if let Some(ref m) = metrics {
                    m.record_error(e.kind());
                }
            }
        });
    }
}

async fn accept_backend(
    listener: TcpListener,
    dispatcher: Dispatcher,
    metrics: Option<Arc<ServerMetrics>>,
) -> Result<()> {
    let conn_counter = AtomicU64::new(0);

    loop {
        let (stream, addr) = next_connection(|| listener.accept(), metrics.as_deref()).await;
        let conn_id = conn_counter.fetch_add(1, Ordering::SeqCst);
        let dispatcher = dispatcher.clone();
        let metrics = metrics.clone();

        tracing::info!(conn_id = conn_id, addr = %addr, "New backend connection accepted");

        tokio::spawn(async move {
            // Failures are logged and counted inside the handler
            let _ = backend::handle_backend_connection(stream, conn_id, dispatcher, metrics).await;
        });
    }
}

/// Accept the next connection, retrying after transient failures
///
/// Errors such as `EMFILE` or `ECONNABORTED` only affect the connection
/// being accepted, so they are logged, counted and retried after
/// [`ACCEPT_BACKOFF`].
async fn next_connection<T, F, Fut>(mut accept: F, metrics: Option<&ServerMetrics>) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(accepted) => return accepted,
            Err(e) => {
                tracing::error!(error = %e, "Failed to accept connection");
                if let Some(m) = metrics {
                    m.record_error("io");
                }
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}
