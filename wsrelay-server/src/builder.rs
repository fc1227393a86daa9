//! Server builder for constructing relay servers
//!
//! The builder binds every listener up front, so a `RelayServer` that was
//! built successfully is guaranteed to own its ports. It lets you:
//! - Set the gateway (WebSocket) bind address, which is required
//! - Optionally add the backend socket and the HTTP index page
//! - Register operations, or hand over a prebuilt `Dispatcher`
//! - Choose the diagnostic policy for error replies
//! - Turn on metric instruments
//!
//! # Examples
//!
//! ```rust,no_run
//! use wsrelay_server::{from_fn, RelayServer};
//!
//! # async fn example() -> wsrelay_core::Result<()> {
//! let server = RelayServer::builder()
//!     .bind_str("0.0.0.0:8001")?
//!     .backend("127.0.0.1:5555".parse::<std::net::SocketAddr>().unwrap())
//!     .http("0.0.0.0:8000".parse::<std::net::SocketAddr>().unwrap())
//!     .handler("ping", from_fn(|_| async { Ok(serde_json::json!("pong")) }))
//!     .metrics("wsrelay")
//!     .build()
//!     .await?;
//!
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use wsrelay_core::{DiagnosticMode, Error, Result};

use crate::page::{self, DEFAULT_INDEX};
use crate::{Dispatcher, Handler, HttpServer, RelayServer, ServerMetrics};

/// Builder for constructing a relay server
pub struct ServerBuilder {
    addr: Option<SocketAddr>,
    backend_addr: Option<SocketAddr>,
    http_addr: Option<SocketAddr>,
    dispatcher: Dispatcher,
    index_template: Option<String>,
    static_dir: Option<PathBuf>,
    service_name: Option<String>,
}

impl ServerBuilder {
    /// Create a new server builder
    pub fn new() -> Self {
        Self {
            addr: None,
            backend_addr: None,
            http_addr: None,
            dispatcher: Dispatcher::new(),
            index_template: None,
            static_dir: None,
            service_name: None,
        }
    }

    /// Set the bind address of the client gateway
    pub fn bind(mut self, addr: impl Into<SocketAddr>) -> Self {
        self.addr = Some(addr.into());
        self
    }

    /// Set the gateway bind address from a string (e.g., "127.0.0.1:8001")
    pub fn bind_str(mut self, addr: &str) -> Result<Self> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| Error::Config(format!("Invalid address: {}", e)))?;
        self.addr = Some(addr);
        Ok(self)
    }

    /// Also listen for backend socket connections on this address
    pub fn backend(mut self, addr: impl Into<SocketAddr>) -> Self {
        self.backend_addr = Some(addr.into());
        self
    }

    /// Also serve the index page over HTTP on this address
    pub fn http(mut self, addr: impl Into<SocketAddr>) -> Self {
        self.http_addr = Some(addr.into());
        self
    }

    /// Register a handler for an operation
    pub fn handler(mut self, method: impl Into<String>, handler: Box<dyn Handler>) -> Self {
        self.dispatcher.register(method, handler);
        self
    }

    /// Use a prebuilt dispatcher, replacing any handlers registered so far
    pub fn dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Set the diagnostic policy for error replies
    pub fn diagnostics(mut self, mode: DiagnosticMode) -> Self {
        self.dispatcher.set_diagnostics(mode);
        self
    }

    /// Replace the built-in index page with a template
    ///
    /// `{{port}}` in the template is replaced with the gateway port.
    pub fn index_template(mut self, template: impl Into<String>) -> Self {
        self.index_template = Some(template.into());
        self
    }

    /// Serve files from this directory under `/static/`
    pub fn static_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.static_dir = Some(dir.into());
        self
    }

    /// Record metrics under this instrumentation scope name
    pub fn metrics(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = Some(service_name.into());
        self
    }

    /// Bind all listeners and build the server
    ///
    /// # Errors
    ///
    /// - `Error::Config` if no gateway address was set
    /// - `Error::Io` if any listener cannot be bound
    pub async fn build(mut self) -> Result<RelayServer> {
        let addr = self
            .addr
            .ok_or_else(|| Error::Config("No gateway bind address specified".to_string()))?;

        let gateway = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Io(format!("gateway {}: {}", addr, e)))?;
        let gateway_addr = gateway.local_addr().map_err(|e| Error::Io(e.to_string()))?;
        tracing::info!(addr = %gateway_addr, "Client gateway listening");

        let metrics = self.service_name.map(|name| Arc::new(ServerMetrics::new(name)));
        if let Some(ref m) = metrics {
            self.dispatcher.set_metrics(Arc::clone(m));
        }

        let backend = match self.backend_addr {
            Some(backend_addr) => {
                let listener = TcpListener::bind(backend_addr)
                    .await
                    .map_err(|e| Error::Io(format!("backend {}: {}", backend_addr, e)))?;
                let bound = listener.local_addr().map_err(|e| Error::Io(e.to_string()))?;
                tracing::info!(addr = %bound, "Backend socket listening");
                Some(listener)
            }
            None => None,
        };

        let http = match self.http_addr {
            Some(http_addr) => {
                let template = self.index_template.as_deref().unwrap_or(DEFAULT_INDEX);
                let rendered = page::render_index(template, gateway_addr.port());
                let routes = page::routes(rendered, self.static_dir);
                let (bound, server) = warp::serve(routes)
                    .try_bind_ephemeral(http_addr)
                    .map_err(|e| Error::Io(format!("http {}: {}", http_addr, e)))?;
                tracing::info!(addr = %bound, "Index page listening");
                let server: HttpServer = Box::pin(server);
                Some((bound, server))
            }
            None => None,
        };

        tracing::info!(methods = ?self.dispatcher.methods(), "Operations registered");

        Ok(RelayServer {
            gateway,
            backend,
            http,
            dispatcher: self.dispatcher,
            metrics,
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
