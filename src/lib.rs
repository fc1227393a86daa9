//! wsrelay - browser WebSocket to named-operation relay
//!
//! This is the convenience crate on top of the workspace. It re-exports the
//! sub-crates and adds what a stock `wsrelay` process needs: the built-in
//! operation registry and the configuration layer.
//!
//! # Architecture
//!
//! - **wsrelay-core**: Envelopes, codec, error taxonomy, observability
//! - **wsrelay-server**: Dispatcher, client gateway, backend socket, index page
//! - **wsrelay** (this crate): `count`, configuration, the `wsrelay` binary
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use wsrelay::{methods::default_registry, RelayServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = RelayServer::builder()
//!         .bind_str("127.0.0.1:8001")?
//!         .backend("127.0.0.1:5555".parse::<std::net::SocketAddr>()?)
//!         .http("127.0.0.1:8000".parse::<std::net::SocketAddr>()?)
//!         .dispatcher(default_registry())
//!         .build()
//!         .await?;
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub use wsrelay_core as core;
pub use wsrelay_server as server;

pub use wsrelay_core::{
    codec, CallEnvelope, DiagnosticMode, Error, ObservabilityConfig, Params, ReplyEnvelope,
    Result,
};
pub use wsrelay_server::{
    from_blocking_fn, from_fn, from_typed_fn, Dispatcher, Handler, RelayServer, ServerBuilder,
};

pub mod config;
pub mod methods;
