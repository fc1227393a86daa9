//! Name-based call dispatch
//!
//! The dispatcher owns the operation registry and is the fault-isolation
//! point of the relay: whatever happens inside an operation, the caller gets
//! back exactly one [`ReplyEnvelope`], and nothing propagates to the
//! connection or the process.
//!
//! # Failure Handling
//!
//! | Failure | Reply `result` (full diagnostics) |
//! |---------|-----------------------------------|
//! | Unregistered method | `Method not found: <name> (available: ...)` |
//! | Arguments don't bind | `Invalid params: <serde message>` |
//! | Operation returns `Err` | `Invocation failed: <error and causes>` |
//! | Operation panics | `Operation panicked: <panic message>` |
//! | Text isn't a call | `Malformed envelope: <reason>` |
//!
//! Each failure is logged at `warn` with its full text regardless of the
//! configured [`DiagnosticMode`].
//!
//! # Thread Safety
//!
//! The registry is an `Arc<HashMap>`: cloning a dispatcher is cheap and every
//! connection task holds its own clone. Registration happens before the
//! server starts; nothing mutates the map afterwards.
//!
//! # Examples
//!
//! ```rust
//! use serde_json::json;
//! use wsrelay_server::{from_fn, Dispatcher};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let dispatcher = Dispatcher::builder()
//!     .handler("ping", from_fn(|_| async { Ok(json!("pong")) }))
//!     .build();
//!
//! let reply = dispatcher.relay(r#"{"method":"ping","params":{},"id":1}"#).await.unwrap();
//! assert_eq!(reply, r#"{"result":"pong","error":null,"id":1}"#);
//! # }
//! ```

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use serde_json::Value;
use wsrelay_core::{codec, CallEnvelope, DiagnosticMode, Error, Params, ReplyEnvelope, Result};

use crate::handler::{panic_message, Handler};
use crate::metrics::ServerMetrics;

/// Operation registry plus the policy for turning failures into replies
#[derive(Clone)]
pub struct Dispatcher {
    /// Map of operation names to their handlers
    handlers: Arc<HashMap<String, Arc<dyn Handler>>>,
    /// How much failure detail replies carry
    diagnostics: DiagnosticMode,
    /// Call and error instruments, when the server records metrics
    metrics: Option<Arc<ServerMetrics>>,
}

impl Dispatcher {
    /// Create a dispatcher with an empty registry
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(HashMap::new()),
            diagnostics: DiagnosticMode::default(),
            metrics: None,
        }
    }

    /// Start building a dispatcher
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// Register a handler under an operation name
    ///
    /// Registering the same name twice replaces the earlier handler.
    pub fn register(&mut self, method: impl Into<String>, handler: Box<dyn Handler>) {
        let handlers = Arc::make_mut(&mut self.handlers);
        handlers.insert(method.into(), Arc::from(handler));
    }

    /// Set the diagnostic policy for error replies
    pub fn set_diagnostics(&mut self, mode: DiagnosticMode) {
        self.diagnostics = mode;
    }

    /// Current diagnostic policy
    pub fn diagnostics(&self) -> DiagnosticMode {
        self.diagnostics
    }

    /// Attach metric instruments
    pub fn set_metrics(&mut self, metrics: Arc<ServerMetrics>) {
        self.metrics = Some(metrics);
    }

    /// Get the handler for an operation
    pub fn get(&self, method: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(method).cloned()
    }

    /// Check if an operation is registered
    pub fn has_method(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// Registered operation names, sorted
    pub fn methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.handlers.keys().cloned().collect();
        methods.sort();
        methods
    }

    /// Run an operation and return its raw outcome
    ///
    /// Panics inside the handler are caught and returned as
    /// `Error::Panicked`.
    pub async fn invoke(&self, method: &str, params: Params) -> Result<Value> {
        let handler = self
            .get(method)
            .ok_or_else(|| Error::UnknownMethod(method.to_string()))?;

        AssertUnwindSafe(async move { handler.handle(params).await })
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(Error::Panicked(panic_message(payload.as_ref()))))
    }

    /// Dispatch a decoded call and build its reply
    ///
    /// Never fails: every outcome, including a panic inside the operation,
    /// becomes a reply carrying the call's `id`.
    #[tracing::instrument(skip(self, envelope), fields(method = %envelope.method))]
    pub async fn dispatch(&self, envelope: CallEnvelope) -> ReplyEnvelope {
        let CallEnvelope { method, params, id } = envelope;
        let start = Instant::now();

        let outcome = self.invoke(&method, params).await;

        if let Some(ref m) = self.metrics {
            let status = if outcome.is_ok() { "success" } else { "error" };
            // Unregistered names would otherwise give clients unbounded label cardinality
            let label = if self.has_method(&method) {
                method.as_str()
            } else {
                "unknown"
            };
            m.record_call(label, status, start.elapsed().as_secs_f64());
        }

        match outcome {
            Ok(result) => {
                tracing::debug!(elapsed_us = start.elapsed().as_micros() as u64, "Call succeeded");
                ReplyEnvelope::success(result, id)
            }
            Err(e) => self.reject(&e, id),
        }
    }

    /// Decode call text, dispatch it and encode the reply
    ///
    /// This is the whole per-message path shared by the client gateway and
    /// the backend socket. Text that is not a valid call still gets an error
    /// reply, correlated with the `id` member when one could be read.
    ///
    /// # Errors
    ///
    /// Only `Error::Serialization`, if a reply cannot be encoded.
    pub async fn relay(&self, text: &str) -> Result<String> {
        let call = match codec::decode_call(text) {
            Ok(call) => call,
            Err(e) => return self.refuse(&e),
        };

        codec::encode_reply(&self.dispatch(call).await)
    }

    /// Encode the error reply for input that never became a call
    ///
    /// The reply carries the `id` salvaged into a `MalformedEnvelope`, or
    /// `null` for any other error.
    pub fn refuse(&self, error: &Error) -> Result<String> {
        let id = match error {
            Error::MalformedEnvelope { id, .. } => id.clone(),
            _ => Value::Null,
        };
        codec::encode_reply(&self.reject(error, id))
    }

    /// Log a failure and turn it into an error reply
    fn reject(&self, error: &Error, id: Value) -> ReplyEnvelope {
        tracing::warn!(kind = error.kind(), error = %error, "Call failed");

        if let Some(ref m) = self.metrics {
            m.record_error(error.kind());
        }

        let mut diagnostic = error.diagnostic(self.diagnostics);
        if let (DiagnosticMode::Full, Error::UnknownMethod(_)) = (self.diagnostics, error) {
            diagnostic.push_str(&format!(" (available: {})", self.methods().join(", ")));
        }

        ReplyEnvelope::failure(diagnostic, id)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for constructing a dispatcher
pub struct DispatcherBuilder {
    dispatcher: Dispatcher,
}

impl DispatcherBuilder {
    /// Create a new dispatcher builder
    pub fn new() -> Self {
        Self {
            dispatcher: Dispatcher::new(),
        }
    }

    /// Add a handler for an operation
    pub fn handler(mut self, method: impl Into<String>, handler: Box<dyn Handler>) -> Self {
        self.dispatcher.register(method, handler);
        self
    }

    /// Set the diagnostic policy
    pub fn diagnostics(mut self, mode: DiagnosticMode) -> Self {
        self.dispatcher.set_diagnostics(mode);
        self
    }

    /// Build the dispatcher
    pub fn build(self) -> Dispatcher {
        self.dispatcher
    }
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}
