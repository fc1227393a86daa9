//! Error types for wsrelay
//!
//! A single `Error` enum covers everything that can go wrong between reading
//! a message off a transport and writing the reply back:
//!
//! - **Envelope errors**: `MalformedEnvelope` (the text is not a call)
//! - **Dispatch errors**: `UnknownMethod`, `InvalidParams`, `Invocation`, `Panicked`
//! - **Transport errors**: `WebSocket`, `Io`, `ConnectionClosed`
//! - **Process errors**: `Serialization`, `Config`
//!
//! Dispatch errors never leave the dispatcher as `Err`: they are rendered into
//! a reply envelope with `error: true` and a diagnostic string in `result`.
//! How much detail that string carries is governed by [`DiagnosticMode`].
//!
//! # Examples
//!
//! ```rust
//! use wsrelay_core::{DiagnosticMode, Error};
//!
//! let error = Error::UnknownMethod("doesNotExist".into());
//! assert_eq!(error.kind(), "unknown_method");
//! assert!(error.diagnostic(DiagnosticMode::Full).contains("doesNotExist"));
//! ```

use serde_json::Value;
use thiserror::Error;

/// Result type for wsrelay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Application-level error type for wsrelay operations
///
/// Every variant carries owned strings so the error stays `Clone` and can be
/// logged, counted and turned into a reply without borrowing from the
/// transport that produced it.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Inbound text could not be decoded into a call envelope
    ///
    /// `id` holds the request's correlation id when the text was a JSON
    /// object that still carried one, and `Value::Null` otherwise, so the
    /// error reply can be correlated whenever that is possible at all.
    #[error("Malformed envelope: {reason}")]
    MalformedEnvelope {
        /// What was wrong with the text
        reason: String,
        /// Correlation id salvaged from the raw message
        id: Value,
    },

    /// The method name is not in the operation registry
    #[error("Method not found: {0}")]
    UnknownMethod(String),

    /// The named arguments could not be bound to the operation's parameters
    ///
    /// Covers missing, extra and mistyped arguments, plus argument values an
    /// operation rejects before doing any work.
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// The operation ran and returned a failure
    #[error("Invocation failed: {0}")]
    Invocation(String),

    /// The operation panicked; the panic was caught at the dispatch boundary
    #[error("Operation panicked: {0}")]
    Panicked(String),

    /// Serialization or deserialization error outside envelope decoding
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// WebSocket transport layer error
    ///
    /// Handshake failures, protocol violations and frame errors below the
    /// envelope level.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Input/output error from a socket or the filesystem
    #[error("IO error: {0}")]
    Io(String),

    /// The connection's writer is gone; no further replies can be sent
    #[error("Connection closed")]
    ConnectionClosed,

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Build an `Invocation` error from any error, keeping its source chain
    ///
    /// The message lists the error followed by each `source()` on its own
    /// `caused by:` line, which is the closest thing to a stack trace a
    /// `Result`-based operation can report.
    ///
    /// ```rust
    /// use wsrelay_core::Error;
    ///
    /// let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such counter");
    /// let error = Error::invocation(&io);
    /// assert_eq!(error.to_string(), "Invocation failed: no such counter");
    /// ```
    pub fn invocation(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            message.push_str("\n  caused by: ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        Error::Invocation(message)
    }

    /// Stable snake_case name of the variant, used for log fields and metric labels
    pub fn kind(&self) -> &'static str {
        match self {
            Error::MalformedEnvelope { .. } => "malformed_envelope",
            Error::UnknownMethod(_) => "unknown_method",
            Error::InvalidParams(_) => "invalid_params",
            Error::Invocation(_) => "invocation",
            Error::Panicked(_) => "panicked",
            Error::Serialization(_) => "serialization",
            Error::WebSocket(_) => "websocket",
            Error::Io(_) => "io",
            Error::ConnectionClosed => "connection_closed",
            Error::Config(_) => "config",
        }
    }

    /// Render the diagnostic string that goes into an error reply's `result`
    ///
    /// `Full` returns the complete description. `Redacted` keeps only the
    /// failure category, plus the method name for `UnknownMethod` since the
    /// client supplied it in the first place.
    pub fn diagnostic(&self, mode: DiagnosticMode) -> String {
        match mode {
            DiagnosticMode::Full => self.to_string(),
            DiagnosticMode::Redacted => match self {
                Error::MalformedEnvelope { .. } => "Malformed envelope".to_string(),
                Error::UnknownMethod(method) => format!("Method not found: {}", method),
                Error::InvalidParams(_) => "Invalid params".to_string(),
                Error::Invocation(_) => "Invocation failed".to_string(),
                _ => "Internal error".to_string(),
            },
        }
    }
}

/// How much failure detail error replies expose to the caller
///
/// Replies to trusted tooling benefit from the whole story; replies to
/// untrusted browsers should not describe server internals. The full text is
/// logged either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiagnosticMode {
    /// Send the complete error description, including source chains
    #[default]
    Full,
    /// Send only the failure category
    Redacted,
}
