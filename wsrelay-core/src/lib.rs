//! Core types and codec for wsrelay
//!
//! This crate holds everything both ends of a relay agree on:
//!
//! - **Envelopes**: the `{method, params, id}` call and `{result, error, id}` reply
//! - **Codec**: text encoding and decoding with error mapping
//! - **Error handling**: the error taxonomy and diagnostic rendering policy
//! - **Observability**: subscriber and OpenTelemetry bootstrap
//!
//! It knows nothing about sockets. The `wsrelay-server` crate builds the
//! dispatcher and transports on top of it.
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use wsrelay_core::{codec, ReplyEnvelope};
//!
//! let call = codec::decode_call(r#"{"method":"count","params":{"stop":3},"id":1}"#).unwrap();
//! let reply = ReplyEnvelope::success(json!([0, 1, 2]), call.id);
//!
//! let text = codec::encode_reply(&reply).unwrap();
//! assert_eq!(text, r#"{"result":[0,1,2],"error":null,"id":1}"#);
//! ```

pub mod codec;
pub mod envelope;
pub mod error;
pub mod observability;

pub use envelope::{CallEnvelope, Params, ReplyEnvelope};
pub use error::{DiagnosticMode, Error, Result};
pub use observability::{init_observability, ObservabilityConfig, ObservabilityGuard};
