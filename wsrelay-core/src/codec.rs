//! Encoding and decoding of envelopes
//!
//! Thin wrappers around `serde_json` that map failures onto the relay's
//! error taxonomy:
//!
//! - Inbound call text that cannot be read → `Error::MalformedEnvelope`
//! - Anything else that fails to (de)serialize → `Error::Serialization`
//!
//! `decode_call` does a little more than `serde_json::from_str`: when the
//! text is a JSON object that is not a valid call, it still pulls out the
//! `id` member so the error reply can be correlated by the client.
//!
//! # Examples
//!
//! ```rust
//! use serde_json::json;
//! use wsrelay_core::{codec, Error};
//!
//! let call = codec::decode_call(r#"{"method":"count","params":{"stop":2},"id":9}"#).unwrap();
//! assert_eq!(call.method, "count");
//!
//! match codec::decode_call(r#"{"params":{},"id":9}"#) {
//!     Err(Error::MalformedEnvelope { id, .. }) => assert_eq!(id, json!(9)),
//!     other => panic!("unexpected: {:?}", other),
//! }
//! ```

use crate::envelope::{CallEnvelope, ReplyEnvelope};
use crate::error::{Error, Result};
use serde::Serialize;
use serde_json::Value;

/// Encode any serializable value to a JSON string
pub fn encode<T: Serialize>(msg: &T) -> Result<String> {
    serde_json::to_string(msg).map_err(|e| Error::Serialization(e.to_string()))
}

/// Encode a call envelope to a JSON string
pub fn encode_call(call: &CallEnvelope) -> Result<String> {
    encode(call)
}

/// Encode a reply envelope to a JSON string
pub fn encode_reply(reply: &ReplyEnvelope) -> Result<String> {
    encode(reply)
}

/// Decode inbound text into a call envelope
///
/// # Errors
///
/// Returns `Error::MalformedEnvelope` when the text is not JSON, is not a
/// JSON object, or is an object without the required shape. The error's `id`
/// is the object's `id` member when there is one, `null` otherwise.
pub fn decode_call(text: &str) -> Result<CallEnvelope> {
    let value: Value = serde_json::from_str(text).map_err(|e| Error::MalformedEnvelope {
        reason: format!("invalid JSON: {}", e),
        id: Value::Null,
    })?;

    let id = match &value {
        Value::Object(map) => map.get("id").cloned().unwrap_or(Value::Null),
        _ => {
            return Err(Error::MalformedEnvelope {
                reason: "expected a JSON object".to_string(),
                id: Value::Null,
            })
        }
    };

    serde_json::from_value(value).map_err(|e| Error::MalformedEnvelope {
        reason: e.to_string(),
        id,
    })
}

/// Decode reply text, as read by a client of the relay
pub fn decode_reply(text: &str) -> Result<ReplyEnvelope> {
    serde_json::from_str(text).map_err(|e| Error::Serialization(e.to_string()))
}
