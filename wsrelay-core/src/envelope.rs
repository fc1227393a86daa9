//! Call and reply envelopes
//!
//! The relay speaks a deliberately small wire format. A client names an
//! operation, hands it named arguments and attaches a correlation token:
//!
//! ```text
//! Request:  { "method": <string>, "params": <object>, "id": <any> }
//! Response: { "result": <any>, "error": <null|true>, "id": <same as request> }
//! ```
//!
//! The reply always has the same three fields. A failure does not change the
//! shape, only what `result` means: the return value on success, a diagnostic
//! string when `error` is `true`.
//!
//! # Correlation ids
//!
//! `id` is kept as a raw `serde_json::Value`. The relay never looks inside it,
//! so anything a client chooses to send (a number, a string, an object, or
//! nothing at all) comes back byte-for-byte equivalent.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Named arguments of a call
pub type Params = serde_json::Map<String, Value>;

/// A request to run a named operation
///
/// Missing or `null` `params` decode to an empty map, and a missing `id`
/// decodes to `null`, so `{"method": "ping"}` is a valid parameterless call.
///
/// # Examples
///
/// ```rust
/// use serde_json::json;
/// use wsrelay_core::CallEnvelope;
///
/// let call: CallEnvelope =
///     serde_json::from_value(json!({"method": "count", "params": {"stop": 3}, "id": 1})).unwrap();
/// assert_eq!(call.method, "count");
/// assert_eq!(call.params["stop"], json!(3));
/// assert_eq!(call.id, json!(1));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallEnvelope {
    /// Name of the registered operation to run
    pub method: String,
    /// Arguments bound to the operation's parameters by name
    #[serde(default, deserialize_with = "params_or_empty")]
    pub params: Params,
    /// Opaque correlation token echoed into the reply
    #[serde(default)]
    pub id: Value,
}

impl CallEnvelope {
    /// Create a new call envelope
    pub fn new(method: impl Into<String>, params: Params, id: impl Into<Value>) -> Self {
        Self {
            method: method.into(),
            params,
            id: id.into(),
        }
    }
}

fn params_or_empty<'de, D>(deserializer: D) -> Result<Params, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Params>::deserialize(deserializer)?.unwrap_or_default())
}

/// The answer to exactly one [`CallEnvelope`]
///
/// `error` is a plain flag in memory. On the wire it is written as `null` for
/// success and `true` for failure; when reading replies from other producers
/// `false` and `0` are also accepted as success and any other number as
/// failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    /// Return value, or a diagnostic string when `error` is set
    pub result: Value,
    /// Failure marker
    #[serde(
        default,
        serialize_with = "serialize_error_flag",
        deserialize_with = "deserialize_error_flag"
    )]
    pub error: bool,
    /// Correlation token copied from the call
    #[serde(default)]
    pub id: Value,
}

impl ReplyEnvelope {
    /// Create a successful reply
    pub fn success(result: Value, id: Value) -> Self {
        Self {
            result,
            error: false,
            id,
        }
    }

    /// Create a failed reply carrying a diagnostic string
    pub fn failure(diagnostic: impl Into<String>, id: Value) -> Self {
        Self {
            result: Value::String(diagnostic.into()),
            error: true,
            id,
        }
    }

    /// Check if this reply reports success
    pub fn is_success(&self) -> bool {
        !self.error
    }

    /// Check if this reply reports a failure
    pub fn is_error(&self) -> bool {
        self.error
    }
}

fn serialize_error_flag<S>(error: &bool, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    if *error {
        serializer.serialize_bool(true)
    } else {
        serializer.serialize_none()
    }
}

fn deserialize_error_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{Error as _, Unexpected};

    match Value::deserialize(deserializer)? {
        Value::Null => Ok(false),
        Value::Bool(flag) => Ok(flag),
        Value::Number(n) => Ok(n.as_f64().map(|f| f != 0.0).unwrap_or(true)),
        other => Err(D::Error::invalid_type(
            match &other {
                Value::String(s) => Unexpected::Str(s),
                Value::Array(_) => Unexpected::Seq,
                _ => Unexpected::Map,
            },
            &"null, a boolean or a number",
        )),
    }
}
