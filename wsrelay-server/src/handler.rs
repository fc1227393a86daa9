//! Operation handlers
//!
//! A handler is the callable behind one name in the dispatcher's registry.
//! It receives the call's named arguments and produces a JSON value or a
//! structured failure.
//!
//! # Creating Handlers
//!
//! 1. **from_fn**: async closure over the raw `Params` map
//! 2. **from_typed_fn**: async closure over a `Deserialize` parameter struct
//! 3. **from_blocking_fn**: synchronous closure run on tokio's blocking pool
//!
//! Typed handlers bind arguments by name the way serde binds struct fields:
//! a missing field, a value of the wrong type, or (with
//! `#[serde(deny_unknown_fields)]`) an unexpected name all become
//! `Error::InvalidParams`.
//!
//! # Examples
//!
//! ```rust
//! use serde::Deserialize;
//! use wsrelay_server::{from_fn, from_typed_fn};
//!
//! let ping = from_fn(|_params| async move { Ok(serde_json::json!("pong")) });
//!
//! #[derive(Deserialize)]
//! #[serde(deny_unknown_fields)]
//! struct AddParams { a: i64, b: i64 }
//!
//! let add = from_typed_fn(|p: AddParams| async move { Ok(p.a + p.b) });
//! ```

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use wsrelay_core::{Error, Params, Result};

/// Boxed future returned by every handler
///
/// Boxing gives every handler the same type so they can share one registry.
pub type HandlerResult = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;

/// Trait for registered operations
///
/// Handlers are shared by every connection, hence `Send + Sync`. Most code
/// never implements this directly and uses one of the constructor functions
/// in this module instead.
pub trait Handler: Send + Sync {
    /// Run the operation with the call's named arguments
    ///
    /// `Err` values are turned into error replies by the dispatcher; they
    /// never reach the transport.
    fn handle(&self, params: Params) -> HandlerResult;
}

/// Adapts an async function over raw `Params` into a `Handler`
pub struct AsyncHandler<F, Fut>
where
    F: Fn(Params) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    func: F,
}

impl<F, Fut> AsyncHandler<F, Fut>
where
    F: Fn(Params) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    /// Create a new async handler from a function
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F, Fut> Handler for AsyncHandler<F, Fut>
where
    F: Fn(Params) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    fn handle(&self, params: Params) -> HandlerResult {
        Box::pin((self.func)(params))
    }
}

/// Create a handler from an async function over raw named arguments
///
/// ```rust
/// use wsrelay_server::from_fn;
///
/// let echo = from_fn(|params| async move { Ok(serde_json::Value::Object(params)) });
/// ```
pub fn from_fn<F, Fut>(func: F) -> Box<dyn Handler>
where
    F: Fn(Params) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Box::new(AsyncHandler::new(func))
}

/// Create a handler from an async function with typed parameters
///
/// # Error Handling
///
/// - Arguments that cannot be bound to `P`: `Error::InvalidParams`
/// - A return value that cannot be serialized: `Error::Serialization`
/// - Errors returned by `func` pass through unchanged
///
/// A parameterless operation can take `()` and will accept an empty or
/// absent `params`.
pub fn from_typed_fn<P, R, F, Fut>(func: F) -> Box<dyn Handler>
where
    P: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    let func = Arc::new(func);

    from_fn(move |params: Params| {
        let func = Arc::clone(&func);
        async move {
            let params: P = bind(params)?;
            let result = func(params).await?;
            to_value(result)
        }
    })
}

/// Create a handler from a synchronous function run on the blocking pool
///
/// Use this for operations that compute for a long time or call blocking
/// APIs. The dispatcher awaits the result without occupying a runtime worker
/// thread, so other connections keep being served.
///
/// A panic inside `func` is reported as `Error::Panicked`.
///
/// ```rust
/// use serde::Deserialize;
/// use wsrelay_server::from_blocking_fn;
///
/// #[derive(Deserialize)]
/// struct SumParams { numbers: Vec<i64> }
///
/// let slow_sum = from_blocking_fn(|p: SumParams| Ok(p.numbers.iter().sum::<i64>()));
/// ```
pub fn from_blocking_fn<P, R, F>(func: F) -> Box<dyn Handler>
where
    P: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    F: Fn(P) -> Result<R> + Send + Sync + 'static,
{
    let func = Arc::new(func);

    from_fn(move |params: Params| {
        let func = Arc::clone(&func);
        async move {
            let params: P = bind(params)?;
            let result = tokio::task::spawn_blocking(move || func(params))
                .await
                .map_err(|e| {
                    if e.is_panic() {
                        Error::Panicked(panic_message(e.into_panic().as_ref()))
                    } else {
                        Error::Invocation("operation was cancelled".to_string())
                    }
                })??;
            to_value(result)
        }
    })
}

/// Bind named arguments to a parameter type
///
/// Empty arguments fall back to `null` so that `()` and `Option<_>`
/// parameter types accept parameterless calls.
fn bind<P: DeserializeOwned>(params: Params) -> Result<P> {
    let empty = params.is_empty();
    match serde_json::from_value(Value::Object(params)) {
        Ok(bound) => Ok(bound),
        Err(first) if empty => {
            serde_json::from_value(Value::Null).map_err(|_| Error::InvalidParams(first.to_string()))
        }
        Err(e) => Err(Error::InvalidParams(e.to_string())),
    }
}

fn to_value<R: Serialize>(result: R) -> Result<Value> {
    serde_json::to_value(result).map_err(|e| Error::Serialization(e.to_string()))
}

/// Extract a readable message from a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
