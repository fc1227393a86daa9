//! Built-in operations
//!
//! The registry a stock `wsrelay` process serves. There is one operation,
//! `count`, which behaves like a half-open integer range:
//!
//! | Call | Result |
//! |------|--------|
//! | `count(stop=3)` | `[0, 1, 2]` |
//! | `count(start=2, stop=10, step=3)` | `[2, 5, 8]` |
//! | `count(start=3, stop=0, step=-1)` | `[3, 2, 1]` |
//! | `count(stop=3, step=0)` | error: invalid params |

use serde::Deserialize;
use wsrelay_core::{Error, Result};
use wsrelay_server::{from_typed_fn, Dispatcher};

/// Largest number of values a single `count` call may return
pub const MAX_COUNT: usize = 10_000;

/// Named arguments of `count`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CountParams {
    /// First value, inclusive
    #[serde(default)]
    pub start: i64,
    /// Bound, exclusive
    pub stop: i64,
    /// Distance between values; negative counts down
    #[serde(default = "default_step")]
    pub step: i64,
}

fn default_step() -> i64 {
    1
}

/// Integers from `start` towards `stop` (exclusive), `step` apart
///
/// # Errors
///
/// `Error::InvalidParams` when `step` is zero or the result would hold more
/// than [`MAX_COUNT`] values.
pub fn count(params: CountParams) -> Result<Vec<i64>> {
    if params.step == 0 {
        return Err(Error::InvalidParams("step must not be zero".to_string()));
    }

    // i128 keeps the span computation exact across the whole i64 range
    let start = i128::from(params.start);
    let stop = i128::from(params.stop);
    let step = i128::from(params.step);

    let span = if step > 0 { stop - start } else { start - stop };
    let len = if span > 0 {
        (span + step.abs() - 1) / step.abs()
    } else {
        0
    };

    if len > MAX_COUNT as i128 {
        return Err(Error::InvalidParams(format!(
            "count would produce {} values, more than the limit of {}",
            len, MAX_COUNT
        )));
    }

    Ok((0..len).map(|i| (start + i * step) as i64).collect())
}

/// Dispatcher holding every built-in operation
pub fn default_registry() -> Dispatcher {
    Dispatcher::builder()
        .handler(
            "count",
            from_typed_fn(|params: CountParams| async move { count(params) }),
        )
        .build()
}
