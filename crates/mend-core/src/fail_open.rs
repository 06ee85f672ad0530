//! Fail-open helper for infrastructure side effects
//!
//! Activity logging and telemetry delivery must never change the outcome of a
//! plan run. Wrap them with [`fail_open`] so that an error is logged and
//! dropped.
//!
//! Do not use this for worker execution or recovery: those failures carry
//! meaning and are folded into step results and incidents instead.

use std::future::Future;
use tracing::warn;

use crate::Result;

/// Run an infrastructure operation, logging and discarding any error
///
/// ```no_run
/// use mend_core::fail_open::fail_open;
/// use mend_core::Result;
///
/// async fn append_log() -> Result<()> {
///     Ok(())
/// }
///
/// async fn example() {
///     let written = fail_open("activity_log", || append_log()).await;
///     // written is None if append_log() failed
/// }
/// ```
pub async fn fail_open<F, Fut, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (fail-open): {}", operation_name, e);
            None
        }
    }
}
