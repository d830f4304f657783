//! Runtime integration layer.
//!
//! Keeps task spawning and bounded waits in one place so the member and
//! subscription modules only express what they wait for, not how.

pub(crate) mod dispatch;

use crate::error::{Result, StreamError};
use std::future::Future;
use std::time::Duration;

/// Awaits `fut`, failing with [`StreamError::Timeout`] once `timeout` elapses.
///
/// `None` waits forever. The future is dropped on timeout, so callers must
/// only pass futures whose cancellation leaves shared state untouched.
pub(crate) async fn wait_with_timeout<T, F>(
    timeout: Option<Duration>,
    what: &str,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout {
        None => fut.await,
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(res) => res,
            Err(_) => Err(StreamError::timeout(format!(
                "{what} after {}ms",
                limit.as_millis()
            ))),
        },
    }
}
