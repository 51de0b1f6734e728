use std::future::Future;
use std::time::Duration;

use crate::error::{Result, ResultExt, ShutterError};

/// Run one external call under `timeout`, tagging failures with `op`.
///
/// Dropping the returned future aborts the call in flight.
pub async fn bounded<T, F>(timeout: Duration, op: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(res) => res.op(op),
        Err(_) => Err(ShutterError::Timeout { op: op.to_string() }),
    }
}
