//! Operation deadlines for network-backed drivers.

use std::future::IntoFuture;
use std::time::Duration;

use crate::error::{CacheError, Result};

/// Awaits `fut`, failing with [`CacheError::Timeout`] once `timeout` elapses.
///
/// A zero timeout waits indefinitely. The pending operation is dropped on
/// timeout, which cancels it on the client side.
pub(crate) async fn bounded<T, E, F>(timeout: Duration, operation: &'static str, fut: F) -> Result<T>
where
    F: IntoFuture<Output = std::result::Result<T, E>>,
    E: Into<CacheError>,
{
    if timeout.is_zero() {
        return fut.await.map_err(Into::into);
    }

    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(CacheError::Timeout { operation, timeout }),
    }
}
