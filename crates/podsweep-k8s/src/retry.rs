use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::ClusterError;

/// Pause before the single retry of a transient failure
pub const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Run `op`, retrying once after `backoff` if it fails with a transient error.
pub async fn retry_transient<T, F, Fut>(
    what: &str,
    backoff: Duration,
    mut op: F,
) -> Result<T, ClusterError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClusterError>>,
{
    match op().await {
        Err(err) if err.is_transient() => {
            warn!(operation = what, error = %err, "transient failure, retrying once");
            tokio::time::sleep(backoff).await;
            op().await
        }
        other => other,
    }
}
