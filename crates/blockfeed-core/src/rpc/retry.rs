use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::RpcError;

use super::protocol::DaemonError;

/// Fixed backoffs applied by [`RpcClient`](super::RpcClient).
///
/// Retries are unbounded: the daemon is a trusted, usually co-located peer
/// that is expected to come back. The only way out of a retry loop is the
/// shutdown signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wait after a transport failure (connection, malformed body, timeout).
    pub transport_backoff: Duration,
    /// Wait after the daemon reports it is still warming up.
    pub warmup_backoff: Duration,
    /// Wait after any other daemon error. Zero resends at once.
    pub error_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            transport_backoff: Duration::from_secs(1),
            warmup_backoff: Duration::from_secs(10),
            error_backoff: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// Backoff for a failed call given every daemon error it produced.
    ///
    /// A single warm-up error anywhere in a batch outranks all other errors.
    pub fn daemon_backoff(&self, errors: &[DaemonError]) -> Duration {
        if errors.iter().any(DaemonError::is_warmup) {
            self.warmup_backoff
        } else {
            self.error_backoff
        }
    }
}

/// Sleep for `delay`, returning early with [`RpcError::Shutdown`] if the
/// token fires first. A zero delay still yields to the scheduler once.
pub(crate) async fn pause(shutdown: &CancellationToken, delay: Duration) -> Result<(), RpcError> {
    if delay.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::select! {
            _ = shutdown.cancelled() => return Err(RpcError::Shutdown),
            _ = tokio::time::sleep(delay) => {}
        }
    }
    if shutdown.is_cancelled() {
        return Err(RpcError::Shutdown);
    }
    Ok(())
}

/// Drive `attempt` until it yields a value, waiting `backoff` between
/// failures.
///
/// `on_failure` sees each error before the wait so the caller can log it
/// with its own context.
pub(crate) async fn retry_fixed<T, F, Fut, L>(
    shutdown: &CancellationToken,
    backoff: Duration,
    mut attempt: F,
    mut on_failure: L,
) -> Result<T, RpcError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, RpcError>>,
    L: FnMut(&RpcError),
{
    loop {
        if shutdown.is_cancelled() {
            return Err(RpcError::Shutdown);
        }
        let outcome = tokio::select! {
            _ = shutdown.cancelled() => return Err(RpcError::Shutdown),
            outcome = attempt() => outcome,
        };
        match outcome {
            Ok(value) => return Ok(value),
            Err(RpcError::Shutdown) => return Err(RpcError::Shutdown),
            Err(err) => {
                on_failure(&err);
                pause(shutdown, backoff).await?;
            }
        }
    }
}
