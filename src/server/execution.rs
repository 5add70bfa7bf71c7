//! Crash-restart envelope for supervisor and process loops.

use crate::error::is_cancellation;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Runs `body` until it completes cleanly, restarting it after
/// `restart_delay` when it fails.
///
/// Cancellation failures while `stopping` is set end the loop instead of
/// restarting it, as does a stop request arriving during the restart pause.
pub(crate) async fn run_with_restarts<F, Fut>(
    name: &str,
    restart_delay: Duration,
    stopping: CancellationToken,
    body: F,
) where
    F: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    loop {
        match body().await {
            Ok(()) => return,
            Err(cause) if is_cancellation(&cause) && stopping.is_cancelled() => return,
            Err(cause) => {
                error!(
                    "{} crashed, restarting in {:?}: {:#}",
                    name, restart_delay, cause
                );
                tokio::select! {
                    _ = tokio::time::sleep(restart_delay) => {}
                    _ = stopping.cancelled() => return,
                }
            }
        }
    }
}
