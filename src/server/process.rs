//! Background process interfaces and execution context.

use crate::storage::JobStorage;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Long-running background process with a synchronous body.
///
/// The body runs on the blocking pool and is re-invoked by the hosting
/// envelopes until the server begins stopping. Long stretches of work
/// should check the context tokens and return early.
pub trait BackgroundProcess: Send + Sync {
    fn name(&self) -> &'static str;

    fn execute(&self, ctx: &ProcessContext) -> Result<()>;
}

/// Long-running background process with an asynchronous body.
#[async_trait]
pub trait AsyncBackgroundProcess: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, ctx: &ProcessContext) -> Result<()>;
}

/// A registered process. A process registered with an async body is always
/// driven through it; the synchronous shape never runs for such a process.
#[derive(Clone)]
pub enum ProcessHandle {
    Sync(Arc<dyn BackgroundProcess>),
    Async(Arc<dyn AsyncBackgroundProcess>),
}

impl ProcessHandle {
    pub fn name(&self) -> &'static str {
        match self {
            ProcessHandle::Sync(process) => process.name(),
            ProcessHandle::Async(process) => process.name(),
        }
    }

    pub(crate) async fn run(&self, ctx: &ProcessContext) -> Result<()> {
        match self {
            ProcessHandle::Async(process) => process.execute(ctx).await,
            ProcessHandle::Sync(process) => {
                let process = Arc::clone(process);
                let ctx = ctx.clone();
                tokio::task::spawn_blocking(move || process.execute(&ctx))
                    .await
                    .map_err(|join_error| anyhow!("background process panicked: {join_error}"))?
            }
        }
    }
}

/// Shared state handed to every process execution.
///
/// Carries the three shutdown-ladder signals: `stopping` asks processes to
/// finish their current work, `stopped` escalates the cancellation, and
/// `shutdown` marks the point where the server abandons waiting.
#[derive(Clone)]
pub struct ProcessContext {
    /// Identity of the hosting server.
    pub server_id: String,
    /// Storage backend shared by all processes of the server.
    pub storage: Arc<dyn JobStorage>,
    /// Host-supplied property bag.
    pub properties: Arc<HashMap<String, JsonValue>>,
    stopping: CancellationToken,
    stopped: CancellationToken,
    shutdown: CancellationToken,
}

impl ProcessContext {
    pub(crate) fn new(
        server_id: String,
        storage: Arc<dyn JobStorage>,
        properties: Arc<HashMap<String, JsonValue>>,
        stopping: CancellationToken,
        stopped: CancellationToken,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            server_id,
            storage,
            properties,
            stopping,
            stopped,
            shutdown,
        }
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.is_cancelled()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.is_cancelled()
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn stopping_token(&self) -> &CancellationToken {
        &self.stopping
    }

    pub fn stopped_token(&self) -> &CancellationToken {
        &self.stopped
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Sleeps for `delay`. Returns `false` when the server began stopping
    /// before the delay elapsed.
    pub async fn wait(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = self.stopping.cancelled() => false,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::process_context;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_elapses_when_not_stopping() {
        let (ctx, _stopping) = process_context();
        assert!(ctx.wait(Duration::from_millis(5)).await);
    }

    #[tokio::test]
    async fn test_wait_is_interrupted_by_stop() {
        let (ctx, stopping) = process_context();
        stopping.cancel();
        assert!(!ctx.wait(Duration::from_secs(60)).await);
    }
}
