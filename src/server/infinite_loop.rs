//! Infinite-loop envelope.

use super::process::ProcessContext;
use super::retry::AutomaticRetryProcess;
use anyhow::Result;
use tracing::trace;

/// Re-runs the wrapped retry envelope until the server begins stopping.
///
/// An error escaping the retry envelope (attempts exhausted) propagates to
/// the restart envelope around this loop.
pub struct InfiniteLoopProcess {
    inner: AutomaticRetryProcess,
}

impl InfiniteLoopProcess {
    pub fn new(inner: AutomaticRetryProcess) -> Self {
        Self { inner }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name()
    }

    pub async fn run(&self, ctx: &ProcessContext) -> Result<()> {
        while !ctx.is_stopping() {
            trace!("Executing background process {}", self.name());
            self.inner.run(ctx).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::process::test_support::process_context;
    use crate::server::process::{AsyncBackgroundProcess, ProcessHandle};
    use crate::server::retry::RetryPolicy;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct CountingProcess {
        executions: Arc<AtomicUsize>,
        stop_after: usize,
        stopping: CancellationToken,
    }

    #[async_trait]
    impl AsyncBackgroundProcess for CountingProcess {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn execute(&self, _ctx: &ProcessContext) -> anyhow::Result<()> {
            let executions = self.executions.fetch_add(1, Ordering::SeqCst) + 1;
            if executions >= self.stop_after {
                self.stopping.cancel();
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_loop_repeats_until_stopping() {
        let executions = Arc::new(AtomicUsize::new(0));
        let (ctx, stopping) = process_context();
        let process = ProcessHandle::Async(Arc::new(CountingProcess {
            executions: executions.clone(),
            stop_after: 3,
            stopping,
        }));
        let envelope =
            InfiniteLoopProcess::new(AutomaticRetryProcess::new(process, RetryPolicy::default()));

        tokio::time::timeout(Duration::from_secs(5), envelope.run(&ctx))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(executions.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_loop_does_not_start_when_already_stopping() {
        let executions = Arc::new(AtomicUsize::new(0));
        let (ctx, stopping) = process_context();
        let process = ProcessHandle::Async(Arc::new(CountingProcess {
            executions: executions.clone(),
            stop_after: usize::MAX,
            stopping: stopping.clone(),
        }));
        let envelope =
            InfiniteLoopProcess::new(AutomaticRetryProcess::new(process, RetryPolicy::default()));

        stopping.cancel();
        envelope.run(&ctx).await.unwrap();
        assert_eq!(executions.load(Ordering::SeqCst), 0);
    }
}
