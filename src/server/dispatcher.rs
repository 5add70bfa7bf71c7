//! Supervisor task ownership.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Owns the supervisor task and exposes a bounded wait for its completion.
pub(crate) struct Dispatcher {
    handle: JoinHandle<()>,
    finished: watch::Receiver<bool>,
}

impl Dispatcher {
    pub(crate) fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            future.await;
            let _ = tx.send(true);
        });
        Self {
            handle,
            finished: rx,
        }
    }

    /// Waits up to `timeout` for the supervisor to finish. Returns whether
    /// it did.
    pub(crate) async fn wait(&self, timeout: Duration) -> bool {
        if *self.finished.borrow() {
            return true;
        }
        let mut finished = self.finished.clone();
        let result = match tokio::time::timeout(timeout, finished.wait_for(|done| *done)).await {
            Ok(Ok(_)) => true,
            // The sender dropping without signalling means the task was
            // aborted before it could finish.
            Ok(Err(_)) => false,
            Err(_) => false,
        };
        result
    }

    pub(crate) fn is_finished(&self) -> bool {
        *self.finished.borrow()
    }

    pub(crate) fn abort(&self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_observes_completion() {
        let dispatcher = Dispatcher::spawn(async {});
        assert!(dispatcher.wait(Duration::from_secs(5)).await);
        assert!(dispatcher.is_finished());
    }

    #[tokio::test]
    async fn test_wait_times_out_on_stuck_task() {
        let dispatcher = Dispatcher::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        assert!(!dispatcher.wait(Duration::from_millis(20)).await);
        dispatcher.abort();
    }

    #[tokio::test]
    async fn test_wait_reports_false_after_abort() {
        let dispatcher = Dispatcher::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        dispatcher.abort();
        assert!(!dispatcher.wait(Duration::from_millis(50)).await);
    }
}
