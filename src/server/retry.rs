//! Automatic retry envelope for background processes.
//!
//! Implements exponential backoff with uniform jitter inside squared
//! buckets, and escalating log levels as attempts accumulate.

use super::process::{ProcessContext, ProcessHandle};
use crate::config::RetrySettings;
use crate::error::is_cancellation;
use anyhow::Result;
use rand::Rng;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Backoff schedule for a failing process.
///
/// Attempt `i` (0-based) draws a uniform delay from the bucket
/// `[i², (i+1)²]` seconds, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum executions before the error escapes the envelope.
    pub max_attempts: u32,
    /// Cap applied to every computed delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            max_delay: settings.max_delay(),
        }
    }

    /// Whether another execution is allowed after 0-based attempt `attempt`
    /// failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }

    /// Inclusive lower and exclusive upper delay bound for an attempt,
    /// before the cap is applied.
    pub fn delay_bounds(&self, attempt: u32) -> (Duration, Duration) {
        let attempt = attempt as u64;
        let lower = attempt * attempt;
        let upper = (attempt + 1) * (attempt + 1) + 1;
        (Duration::from_secs(lower), Duration::from_secs(upper))
    }

    /// Draws the delay to wait after a failed attempt.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let (lower, upper) = self.delay_bounds(attempt);
        let secs = rand::rng().random_range(lower.as_secs()..upper.as_secs());
        Duration::from_secs(secs).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

/// Re-runs a failing process until it succeeds, the attempts are exhausted,
/// or the server begins stopping.
///
/// Cancellation failures while the server is stopping escape immediately;
/// they are the process acknowledging the stop request, not a fault.
pub struct AutomaticRetryProcess {
    inner: ProcessHandle,
    policy: RetryPolicy,
}

impl AutomaticRetryProcess {
    pub fn new(inner: ProcessHandle, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name()
    }

    pub async fn run(&self, ctx: &ProcessContext) -> Result<()> {
        let mut attempt: u32 = 0;
        loop {
            match self.inner.run(ctx).await {
                Ok(()) => return Ok(()),
                Err(error) if is_cancellation(&error) && ctx.is_stopping() => return Err(error),
                Err(error) => {
                    if !self.policy.should_retry(attempt) {
                        return Err(error);
                    }

                    let delay = self.policy.next_delay(attempt);
                    log_retry(self.name(), attempt, delay, &error);

                    if !ctx.wait(delay).await {
                        debug!(
                            "Stop requested while process {} was backing off, giving up",
                            self.name()
                        );
                        return Ok(());
                    }
                    attempt += 1;
                }
            }
        }
    }
}

fn log_retry(process: &str, attempt: u32, delay: Duration, error: &anyhow::Error) {
    match attempt {
        0 => debug!(
            "Process {} failed on attempt {}, retrying in {:?}: {:#}",
            process, attempt, delay, error
        ),
        1 => info!(
            "Process {} failed on attempt {}, retrying in {:?}: {:#}",
            process, attempt, delay, error
        ),
        2 => warn!(
            "Process {} failed on attempt {}, retrying in {:?}: {:#}",
            process, attempt, delay, error
        ),
        _ => error!(
            "Process {} failed on attempt {}, retrying in {:?}: {:#}",
            process, attempt, delay, error
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PerformError;
    use crate::server::process::test_support::process_context;
    use crate::server::process::AsyncBackgroundProcess;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn instant_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            max_delay: Duration::ZERO,
        }
    }

    struct FlakyProcess {
        executions: Arc<AtomicUsize>,
        failures_before_success: usize,
    }

    #[async_trait]
    impl AsyncBackgroundProcess for FlakyProcess {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn execute(&self, _ctx: &ProcessContext) -> Result<()> {
            let execution = self.executions.fetch_add(1, Ordering::SeqCst);
            if execution < self.failures_before_success {
                Err(anyhow!("transient failure"))
            } else {
                Ok(())
            }
        }
    }

    struct CancelledProcess;

    #[async_trait]
    impl AsyncBackgroundProcess for CancelledProcess {
        fn name(&self) -> &'static str {
            "cancelled"
        }

        async fn execute(&self, _ctx: &ProcessContext) -> Result<()> {
            Err(anyhow::Error::new(PerformError::Cancelled))
        }
    }

    #[test]
    fn test_delay_bounds_are_squared_buckets() {
        let policy = RetryPolicy::default();

        assert_eq!(
            policy.delay_bounds(0),
            (Duration::from_secs(0), Duration::from_secs(2))
        );
        assert_eq!(
            policy.delay_bounds(1),
            (Duration::from_secs(1), Duration::from_secs(5))
        );
        assert_eq!(
            policy.delay_bounds(3),
            (Duration::from_secs(9), Duration::from_secs(17))
        );
    }

    #[test]
    fn test_delay_bounds_are_monotone() {
        let policy = RetryPolicy::default();
        for attempt in 0..10 {
            let (lower, _) = policy.delay_bounds(attempt);
            let (next_lower, _) = policy.delay_bounds(attempt + 1);
            assert!(next_lower >= lower);
        }
    }

    #[test]
    fn test_next_delay_respects_cap() {
        let policy = RetryPolicy {
            max_attempts: 20,
            max_delay: Duration::from_secs(3),
        };
        for attempt in 0..20 {
            assert!(policy.next_delay(attempt) <= Duration::from_secs(3));
        }
    }

    #[test]
    fn test_should_retry_boundary() {
        let policy = instant_policy(3);

        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
        assert!(!policy.should_retry(5));
    }

    #[tokio::test]
    async fn test_envelope_retries_until_success() {
        let executions = Arc::new(AtomicUsize::new(0));
        let process = ProcessHandle::Async(Arc::new(FlakyProcess {
            executions: executions.clone(),
            failures_before_success: 2,
        }));
        let envelope = AutomaticRetryProcess::new(process, instant_policy(5));
        let (ctx, _stopping) = process_context();

        envelope.run(&ctx).await.unwrap();
        assert_eq!(executions.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_envelope_gives_up_after_max_attempts() {
        let executions = Arc::new(AtomicUsize::new(0));
        let process = ProcessHandle::Async(Arc::new(FlakyProcess {
            executions: executions.clone(),
            failures_before_success: usize::MAX,
        }));
        let envelope = AutomaticRetryProcess::new(process, instant_policy(3));
        let (ctx, _stopping) = process_context();

        let result = envelope.run(&ctx).await;
        assert!(result.is_err());
        assert_eq!(executions.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_envelope_rethrows_cancellation_while_stopping() {
        let process = ProcessHandle::Async(Arc::new(CancelledProcess));
        let envelope = AutomaticRetryProcess::new(process, instant_policy(5));
        let (ctx, stopping) = process_context();
        stopping.cancel();

        let result = envelope.run(&ctx).await;
        assert!(is_cancellation(&result.unwrap_err()));
    }

    #[tokio::test]
    async fn test_envelope_stops_backing_off_when_stop_requested() {
        let executions = Arc::new(AtomicUsize::new(0));
        let process = ProcessHandle::Async(Arc::new(FlakyProcess {
            executions: executions.clone(),
            failures_before_success: usize::MAX,
        }));
        let policy = RetryPolicy {
            max_attempts: 5,
            max_delay: Duration::from_secs(60),
        };
        let envelope = AutomaticRetryProcess::new(process, policy);
        let (ctx, stopping) = process_context();

        let run = tokio::spawn(async move { envelope.run(&ctx).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        stopping.cancel();

        // The envelope gives up during a backoff wait instead of burning
        // through the remaining attempts. The first bucket may draw a zero
        // delay, so at most one extra execution can slip in.
        let result = run.await.unwrap();
        assert!(result.is_ok());
        assert!(executions.load(Ordering::SeqCst) <= 2);
    }
}
