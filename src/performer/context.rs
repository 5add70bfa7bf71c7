//! Execution contexts threaded through the perform pipeline.

use crate::error::PerformError;
use crate::job::BackgroundJob;
use crate::storage::StorageConnection;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Pair of cancellation signals carried by a job execution.
///
/// The `job` token cancels a single execution; the `shutdown` token fires
/// when the hosting server is shutting down. The pipeline treats the two
/// differently: shutdown cancellation is control flow, job cancellation is
/// an error the filters may still observe.
#[derive(Debug, Clone)]
pub struct JobCancellation {
    job: CancellationToken,
    shutdown: CancellationToken,
}

impl JobCancellation {
    pub fn new(job: CancellationToken, shutdown: CancellationToken) -> Self {
        Self { job, shutdown }
    }

    /// Fresh signals with nothing wired to cancel them.
    pub fn detached() -> Self {
        Self::new(CancellationToken::new(), CancellationToken::new())
    }

    pub fn job_token(&self) -> &CancellationToken {
        &self.job
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn is_cancelled(&self) -> bool {
        self.job.is_cancelled() || self.shutdown.is_cancelled()
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Fails with [`PerformError::Cancelled`] once either signal has fired.
    pub fn check(&self) -> Result<(), PerformError> {
        if self.is_cancelled() {
            return Err(PerformError::Cancelled);
        }
        Ok(())
    }
}

/// The execution request handed to a performer.
///
/// Cheap to clone; the pipeline never mutates it after `perform` returns.
#[derive(Clone)]
pub struct PerformContext {
    /// The job being performed.
    pub background_job: BackgroundJob,
    /// Storage connection scoped to this execution.
    pub connection: Arc<dyn StorageConnection>,
    /// Cancellation signals for this execution.
    pub cancellation: JobCancellation,
}

impl PerformContext {
    pub fn new(
        background_job: BackgroundJob,
        connection: Arc<dyn StorageConnection>,
        cancellation: JobCancellation,
    ) -> Self {
        Self {
            background_job,
            connection,
            cancellation,
        }
    }
}

/// Context visible to pre-perform hooks.
pub struct PerformingContext {
    /// The execution this hook runs in.
    pub perform: PerformContext,
    /// Set by a filter to suppress the job body. The remaining pre-filters
    /// are skipped and the filters that already ran observe the
    /// cancellation in their post hooks.
    pub cancelled: bool,
}

impl PerformingContext {
    pub(crate) fn new(perform: PerformContext) -> Self {
        Self {
            perform,
            cancelled: false,
        }
    }
}

/// Context visible to post-perform hooks.
pub struct PerformedContext {
    /// The execution this hook runs in.
    pub perform: PerformContext,
    /// Value returned by the job body, when it ran and succeeded.
    pub result: Option<JsonValue>,
    /// Whether a pre-filter suppressed the job body.
    pub cancelled: bool,
    /// Failure raised by the job body, when it ran and failed.
    pub error: Option<PerformError>,
    /// Set by a filter to stop the pipeline from re-raising `error`.
    pub error_handled: bool,
}

impl PerformedContext {
    pub(crate) fn from_cancellation(perform: PerformContext) -> Self {
        Self {
            perform,
            result: None,
            cancelled: true,
            error: None,
            error_handled: false,
        }
    }

    pub(crate) fn succeeded(perform: PerformContext, result: Option<JsonValue>) -> Self {
        Self {
            perform,
            result,
            cancelled: false,
            error: None,
            error_handled: false,
        }
    }

    pub(crate) fn faulted(perform: PerformContext, error: PerformError) -> Self {
        Self {
            perform,
            result: None,
            cancelled: false,
            error: Some(error),
            error_handled: false,
        }
    }
}

/// Context shared by the error-filter chain.
pub struct ErrorContext {
    /// The execution that failed.
    pub perform: PerformContext,
    /// The unhandled failure.
    pub error: PerformError,
    /// Set by a filter to stop the pipeline from re-raising `error`.
    pub handled: bool,
}

impl ErrorContext {
    pub(crate) fn new(perform: PerformContext, error: PerformError) -> Self {
        Self {
            perform,
            error,
            handled: false,
        }
    }
}
