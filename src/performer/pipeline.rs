//! The filtered perform pipeline.
//!
//! [`FilteredPerformer`] wraps an inner performer with two interception
//! chains: perform filters (pre/post hooks around the job body) and error
//! filters (hooks over an unhandled failure). Both chains run as explicit
//! state machines driven by a [`FilterCursor`].

use super::context::{ErrorContext, PerformContext, PerformedContext, PerformingContext};
use super::cursor::FilterCursor;
use super::filter::{
    AsyncErrorFilter, AsyncPerformFilter, ErrorFilter, ErrorInvocation, FilterProvider, JobFilter,
    PerformFilter, PerformInvocation,
};
use crate::error::PerformError;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::debug;

/// Executes one background job.
#[async_trait]
pub trait JobPerformer: Send + Sync {
    /// Runs the job described by `ctx` and returns its result.
    async fn perform(&self, ctx: &PerformContext) -> Result<Option<JsonValue>, PerformError>;
}

/// Wraps an inner performer with the registered filter chains.
pub struct FilteredPerformer {
    filter_provider: Arc<dyn FilterProvider>,
    inner: Arc<dyn JobPerformer>,
}

/// States of the perform chain.
///
/// Pre-filters walk forward; a cancellation by a pre-filter switches to the
/// backward cancel walk; otherwise the job body runs and post-filters walk
/// forward over the outcome. Each invocation state carries the resolved
/// variant, so a sync hook can never be driven through its async
/// counterpart or vice versa.
enum PerformStep {
    Begin,
    PerformingNext,
    PerformingAsync(Arc<dyn AsyncPerformFilter>),
    PerformingSync(Arc<dyn PerformFilter>),
    PerformingCheckCancel,
    CancelPrev(PerformedContext),
    CancelAsync(Arc<dyn AsyncPerformFilter>, PerformedContext),
    CancelSync(Arc<dyn PerformFilter>, PerformedContext),
    InvokeJob,
    PerformedNext(PerformedContext),
    PerformedAsync(Arc<dyn AsyncPerformFilter>, PerformedContext),
    PerformedSync(Arc<dyn PerformFilter>, PerformedContext),
    Done(PerformedContext),
}

/// States of the error chain.
enum ErrorStep {
    Begin,
    ErrorNext,
    ErrorAsync(Arc<dyn AsyncErrorFilter>),
    ErrorSync(Arc<dyn ErrorFilter>),
    Done,
}

impl FilteredPerformer {
    pub fn new(filter_provider: Arc<dyn FilterProvider>, inner: Arc<dyn JobPerformer>) -> Self {
        Self {
            filter_provider,
            inner,
        }
    }

    async fn run_perform_filters(
        &self,
        filters: &[JobFilter],
        ctx: &PerformContext,
    ) -> Result<Option<JsonValue>, PerformError> {
        let mut cursor = FilterCursor::new(filters);
        let mut performing = PerformingContext::new(ctx.clone());
        let mut step = PerformStep::Begin;

        loop {
            step = match step {
                PerformStep::Begin => PerformStep::PerformingNext,

                PerformStep::PerformingNext => {
                    ctx.cancellation.check()?;
                    match cursor.next_perform() {
                        Some(PerformInvocation::Async(filter)) => {
                            PerformStep::PerformingAsync(filter)
                        }
                        Some(PerformInvocation::Sync(filter)) => {
                            PerformStep::PerformingSync(filter)
                        }
                        None => PerformStep::InvokeJob,
                    }
                }

                PerformStep::PerformingAsync(filter) => {
                    filter
                        .before_perform(&mut performing)
                        .await
                        .map_err(|error| filter_fault(error, ctx))?;
                    PerformStep::PerformingCheckCancel
                }

                PerformStep::PerformingSync(filter) => {
                    filter
                        .before_perform(&mut performing)
                        .map_err(|error| filter_fault(error, ctx))?;
                    PerformStep::PerformingCheckCancel
                }

                PerformStep::PerformingCheckCancel => {
                    if performing.cancelled {
                        debug!(
                            "Job {} cancelled by a filter before execution",
                            ctx.background_job.id
                        );
                        PerformStep::CancelPrev(PerformedContext::from_cancellation(ctx.clone()))
                    } else {
                        PerformStep::PerformingNext
                    }
                }

                PerformStep::CancelPrev(performed) => match cursor.prev_perform() {
                    Some(PerformInvocation::Async(filter)) => {
                        PerformStep::CancelAsync(filter, performed)
                    }
                    Some(PerformInvocation::Sync(filter)) => {
                        PerformStep::CancelSync(filter, performed)
                    }
                    None => PerformStep::Done(performed),
                },

                PerformStep::CancelAsync(filter, mut performed) => {
                    filter
                        .after_perform(&mut performed)
                        .await
                        .map_err(|error| filter_fault(error, ctx))?;
                    PerformStep::CancelPrev(performed)
                }

                PerformStep::CancelSync(filter, mut performed) => {
                    filter
                        .after_perform(&mut performed)
                        .map_err(|error| filter_fault(error, ctx))?;
                    PerformStep::CancelPrev(performed)
                }

                PerformStep::InvokeJob => {
                    let performed = match self.inner.perform(ctx).await {
                        Ok(result) => PerformedContext::succeeded(ctx.clone(), result),
                        Err(error) => PerformedContext::faulted(ctx.clone(), error),
                    };
                    cursor.reset();
                    PerformStep::PerformedNext(performed)
                }

                PerformStep::PerformedNext(performed) => match cursor.next_perform() {
                    Some(PerformInvocation::Async(filter)) => {
                        PerformStep::PerformedAsync(filter, performed)
                    }
                    Some(PerformInvocation::Sync(filter)) => {
                        PerformStep::PerformedSync(filter, performed)
                    }
                    None => PerformStep::Done(performed),
                },

                PerformStep::PerformedAsync(filter, mut performed) => {
                    filter
                        .after_perform(&mut performed)
                        .await
                        .map_err(|error| filter_fault(error, ctx))?;
                    PerformStep::PerformedNext(performed)
                }

                PerformStep::PerformedSync(filter, mut performed) => {
                    filter
                        .after_perform(&mut performed)
                        .map_err(|error| filter_fault(error, ctx))?;
                    PerformStep::PerformedNext(performed)
                }

                PerformStep::Done(performed) => {
                    let PerformedContext {
                        result,
                        error,
                        error_handled,
                        ..
                    } = performed;
                    return match error {
                        Some(error) if !error_handled => Err(error),
                        _ => Ok(result),
                    };
                }
            };
        }
    }

    async fn run_error_filters(
        &self,
        filters: &[JobFilter],
        ctx: &PerformContext,
        error: PerformError,
    ) -> Result<Option<JsonValue>, PerformError> {
        let mut cursor = FilterCursor::new(filters);
        let mut error_ctx = ErrorContext::new(ctx.clone(), error);
        let mut step = ErrorStep::Begin;

        loop {
            step = match step {
                ErrorStep::Begin => ErrorStep::ErrorNext,

                ErrorStep::ErrorNext => match cursor.next_error() {
                    Some(ErrorInvocation::Async(filter)) => ErrorStep::ErrorAsync(filter),
                    Some(ErrorInvocation::Sync(filter)) => ErrorStep::ErrorSync(filter),
                    None => ErrorStep::Done,
                },

                ErrorStep::ErrorAsync(filter) => {
                    filter
                        .on_error(&mut error_ctx)
                        .await
                        .map_err(|error| filter_fault(error, ctx))?;
                    ErrorStep::ErrorNext
                }

                ErrorStep::ErrorSync(filter) => {
                    filter
                        .on_error(&mut error_ctx)
                        .map_err(|error| filter_fault(error, ctx))?;
                    ErrorStep::ErrorNext
                }

                ErrorStep::Done => {
                    return if error_ctx.handled {
                        Ok(None)
                    } else {
                        Err(error_ctx.error)
                    };
                }
            };
        }
    }
}

#[async_trait]
impl JobPerformer for FilteredPerformer {
    async fn perform(&self, ctx: &PerformContext) -> Result<Option<JsonValue>, PerformError> {
        let filters = self.filter_provider.filters(&ctx.background_job.job);

        match self.run_perform_filters(&filters, ctx).await {
            Ok(result) => Ok(result),
            Err(error @ PerformError::Aborted) => Err(error),
            Err(error @ PerformError::Cancelled) if ctx.cancellation.shutdown_requested() => {
                Err(error)
            }
            Err(error) => self.run_error_filters(&filters, ctx, error).await,
        }
    }
}

/// Classifies an error that escaped a filter method.
///
/// Cancellation during server shutdown and explicit aborts pass through
/// untouched; anything else surfaces as a filter failure wrapping the
/// original error.
fn filter_fault(error: anyhow::Error, ctx: &PerformContext) -> PerformError {
    match error.downcast::<PerformError>() {
        Ok(PerformError::Cancelled) if ctx.cancellation.shutdown_requested() => {
            PerformError::Cancelled
        }
        Ok(PerformError::Aborted) => PerformError::Aborted,
        Ok(error) => PerformError::FilterFailed {
            source: anyhow::Error::new(error),
        },
        Err(error) => PerformError::FilterFailed { source: error },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{BackgroundJob, Job};
    use crate::performer::context::JobCancellation;
    use crate::storage::{JobStorage, NoopStorage};
    use anyhow::anyhow;

    fn context() -> PerformContext {
        let connection = NoopStorage.connect().unwrap();
        let job = BackgroundJob::new("job-1", Job::new("Worker", "run", vec![]));
        PerformContext::new(job, connection, JobCancellation::detached())
    }

    fn shutdown_context() -> PerformContext {
        let ctx = context();
        ctx.cancellation.shutdown_token().cancel();
        ctx
    }

    #[test]
    fn test_filter_fault_wraps_plain_errors() {
        let fault = filter_fault(anyhow!("boom"), &context());
        match fault {
            PerformError::FilterFailed { source } => assert_eq!(source.to_string(), "boom"),
            other => panic!("unexpected fault: {other:?}"),
        }
    }

    #[test]
    fn test_filter_fault_wraps_cancellation_without_shutdown() {
        let fault = filter_fault(anyhow::Error::new(PerformError::Cancelled), &context());
        match fault {
            PerformError::FilterFailed { source } => {
                assert!(matches!(
                    source.downcast_ref::<PerformError>(),
                    Some(PerformError::Cancelled)
                ));
            }
            other => panic!("unexpected fault: {other:?}"),
        }
    }

    #[test]
    fn test_filter_fault_passes_cancellation_through_during_shutdown() {
        let fault = filter_fault(
            anyhow::Error::new(PerformError::Cancelled),
            &shutdown_context(),
        );
        assert!(matches!(fault, PerformError::Cancelled));
    }

    #[test]
    fn test_filter_fault_passes_abort_through() {
        let fault = filter_fault(anyhow::Error::new(PerformError::Aborted), &context());
        assert!(matches!(fault, PerformError::Aborted));
    }
}
