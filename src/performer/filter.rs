//! Filter capabilities and registration.
//!
//! A filter is a user-supplied interceptor around job execution. Each of
//! the four capability traits can be registered independently on a
//! [`JobFilter`]; when both the sync and async variant of a capability are
//! present, the async one is invoked.

use super::context::{ErrorContext, PerformedContext, PerformingContext};
use crate::job::Job;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Synchronous interception around a job execution.
///
/// Both hooks default to no-ops so implementors override only what they
/// need.
pub trait PerformFilter: Send + Sync {
    /// Runs before the job body. Setting `ctx.cancelled` suppresses the
    /// execution.
    fn before_perform(&self, _ctx: &mut PerformingContext) -> Result<()> {
        Ok(())
    }

    /// Runs after the job body (or after a cancellation by a later hook).
    fn after_perform(&self, _ctx: &mut PerformedContext) -> Result<()> {
        Ok(())
    }
}

/// Asynchronous interception around a job execution.
#[async_trait]
pub trait AsyncPerformFilter: Send + Sync {
    async fn before_perform(&self, _ctx: &mut PerformingContext) -> Result<()> {
        Ok(())
    }

    async fn after_perform(&self, _ctx: &mut PerformedContext) -> Result<()> {
        Ok(())
    }
}

/// Synchronous hook invoked when a job execution fails unhandled.
pub trait ErrorFilter: Send + Sync {
    fn on_error(&self, ctx: &mut ErrorContext) -> Result<()>;
}

/// Asynchronous hook invoked when a job execution fails unhandled.
#[async_trait]
pub trait AsyncErrorFilter: Send + Sync {
    async fn on_error(&self, ctx: &mut ErrorContext) -> Result<()>;
}

/// One registered filter and the capabilities it implements.
#[derive(Clone, Default)]
pub struct JobFilter {
    /// Sort key applied by [`FilterCollection`]; lower runs outermost.
    pub order: i32,
    perform: Option<Arc<dyn PerformFilter>>,
    perform_async: Option<Arc<dyn AsyncPerformFilter>>,
    error: Option<Arc<dyn ErrorFilter>>,
    error_async: Option<Arc<dyn AsyncErrorFilter>>,
}

impl JobFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn perform(filter: Arc<dyn PerformFilter>) -> Self {
        Self::new().with_perform(filter)
    }

    pub fn perform_async(filter: Arc<dyn AsyncPerformFilter>) -> Self {
        Self::new().with_perform_async(filter)
    }

    pub fn error(filter: Arc<dyn ErrorFilter>) -> Self {
        Self::new().with_error(filter)
    }

    pub fn error_async(filter: Arc<dyn AsyncErrorFilter>) -> Self {
        Self::new().with_error_async(filter)
    }

    pub fn with_perform(mut self, filter: Arc<dyn PerformFilter>) -> Self {
        self.perform = Some(filter);
        self
    }

    pub fn with_perform_async(mut self, filter: Arc<dyn AsyncPerformFilter>) -> Self {
        self.perform_async = Some(filter);
        self
    }

    pub fn with_error(mut self, filter: Arc<dyn ErrorFilter>) -> Self {
        self.error = Some(filter);
        self
    }

    pub fn with_error_async(mut self, filter: Arc<dyn AsyncErrorFilter>) -> Self {
        self.error_async = Some(filter);
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// Resolves the perform capability; the async variant wins when both
    /// are registered.
    pub(crate) fn perform_invocation(&self) -> Option<PerformInvocation> {
        match (&self.perform_async, &self.perform) {
            (Some(filter), _) => Some(PerformInvocation::Async(Arc::clone(filter))),
            (None, Some(filter)) => Some(PerformInvocation::Sync(Arc::clone(filter))),
            (None, None) => None,
        }
    }

    /// Resolves the error capability; the async variant wins when both are
    /// registered.
    pub(crate) fn error_invocation(&self) -> Option<ErrorInvocation> {
        match (&self.error_async, &self.error) {
            (Some(filter), _) => Some(ErrorInvocation::Async(Arc::clone(filter))),
            (None, Some(filter)) => Some(ErrorInvocation::Sync(Arc::clone(filter))),
            (None, None) => None,
        }
    }
}

/// A resolved perform hook, ready to invoke.
pub(crate) enum PerformInvocation {
    Sync(Arc<dyn PerformFilter>),
    Async(Arc<dyn AsyncPerformFilter>),
}

/// A resolved error hook, ready to invoke.
pub(crate) enum ErrorInvocation {
    Sync(Arc<dyn ErrorFilter>),
    Async(Arc<dyn AsyncErrorFilter>),
}

/// Produces the filters that apply to a job, outermost first.
pub trait FilterProvider: Send + Sync {
    fn filters(&self, job: &Job) -> Vec<JobFilter>;
}

/// Vec-backed filter registry with a stable sort by `order`.
///
/// Filters sharing an `order` keep their registration order.
#[derive(Clone, Default)]
pub struct FilterCollection {
    filters: Vec<JobFilter>,
}

impl FilterCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, filter: JobFilter) -> &mut Self {
        self.filters.push(filter);
        self
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl FilterProvider for FilterCollection {
    fn filters(&self, _job: &Job) -> Vec<JobFilter> {
        let mut filters = self.filters.clone();
        filters.sort_by_key(|filter| filter.order);
        filters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{BackgroundJob, Job};
    use crate::performer::context::{JobCancellation, PerformContext, PerformingContext};
    use crate::storage::{JobStorage, NoopStorage};
    use std::sync::Mutex;

    struct Marker {
        id: usize,
        seen: Arc<Mutex<Vec<usize>>>,
    }

    impl PerformFilter for Marker {
        fn before_perform(&self, _ctx: &mut PerformingContext) -> Result<()> {
            self.seen.lock().unwrap().push(self.id);
            Ok(())
        }
    }

    #[async_trait]
    impl AsyncPerformFilter for Marker {}

    fn performing_context() -> PerformingContext {
        let connection = NoopStorage.connect().unwrap();
        let job = BackgroundJob::new("job-1", Job::new("T", "m", vec![]));
        PerformingContext::new(PerformContext::new(
            job,
            connection,
            JobCancellation::detached(),
        ))
    }

    #[test]
    fn test_async_variant_preferred() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let marker = Arc::new(Marker { id: 0, seen });
        let filter = JobFilter::new()
            .with_perform(marker.clone())
            .with_perform_async(marker);

        assert!(matches!(
            filter.perform_invocation(),
            Some(PerformInvocation::Async(_))
        ));
    }

    #[test]
    fn test_sync_variant_used_when_alone() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let filter = JobFilter::perform(Arc::new(Marker { id: 0, seen }));

        assert!(matches!(
            filter.perform_invocation(),
            Some(PerformInvocation::Sync(_))
        ));
        assert!(filter.error_invocation().is_none());
    }

    #[test]
    fn test_collection_sorts_by_order_stably() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let marker = |id| {
            Arc::new(Marker {
                id,
                seen: seen.clone(),
            })
        };

        let mut collection = FilterCollection::new();
        collection
            .add(JobFilter::perform(marker(1)).with_order(5))
            .add(JobFilter::perform(marker(2)).with_order(-1))
            .add(JobFilter::perform(marker(3)).with_order(5));

        let sorted = collection.filters(&Job::new("T", "m", vec![]));
        let mut ctx = performing_context();
        for filter in &sorted {
            if let Some(PerformInvocation::Sync(inner)) = filter.perform_invocation() {
                inner.before_perform(&mut ctx).unwrap();
            }
        }

        assert_eq!(*seen.lock().unwrap(), vec![2, 1, 3]);
    }
}
