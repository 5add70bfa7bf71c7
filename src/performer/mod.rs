//! Filtered job-perform pipeline.

mod context;
mod cursor;
mod filter;
mod pipeline;
mod registry;

pub use context::{
    ErrorContext, JobCancellation, PerformContext, PerformedContext, PerformingContext,
};
pub use filter::{
    AsyncErrorFilter, AsyncPerformFilter, ErrorFilter, FilterCollection, FilterProvider,
    JobFilter, PerformFilter,
};
pub use pipeline::{FilteredPerformer, JobPerformer};
pub use registry::{CorePerformer, JobRegistry};
