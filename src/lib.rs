//! jobmill: background-job execution core.
//!
//! Two subsystems make up the crate:
//!
//! - [`performer`] wraps a single job execution in ordered filter chains
//!   (pre/post perform hooks and error hooks, each with sync and async
//!   variants) around an inner [`performer::JobPerformer`].
//! - [`server`] hosts long-running background processes under a supervisor
//!   with automatic retry, crash restarts, and a three-stage cooperative
//!   shutdown (`stopping` → `stopped` → `shutdown`).
//!
//! Persistence, scheduling, and client-side job submission live outside
//! this crate; storage is consumed through the narrow traits in
//! [`storage`].

pub mod config;
pub mod error;
pub mod job;
pub mod performer;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use config::{RetrySettings, ServerSettings};
pub use error::{PerformError, ServerError};
pub use job::{BackgroundJob, Job};
pub use performer::{
    AsyncErrorFilter, AsyncPerformFilter, CorePerformer, ErrorContext, ErrorFilter,
    FilterCollection, FilterProvider, FilteredPerformer, JobCancellation, JobFilter, JobPerformer,
    JobRegistry, PerformContext, PerformFilter, PerformedContext, PerformingContext,
};
pub use server::{
    AsyncBackgroundProcess, AutomaticRetryProcess, BackgroundProcess, InfiniteLoopProcess,
    ProcessContext, ProcessHandle, ProcessingServer, RetryPolicy,
};
pub use storage::{JobStorage, NoopStorage, ServerAnnouncement, StorageConnection};
