//! Error types shared by the perform pipeline and the processing server.

use thiserror::Error;

/// Errors surfaced by a job performer.
#[derive(Debug, Error)]
pub enum PerformError {
    /// Control signal: abandon this execution immediately. Never retried
    /// and never delivered to error filters.
    #[error("job execution was aborted")]
    Aborted,

    /// Cooperative cancellation of the execution.
    #[error("job execution was cancelled")]
    Cancelled,

    /// A filter method failed outside the job body. The original failure is
    /// preserved as the source.
    #[error("a server filter failed while performing the job")]
    FilterFailed {
        #[source]
        source: anyhow::Error,
    },

    /// The job body itself failed.
    #[error(transparent)]
    Job(#[from] anyhow::Error),

    /// The job names a method no handler was registered for.
    #[error("no handler registered for job method '{0}'")]
    UnknownMethod(String),
}

/// Errors raised by the processing server's public operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ServerError {
    /// The server has been disposed; no further operations are accepted.
    #[error("processing server has been disposed")]
    Disposed,

    /// The server was constructed without any background processes.
    #[error("processing server requires at least one background process")]
    NoProcesses,
}

/// Whether an error anywhere in its chain is a cooperative cancellation.
pub fn is_cancellation(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<PerformError>(),
            Some(PerformError::Cancelled)
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Context};

    #[test]
    fn test_is_cancellation_direct() {
        let error = anyhow::Error::new(PerformError::Cancelled);
        assert!(is_cancellation(&error));
    }

    #[test]
    fn test_is_cancellation_nested() {
        let error = anyhow::Error::new(PerformError::Cancelled).context("while polling the queue");
        assert!(is_cancellation(&error));
    }

    #[test]
    fn test_is_cancellation_rejects_other_errors() {
        assert!(!is_cancellation(&anyhow!("disk full")));
        assert!(!is_cancellation(&anyhow::Error::new(PerformError::Aborted)));
    }
}
