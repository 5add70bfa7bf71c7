//! Bidirectional cursor over an ordered filter list.

use super::filter::{ErrorInvocation, JobFilter, PerformInvocation};

/// Walks a filter list forward and backward, skipping entries that do not
/// implement the requested capability.
///
/// The cursor keeps a single index pointing one past the most recently
/// returned filter. Backward walks visit only indices strictly below that
/// filter, which gives the cancellation post-walk its exclusive starting
/// point.
pub(crate) struct FilterCursor<'a> {
    filters: &'a [JobFilter],
    index: usize,
}

impl<'a> FilterCursor<'a> {
    pub(crate) fn new(filters: &'a [JobFilter]) -> Self {
        Self { filters, index: 0 }
    }

    pub(crate) fn reset(&mut self) {
        self.index = 0;
    }

    pub(crate) fn next_perform(&mut self) -> Option<PerformInvocation> {
        while self.index < self.filters.len() {
            let candidate = &self.filters[self.index];
            self.index += 1;
            if let Some(invocation) = candidate.perform_invocation() {
                return Some(invocation);
            }
        }
        None
    }

    pub(crate) fn prev_perform(&mut self) -> Option<PerformInvocation> {
        while self.index >= 2 {
            self.index -= 1;
            let candidate = &self.filters[self.index - 1];
            if let Some(invocation) = candidate.perform_invocation() {
                return Some(invocation);
            }
        }
        self.index = 0;
        None
    }

    pub(crate) fn next_error(&mut self) -> Option<ErrorInvocation> {
        while self.index < self.filters.len() {
            let candidate = &self.filters[self.index];
            self.index += 1;
            if let Some(invocation) = candidate.error_invocation() {
                return Some(invocation);
            }
        }
        None
    }
}
