//! Retry policy: maps an attempt outcome to the task's next state.
//!
//! Pure and synchronous. Backoff is not modelled here; spacing between
//! attempts comes from the scheduler's fixed interval.

use uplink_core::types::TaskState;

use crate::uploader::UploadOutcome;

/// Decide the next state from the attempt count (already including the
/// attempt just made), whether it succeeded, and the attempt budget.
pub fn decide(attempts: u32, succeeded: bool, max_attempts: u32) -> TaskState {
    if succeeded {
        TaskState::Completed
    } else if attempts >= max_attempts {
        TaskState::Failed
    } else {
        TaskState::Queued
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Send failures the uploader marked non-retryable straight to `Failed`
    pub fail_fast_on_permanent: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            fail_fast_on_permanent: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        RetryPolicy {
            max_attempts,
            ..Default::default()
        }
    }

    pub fn next_state(&self, attempts: u32, outcome: &UploadOutcome) -> TaskState {
        if !outcome.success && !outcome.retryable && self.fail_fast_on_permanent {
            return TaskState::Failed;
        }
        decide(attempts, outcome.success, self.max_attempts)
    }
}
