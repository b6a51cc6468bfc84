pub mod cancellation;
pub mod retry;
pub mod task_runner;

pub use cancellation::TaskCancellationToken;
pub use retry::RetryPolicy;
pub use task_runner::{BatchProgress, JobOutcome, TaskHandle, TaskRunner};

use crate::models::{TaskError, TaskId};

pub type OrchestrationResult<T> = Result<T, TaskError>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RunnerConfig {
    pub workers: usize,
    pub retry: RetryPolicy,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::new(1, RetryPolicy::default())
    }
}

impl RunnerConfig {
    pub fn new(workers: usize, retry: RetryPolicy) -> Self {
        Self {
            workers: workers.max(1),
            retry,
        }
    }

    pub fn serial() -> Self {
        Self::default()
    }

    pub fn is_serial(&self) -> bool {
        self.workers == 1
    }
}

/// Hooks into a job's life inside the runner. Calls happen outside the
/// runner's own lock.
pub trait TaskObserver: Send + Sync {
    /// Called on the worker right before the first attempt. Returning `false`
    /// finishes the job as cancelled without executing it.
    fn on_admitted(&self, _task_id: &TaskId) -> bool {
        true
    }

    fn on_retry(&self, _task_id: &TaskId, _attempt: u32, _error: &TaskError) {}

    fn on_finished(&self, outcome: &JobOutcome);
}
