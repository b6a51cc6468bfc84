use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::models::{TaskError, TaskSummary};

/// Write-once, read-many cancellation signal shared between the runner and the
/// adapter executing a task.
#[derive(Clone, Debug, Default)]
pub struct TaskCancellationToken {
    flag: Arc<AtomicBool>,
}

impl TaskCancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Cooperative checkpoint: returns `E_CANCELLED` carrying the counts
    /// gathered so far once the signal is set.
    pub fn checkpoint(
        &self,
        summary: &TaskSummary,
        detail: impl Into<String>,
    ) -> Result<(), TaskError> {
        if self.is_cancelled() {
            return Err(TaskError::cancelled(detail).with_partial(summary.clone()));
        }
        Ok(())
    }
}
