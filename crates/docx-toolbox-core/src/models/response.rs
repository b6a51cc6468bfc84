use serde::{Deserialize, Serialize};

use crate::models::{ErrorCode, TaskError, TaskId, TaskStatus, TerminalStatus};

/// One document that failed inside a multi-document request.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub item: String,
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub processed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub outputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ItemFailure>,
}

impl TaskSummary {
    pub fn record_processed(&mut self, outputs: impl IntoIterator<Item = String>) {
        self.processed = self.processed.saturating_add(1);
        self.outputs.extend(outputs);
    }

    pub fn record_skipped(&mut self) {
        self.skipped = self.skipped.saturating_add(1);
    }

    pub fn record_failed(&mut self, item: impl Into<String>, error: &TaskError) {
        self.failed = self.failed.saturating_add(1);
        self.failures.push(ItemFailure {
            item: item.into(),
            code: error.code,
            message: error.message.clone(),
        });
    }

    pub fn counts(&self) -> String {
        format!(
            "processed={} failed={} skipped={}",
            self.processed, self.failed, self.skipped
        )
    }
}

/// Result of one task. Exactly one of `summary` and `error` is present and
/// `ok` agrees with which one; the constructors are the only way to build it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TaskResponse {
    ok: bool,
    task_id: TaskId,
    status: TerminalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<TaskSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<TaskError>,
}

impl TaskResponse {
    pub fn success(task_id: TaskId, summary: TaskSummary) -> Self {
        Self {
            ok: true,
            task_id,
            status: TerminalStatus::Success,
            summary: Some(summary),
            error: None,
        }
    }

    pub fn failure(task_id: TaskId, error: TaskError) -> Self {
        let status = if error.is_cancelled() {
            TerminalStatus::Cancelled
        } else {
            TerminalStatus::Failed
        };
        Self {
            ok: false,
            task_id,
            status,
            summary: None,
            error: Some(error),
        }
    }

    pub fn ok(&self) -> bool {
        self.ok
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn status(&self) -> TerminalStatus {
        self.status
    }

    pub fn task_status(&self) -> TaskStatus {
        self.status.into()
    }

    pub fn summary(&self) -> Option<&TaskSummary> {
        self.summary.as_ref()
    }

    pub fn error(&self) -> Option<&TaskError> {
        self.error.as_ref()
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|error| error.code)
    }

    pub fn into_parts(self) -> (Option<TaskSummary>, Option<TaskError>) {
        (self.summary, self.error)
    }
}

/// `{ok, data | error}` wrapper used by every collaborator-facing call.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ApiEnvelope<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
}

impl<T> ApiEnvelope<T> {
    pub fn data(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(error: TaskError) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error),
        }
    }
}

impl<T> From<Result<T, TaskError>> for ApiEnvelope<T> {
    fn from(result: Result<T, TaskError>) -> Self {
        match result {
            Ok(data) => Self::data(data),
            Err(error) => Self::error(error),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CancelAck {
    pub task_id: TaskId,
    pub status: TaskStatus,
}
