use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::{TaskError, TaskSummary};

const GENERATED_ID_LEN: usize = 12;

#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Short random hex identifier, the same shape front-ends already display.
    pub fn generate() -> Self {
        let mut id = uuid::Uuid::new_v4().simple().to_string();
        id.truncate(GENERATED_ID_LEN);
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    ExcelAllinone,
    ImageExtract,
    TableExtract,
}

impl TaskType {
    pub const ALL: [TaskType; 3] = [
        TaskType::ExcelAllinone,
        TaskType::ImageExtract,
        TaskType::TableExtract,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExcelAllinone => "excel_allinone",
            Self::ImageExtract => "image_extract",
            Self::TableExtract => "table_extract",
        }
    }
}

impl Display for TaskType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = TaskError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|task_type| task_type.as_str() == value)
            .ok_or_else(|| TaskError::invalid_input(format!("unknown task type '{value}'")))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }
}

/// Status carried by a response; a finished task is never pending or running.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Success,
    Failed,
    Cancelled,
}

impl From<TerminalStatus> for TaskStatus {
    fn from(status: TerminalStatus) -> Self {
        match status {
            TerminalStatus::Success => TaskStatus::Success,
            TerminalStatus::Failed => TaskStatus::Failed,
            TerminalStatus::Cancelled => TaskStatus::Cancelled,
        }
    }
}

/// Caller-visible snapshot of one task owned by the registry.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub input_path: String,
    pub output_dir: Option<String>,
    pub status: TaskStatus,
    pub summary: Option<TaskSummary>,
    pub error: Option<TaskError>,
    pub log_path: Option<String>,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::{TaskId, TaskStatus, TaskType};
    use crate::models::ErrorCode;

    #[test]
    fn generated_ids_are_short_and_unique() {
        let first = TaskId::generate();
        let second = TaskId::generate();
        assert_eq!(first.as_str().len(), 12);
        assert!(first.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(first, second);
    }

    #[test]
    fn task_types_parse_from_wire_names() {
        for task_type in TaskType::ALL {
            assert_eq!(task_type.as_str().parse::<TaskType>().unwrap(), task_type);
        }
        let error = "pdf_merge".parse::<TaskType>().unwrap_err();
        assert_eq!(error.code, ErrorCode::InvalidInput);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Success.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }
}
