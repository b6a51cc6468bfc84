use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::models::{TaskId, TaskType};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskLogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl TaskLogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

/// One line of a task's history, rendered as
/// `timestamp | LEVEL | task_type | task=<id> | message`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TaskLogLine {
    pub timestamp: String,
    pub level: TaskLogLevel,
    pub task_type: TaskType,
    pub task_id: TaskId,
    pub message: String,
}

impl Display for TaskLogLine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} | {:<5} | {} | task={} | {}",
            self.timestamp,
            self.level.as_str(),
            self.task_type,
            self.task_id,
            self.message
        )
    }
}
