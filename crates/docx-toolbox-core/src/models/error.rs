use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::models::TaskSummary;

/// Closed set of failure classes surfaced to every front-end.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "E_INVALID_INPUT")]
    InvalidInput,
    #[serde(rename = "E_UNSUPPORTED_FORMAT")]
    UnsupportedFormat,
    #[serde(rename = "E_PERMISSION_DENIED")]
    PermissionDenied,
    #[serde(rename = "E_PROCESS_FAILED")]
    ProcessFailed,
    #[serde(rename = "E_CANCELLED")]
    Cancelled,
    #[serde(rename = "E_INTERNAL")]
    Internal,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 6] = [
        ErrorCode::InvalidInput,
        ErrorCode::UnsupportedFormat,
        ErrorCode::PermissionDenied,
        ErrorCode::ProcessFailed,
        ErrorCode::Cancelled,
        ErrorCode::Internal,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidInput => "E_INVALID_INPUT",
            Self::UnsupportedFormat => "E_UNSUPPORTED_FORMAT",
            Self::PermissionDenied => "E_PERMISSION_DENIED",
            Self::ProcessFailed => "E_PROCESS_FAILED",
            Self::Cancelled => "E_CANCELLED",
            Self::Internal => "E_INTERNAL",
        }
    }

    /// Only external process failures are worth another attempt; every other
    /// class is deterministic for the same request.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::ProcessFailed)
    }

    /// Errors that stop a multi-document request instead of being counted as
    /// a single failed item.
    pub fn aborts_request(self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Internal | Self::PermissionDenied
        )
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The only failure value adapters hand back to the dispatcher and runner.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct TaskError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial: Option<TaskSummary>,
}

impl TaskError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: String::new(),
            partial: None,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn unsupported_format(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnsupportedFormat, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PermissionDenied, message)
    }

    pub fn process_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ProcessFailed, message)
    }

    pub fn cancelled(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::Cancelled, "task cancelled by user").with_detail(detail)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    pub fn with_partial(mut self, summary: TaskSummary) -> Self {
        self.partial = Some(summary);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == ErrorCode::Cancelled
    }
}

impl From<std::io::Error> for TaskError {
    fn from(error: std::io::Error) -> Self {
        let code = match error.kind() {
            std::io::ErrorKind::NotFound => ErrorCode::InvalidInput,
            std::io::ErrorKind::PermissionDenied => ErrorCode::PermissionDenied,
            _ => ErrorCode::Internal,
        };
        TaskError::new(code, error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorCode, TaskError};
    use crate::models::TaskSummary;

    #[test]
    fn codes_serialize_to_wire_strings() {
        for code in ErrorCode::ALL {
            let json = serde_json::to_value(code).unwrap();
            assert_eq!(json, serde_json::Value::String(code.as_str().to_string()));
        }
    }

    #[test]
    fn only_process_failures_are_retryable() {
        let retryable: Vec<_> = ErrorCode::ALL
            .into_iter()
            .filter(|code| code.is_retryable())
            .collect();
        assert_eq!(retryable, vec![ErrorCode::ProcessFailed]);
    }

    #[test]
    fn partial_summary_is_omitted_unless_present() {
        let plain = serde_json::to_value(TaskError::invalid_input("bad path")).unwrap();
        assert_eq!(plain["code"], "E_INVALID_INPUT");
        assert!(plain.get("partial").is_none());

        let mut summary = TaskSummary::default();
        summary.processed = 2;
        let cancelled = TaskError::cancelled("stopped").with_partial(summary);
        let json = serde_json::to_value(&cancelled).unwrap();
        assert_eq!(json["code"], "E_CANCELLED");
        assert_eq!(json["partial"]["processed"], 2);
    }

    #[test]
    fn io_errors_map_onto_taxonomy() {
        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(TaskError::from(missing).code, ErrorCode::InvalidInput);

        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert_eq!(TaskError::from(denied).code, ErrorCode::PermissionDenied);
    }
}
