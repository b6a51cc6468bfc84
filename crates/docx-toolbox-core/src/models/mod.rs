pub mod error;
pub mod request;
pub mod response;
pub mod task;
pub mod task_log;

pub use error::{ErrorCode, TaskError};
pub use request::{
    AdapterRequest, ExcelAllinoneOptions, ImageExtractOptions, RuntimeOptions,
    TableExtractOptions, TaskOptions, TaskRequest,
};
pub use response::{ApiEnvelope, CancelAck, ItemFailure, TaskResponse, TaskSummary};
pub use task::{TaskId, TaskRecord, TaskStatus, TaskType, TerminalStatus};
pub use task_log::{TaskLogLevel, TaskLogLine};
