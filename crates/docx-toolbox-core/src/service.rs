use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

use crate::config::CoreConfig;
use crate::dispatch::Dispatcher;
use crate::logging::TaskLogSink;
use crate::models::{
    CancelAck, TaskError, TaskId, TaskLogLevel, TaskRecord, TaskRequest, TaskStatus, TaskType,
    TerminalStatus,
};
use crate::orchestration::{JobOutcome, TaskObserver, TaskRunner};
use crate::registry::{NewTaskRecord, TaskRegistry};

pub type ServiceResult<T> = Result<T, TaskError>;

/// Collaborator-facing surface: starts tasks on the runner and answers
/// list/status/cancel from the registry.
pub struct TaskService {
    registry: Arc<TaskRegistry>,
    runner: TaskRunner,
    logs: Arc<TaskLogSink>,
    default_output_dir: Option<String>,
}

impl TaskService {
    pub fn new(config: &CoreConfig, dispatcher: Dispatcher, handle: Handle) -> Self {
        let registry = Arc::new(TaskRegistry::new());
        let logs = Arc::new(TaskLogSink::new(
            config.log_dir.clone(),
            config.log_window_lines,
        ));
        let observer: Arc<dyn TaskObserver> = Arc::new(RegistryObserver {
            registry: registry.clone(),
            logs: logs.clone(),
        });
        let runner =
            TaskRunner::from_parts(dispatcher, config.runner_config(), handle, Some(observer));

        Self {
            registry,
            runner,
            logs,
            default_output_dir: config.output_dir.clone(),
        }
    }

    /// Service on the current tokio runtime with the process-backed adapters.
    pub fn from_config(config: &CoreConfig) -> ServiceResult<Self> {
        let handle = Handle::try_current().map_err(|error| {
            TaskError::internal("task service requires a tokio runtime")
                .with_detail(error.to_string())
        })?;
        Ok(Self::new(config, Dispatcher::from_config(config), handle))
    }

    pub fn runner(&self) -> &TaskRunner {
        &self.runner
    }

    /// Registers `request` as pending and queues it. Unknown task types are
    /// rejected here without creating a record; every other problem surfaces
    /// as the record's terminal error.
    pub fn start_task(&self, mut request: TaskRequest) -> ServiceResult<TaskRecord> {
        let task_type: TaskType = request.task_type.parse()?;
        if request
            .output_dir
            .as_deref()
            .is_none_or(|dir| dir.trim().is_empty())
        {
            request.output_dir = self.default_output_dir.clone();
        }

        let log_path = match self.logs.open(&request.task_id) {
            Ok(path) => Some(path.display().to_string()),
            Err(error) => {
                tracing::warn!(task_id = %request.task_id, error = %error, "task log unavailable");
                None
            }
        };

        let record = self.registry.insert_pending(NewTaskRecord {
            task_id: request.task_id.clone(),
            task_type,
            input_path: request.input_path.clone(),
            output_dir: request.output_dir.clone(),
            log_path,
        })?;

        self.logs.log(
            &record.task_id,
            task_type,
            TaskLogLevel::Info,
            format!("task accepted: input={}", record.input_path),
        );
        // The outcome reaches the registry through `RegistryObserver`.
        self.runner.submit(request);
        Ok(record)
    }

    pub fn list_tasks(&self) -> ServiceResult<Vec<TaskRecord>> {
        self.registry.list()
    }

    pub fn get_task_status(&self, task_id: &TaskId) -> ServiceResult<TaskRecord> {
        self.registry.get(task_id)
    }

    /// Idempotent: a task that already finished keeps its status.
    pub fn cancel_task(&self, task_id: &TaskId) -> ServiceResult<CancelAck> {
        let (status, changed) = self.registry.cancel(task_id)?;
        if changed {
            self.runner.cancel(task_id);
            if let Ok(record) = self.registry.get(task_id) {
                self.logs.log(
                    task_id,
                    record.task_type,
                    TaskLogLevel::Warn,
                    "task cancelled by caller",
                );
            }
            self.logs.close(task_id);
        }
        Ok(CancelAck {
            task_id: task_id.clone(),
            status,
        })
    }

    /// Stops admitting queued work; queued tasks end `cancelled` and running
    /// ones finish on their own. Admission stays closed until
    /// [`resume`](Self::resume).
    pub fn cancel_all(&self) -> usize {
        self.runner.cancel_batch()
    }

    pub fn resume(&self) {
        self.runner.resume_admission();
    }

    pub async fn wait_for_terminal(
        &self,
        task_id: &TaskId,
        timeout: Option<Duration>,
    ) -> ServiceResult<TaskRecord> {
        self.registry.wait_for_terminal(task_id, timeout).await
    }

    pub fn log_path(&self, task_id: &TaskId) -> Option<PathBuf> {
        self.logs.path(task_id).or_else(|| {
            let record = self.registry.get(task_id).ok()?;
            record.log_path.map(PathBuf::from)
        })
    }

    pub fn recent_log_lines(&self, task_id: &TaskId) -> Vec<String> {
        self.logs.recent_lines(task_id)
    }
}

struct RegistryObserver {
    registry: Arc<TaskRegistry>,
    logs: Arc<TaskLogSink>,
}

impl RegistryObserver {
    fn task_type(&self, task_id: &TaskId) -> Option<TaskType> {
        self.registry.get(task_id).ok().map(|record| record.task_type)
    }
}

impl TaskObserver for RegistryObserver {
    fn on_admitted(&self, task_id: &TaskId) -> bool {
        match self.registry.mark_running(task_id) {
            Ok(true) => {
                if let Some(task_type) = self.task_type(task_id) {
                    self.logs
                        .log(task_id, task_type, TaskLogLevel::Info, "task started");
                }
                true
            }
            Ok(false) => false,
            Err(error) => {
                tracing::error!(task_id = %task_id, error = %error, "cannot mark task running");
                false
            }
        }
    }

    fn on_retry(&self, task_id: &TaskId, attempt: u32, error: &TaskError) {
        if let Some(task_type) = self.task_type(task_id) {
            self.logs.log(
                task_id,
                task_type,
                TaskLogLevel::Warn,
                format!("attempt {attempt} failed ({}): {}; retrying", error.code, error.message),
            );
        }
    }

    fn on_finished(&self, outcome: &JobOutcome) {
        let task_id = outcome.task_id();
        let record = match self.registry.finish(&outcome.response) {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::debug!(task_id = %task_id, "late result for finished task ignored");
                return;
            }
            Err(error) => {
                tracing::error!(task_id = %task_id, error = %error, "cannot record task result");
                return;
            }
        };

        let (level, message) = match (outcome.status(), &record.summary, &record.error) {
            (TerminalStatus::Success, Some(summary), _) => (
                TaskLogLevel::Info,
                format!("task succeeded: {}", summary.counts()),
            ),
            (TerminalStatus::Cancelled, _, _) => {
                (TaskLogLevel::Warn, "task cancelled".to_string())
            }
            (_, _, Some(error)) => (
                TaskLogLevel::Error,
                format!("task failed: {} {}", error.code, error.message),
            ),
            (status, _, _) => (
                TaskLogLevel::Error,
                format!("task ended with status {:?}", TaskStatus::from(status)),
            ),
        };
        self.logs.log(task_id, record.task_type, level, message);
        self.logs.close(task_id);
    }
}
