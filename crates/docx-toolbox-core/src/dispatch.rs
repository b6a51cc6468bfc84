use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, OnceLock};

use crate::adapters::{
    DocumentAdapter, ExcelAllinoneAdapter, ImageExtractAdapter, ProcessExcelAllinoneSource,
    ProcessImageExtractSource, ProcessTableExtractSource, TableExtractAdapter, execute_validated,
};
use crate::config::CoreConfig;
use crate::execution::ProcessExecutor;
use crate::execution::tokio_process::TokioProcessExecutor;
use crate::models::{AdapterRequest, TaskError, TaskRequest, TaskResponse, TaskType};
use crate::orchestration::TaskCancellationToken;

/// Adapter lookup keyed on task type. Cheap to clone and safe to share
/// between threads; it holds no per-task state.
#[derive(Clone)]
pub struct Dispatcher {
    adapters: Arc<HashMap<TaskType, Arc<dyn DocumentAdapter>>>,
}

impl Dispatcher {
    pub fn new(adapters: Vec<Arc<dyn DocumentAdapter>>) -> Result<Self, TaskError> {
        let mut map: HashMap<TaskType, Arc<dyn DocumentAdapter>> = HashMap::new();
        for adapter in adapters {
            let task_type = adapter.task_type();
            if map.insert(task_type, adapter).is_some() {
                return Err(TaskError::internal(format!(
                    "duplicate adapter registration for {task_type}"
                )));
            }
        }
        Ok(Self {
            adapters: Arc::new(map),
        })
    }

    /// Dispatcher backed by the transformation scripts under
    /// `config.references_dir`.
    pub fn from_config(config: &CoreConfig) -> Self {
        Self::with_executor(config, Arc::new(TokioProcessExecutor))
    }

    pub fn with_executor(config: &CoreConfig, executor: Arc<dyn ProcessExecutor>) -> Self {
        let timeout = config.process_timeout();
        let references = config.references_dir.as_path();

        let adapters: [Arc<dyn DocumentAdapter>; 3] = [
            Arc::new(ExcelAllinoneAdapter::new(ProcessExcelAllinoneSource::new(
                executor.clone(),
                config.python.clone(),
                references,
                timeout,
            ))),
            Arc::new(ImageExtractAdapter::new(ProcessImageExtractSource::new(
                executor.clone(),
                config.python.clone(),
                references,
                timeout,
            ))),
            Arc::new(TableExtractAdapter::new(ProcessTableExtractSource::new(
                executor,
                config.python.clone(),
                references,
                timeout,
            ))),
        ];

        Self {
            adapters: Arc::new(
                adapters
                    .into_iter()
                    .map(|adapter| (adapter.task_type(), adapter))
                    .collect(),
            ),
        }
    }

    pub fn adapter(&self, task_type: TaskType) -> Result<Arc<dyn DocumentAdapter>, TaskError> {
        self.adapters.get(&task_type).cloned().ok_or_else(|| {
            TaskError::invalid_input(format!("no adapter registered for {task_type}"))
        })
    }

    pub fn task_types(&self) -> Vec<TaskType> {
        let mut types: Vec<TaskType> = self.adapters.keys().copied().collect();
        types.sort_by_key(|task_type| task_type.as_str());
        types
    }

    /// Validates the envelope and resolves the adapter without running it.
    pub fn prepare(
        &self,
        request: &TaskRequest,
    ) -> Result<(Arc<dyn DocumentAdapter>, AdapterRequest), TaskError> {
        let parsed = request.parse()?;
        let adapter = self.adapter(parsed.task_type())?;
        Ok((adapter, parsed))
    }

    pub fn run_task(&self, request: &TaskRequest) -> TaskResponse {
        self.run_task_with_token(request, &TaskCancellationToken::new())
    }

    /// Runs one request to a terminal response. Adapter errors and panics both
    /// come back as a failed response; nothing escapes to the caller.
    pub fn run_task_with_token(
        &self,
        request: &TaskRequest,
        cancel: &TaskCancellationToken,
    ) -> TaskResponse {
        let task_id = request.task_id.clone();
        let span = tracing::info_span!(
            "run_task",
            task_id = %task_id,
            task_type = %request.task_type
        );
        let _entered = span.enter();

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let (adapter, parsed) = self.prepare(request)?;
            execute_validated(adapter.as_ref(), &parsed, cancel)
        }));

        let response = match outcome {
            Ok(Ok(summary)) => TaskResponse::success(task_id, summary),
            Ok(Err(error)) => TaskResponse::failure(task_id, error),
            Err(payload) => {
                let detail = panic_message(payload.as_ref());
                tracing::error!(detail = %detail, "adapter panicked");
                TaskResponse::failure(
                    task_id,
                    TaskError::internal("adapter panicked").with_detail(detail),
                )
            }
        };

        match response.error() {
            None => tracing::info!(
                counts = %response.summary().map(|summary| summary.counts()).unwrap_or_default(),
                "task succeeded"
            ),
            Some(error) => tracing::warn!(code = %error.code, error = %error.message, "task failed"),
        }
        response
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

static DEFAULT_DISPATCHER: OnceLock<Dispatcher> = OnceLock::new();

/// Runs `request` with the process-backed adapters and default settings.
pub fn run_task(request: &TaskRequest) -> TaskResponse {
    DEFAULT_DISPATCHER
        .get_or_init(|| Dispatcher::from_config(&CoreConfig::default()))
        .run_task(request)
}
