use std::path::{Path, PathBuf};

use crate::models::{AdapterRequest, TaskError, TaskSummary, TaskType};
use crate::orchestration::TaskCancellationToken;

pub type AdapterResult<T> = Result<T, TaskError>;

/// One task type's bridge to its transformation routine.
///
/// Implementations hold no per-run state: everything a run needs arrives in
/// the [`AdapterRequest`] and leaves in the returned [`TaskSummary`].
pub trait DocumentAdapter: Send + Sync {
    fn task_type(&self) -> TaskType;

    /// Checks paths and options. Fails with `E_INVALID_INPUT`,
    /// `E_UNSUPPORTED_FORMAT` or `E_PERMISSION_DENIED` and touches nothing.
    fn validate(&self, request: &AdapterRequest) -> AdapterResult<()>;

    /// Runs the transformation, polling `cancel` between documents.
    fn execute(
        &self,
        request: &AdapterRequest,
        cancel: &TaskCancellationToken,
    ) -> AdapterResult<TaskSummary>;
}

pub fn ensure_task_type(
    adapter: &dyn DocumentAdapter,
    request: &AdapterRequest,
) -> AdapterResult<()> {
    if adapter.task_type() != request.task_type() {
        return Err(TaskError::invalid_input(format!(
            "{} adapter cannot run {} requests",
            adapter.task_type(),
            request.task_type()
        )));
    }
    Ok(())
}

pub fn execute_validated(
    adapter: &dyn DocumentAdapter,
    request: &AdapterRequest,
    cancel: &TaskCancellationToken,
) -> AdapterResult<TaskSummary> {
    ensure_task_type(adapter, request)?;
    adapter.validate(request)?;
    cancel.checkpoint(&TaskSummary::default(), "cancelled before execution")?;
    adapter.execute(request, cancel)
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ItemOutcome {
    Processed(Vec<String>),
    Skipped,
}

/// Per-document loop shared by the adapters.
///
/// A failing document is recorded in the summary and the loop moves on,
/// unless its error code aborts the request; then the counts so far travel
/// back as the error's `partial`. In dry-run mode every candidate is counted
/// as skipped and `run` is never called.
pub(crate) fn process_documents<F>(
    task_type: TaskType,
    documents: &[PathBuf],
    dry_run: bool,
    cancel: &TaskCancellationToken,
    mut run: F,
) -> AdapterResult<TaskSummary>
where
    F: FnMut(&Path) -> AdapterResult<ItemOutcome>,
{
    let mut summary = TaskSummary::default();

    for document in documents {
        let item = document.display().to_string();
        cancel.checkpoint(&summary, format!("cancelled before {item}"))?;

        if dry_run {
            tracing::debug!(task_type = %task_type, item = %item, "dry run, document not processed");
            summary.record_skipped();
            continue;
        }

        match run(document) {
            Ok(ItemOutcome::Processed(outputs)) => summary.record_processed(outputs),
            Ok(ItemOutcome::Skipped) => summary.record_skipped(),
            Err(error) if error.code.aborts_request() => {
                return Err(error.with_partial(summary));
            }
            Err(error) => {
                tracing::warn!(
                    task_type = %task_type,
                    item = %item,
                    code = %error.code,
                    error = %error.message,
                    "document failed"
                );
                summary.record_failed(item, &error);
            }
        }
    }

    Ok(summary)
}
