use std::path::Path;

use crate::adapters::document::AdapterResult;
use crate::execution::{
    ProcessExecutor, ProcessExitStatus, ProcessOutput, ProcessSpawnRequest, spawn_validated,
};
use crate::models::{TaskError, TaskType};
use crate::orchestration::TaskCancellationToken;

const STDERR_TAIL_LINES: usize = 20;

/// Runs one process to completion from a blocking context. Uses the ambient
/// tokio runtime when there is one, otherwise a private current-thread runtime.
pub(crate) fn run_process(
    executor: &dyn ProcessExecutor,
    request: ProcessSpawnRequest,
    cancel: &TaskCancellationToken,
) -> AdapterResult<ProcessOutput> {
    let task_type = request.task_type;

    let output = match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            let _guard = handle.enter();
            let process = spawn_validated(executor, request)?;
            handle.block_on(process.wait(cancel.clone()))?
        }
        Err(_) => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|error| {
                    TaskError::internal("failed to start process runtime")
                        .with_detail(error.to_string())
                })?;
            let _guard = runtime.enter();
            let process = spawn_validated(executor, request)?;
            runtime.block_on(process.wait(cancel.clone()))?
        }
    };

    forward_output(task_type, &output);
    Ok(output)
}

/// Like [`run_process`] but treats anything other than exit code 0 as
/// `E_PROCESS_FAILED`.
pub(crate) fn run_to_success(
    executor: &dyn ProcessExecutor,
    request: ProcessSpawnRequest,
    cancel: &TaskCancellationToken,
) -> AdapterResult<ProcessOutput> {
    let task_type = request.task_type;
    let output = run_process(executor, request, cancel)?;
    ensure_success(task_type, &output)?;
    Ok(output)
}

pub(crate) fn ensure_script(script: &Path) -> AdapterResult<()> {
    if script.is_file() {
        return Ok(());
    }
    Err(TaskError::process_failed("transformation script not found")
        .with_detail(script.display().to_string()))
}

pub(crate) fn ensure_success(task_type: TaskType, output: &ProcessOutput) -> AdapterResult<()> {
    match output.status {
        ProcessExitStatus::ExitCode(0) => Ok(()),
        ProcessExitStatus::ExitCode(code) => Err(TaskError::process_failed(format!(
            "{task_type} process exited with code {code}"
        ))
        .with_detail(stderr_tail(output))),
        ProcessExitStatus::Terminated => Err(TaskError::process_failed(format!(
            "{task_type} process was terminated by signal"
        ))
        .with_detail(stderr_tail(output))),
    }
}

pub(crate) fn stderr_tail(output: &ProcessOutput) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let lines: Vec<&str> = stderr.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

fn forward_output(task_type: TaskType, output: &ProcessOutput) {
    for line in String::from_utf8_lossy(&output.stdout).lines() {
        tracing::debug!(task_type = %task_type, stream = "stdout", "{line}");
    }
    for line in String::from_utf8_lossy(&output.stderr).lines() {
        tracing::debug!(task_type = %task_type, stream = "stderr", "{line}");
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::{ensure_success, stderr_tail};
    use crate::execution::{ProcessExitStatus, ProcessOutput};
    use crate::models::{ErrorCode, TaskType};

    fn output(status: ProcessExitStatus, stderr: &str) -> ProcessOutput {
        ProcessOutput {
            status,
            stdout: Vec::new(),
            stderr: stderr.as_bytes().to_vec(),
            started_at: SystemTime::now(),
            finished_at: SystemTime::now(),
        }
    }

    #[test]
    fn non_zero_exit_is_process_failure_with_stderr() {
        let error = ensure_success(
            TaskType::ImageExtract,
            &output(ProcessExitStatus::ExitCode(2), "Traceback\nValueError: bad docx"),
        )
        .unwrap_err();
        assert_eq!(error.code, ErrorCode::ProcessFailed);
        assert!(error.detail.ends_with("ValueError: bad docx"));
    }

    #[test]
    fn stderr_tail_is_bounded() {
        let stderr: Vec<String> = (0..50).map(|index| format!("line {index}")).collect();
        let tail = stderr_tail(&output(ProcessExitStatus::ExitCode(1), &stderr.join("\n")));
        assert_eq!(tail.lines().count(), 20);
        assert!(tail.starts_with("line 30"));
    }
}
