use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use tokio::io::AsyncReadExt;

use crate::execution::{
    ExecutionResult, ProcessExecutor, ProcessExitStatus, ProcessOutput, ProcessSpawnRequest,
    ProcessWaitFuture, RunningProcess,
};
use crate::models::{TaskError, TaskType};
use crate::orchestration::TaskCancellationToken;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);
const KILL_SETTLE_WINDOW: Duration = Duration::from_secs(1);
const OUTPUT_READ_WINDOW: Duration = Duration::from_millis(250);

pub struct TokioProcessExecutor;

impl ProcessExecutor for TokioProcessExecutor {
    fn spawn(&self, request: ProcessSpawnRequest) -> ExecutionResult<Box<dyn RunningProcess>> {
        let mut cmd = tokio::process::Command::new(&request.command.program);
        cmd.args(&request.command.args);

        for (key, value) in &request.command.env {
            cmd.env(key, value);
        }

        if let Some(dir) = &request.command.working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdin(std::process::Stdio::null());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|error| {
            process_failure(
                request.task_type,
                format!(
                    "failed to spawn '{}': {error}",
                    request.command.program.display()
                ),
            )
        })?;

        let pid = child.id();
        let started_at = SystemTime::now();

        Ok(Box::new(TokioRunningProcess {
            child: Mutex::new(Some(child)),
            pid,
            started_at,
            timeout: request.timeout,
            task_type: request.task_type,
        }))
    }
}

struct TokioRunningProcess {
    child: Mutex<Option<tokio::process::Child>>,
    pid: Option<u32>,
    started_at: SystemTime,
    timeout: Option<Duration>,
    task_type: TaskType,
}

enum WaitStep {
    Exited(std::io::Result<std::process::ExitStatus>),
    Tick,
}

impl RunningProcess for TokioRunningProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn wait(self: Box<Self>, cancel: TaskCancellationToken) -> ProcessWaitFuture {
        let child = self.child.into_inner().ok().flatten();
        let timeout = self.timeout;
        let started_at = self.started_at;
        let task_type = self.task_type;
        let pid = self.pid;

        Box::pin(async move {
            let mut child = child.ok_or_else(|| {
                process_failure(task_type, "child process already consumed".to_string())
            })?;

            let stdout_reader = {
                let mut stdout = child.stdout.take();
                tokio::spawn(async move {
                    let mut buffer = Vec::new();
                    if let Some(mut handle) = stdout.take() {
                        let _ = handle.read_to_end(&mut buffer).await;
                    }
                    buffer
                })
            };
            let stderr_reader = {
                let mut stderr = child.stderr.take();
                tokio::spawn(async move {
                    let mut buffer = Vec::new();
                    if let Some(mut handle) = stderr.take() {
                        let _ = handle.read_to_end(&mut buffer).await;
                    }
                    buffer
                })
            };

            let deadline = timeout.map(|duration| tokio::time::Instant::now() + duration);
            let mut poll = tokio::time::interval(CANCEL_POLL_INTERVAL);

            let status = loop {
                let step = tokio::select! {
                    result = child.wait() => WaitStep::Exited(result),
                    _ = poll.tick() => WaitStep::Tick,
                };

                match step {
                    WaitStep::Exited(result) => {
                        break result.map_err(|error| {
                            process_failure(
                                task_type,
                                format!("failed to wait for process: {error}"),
                            )
                        })?;
                    }
                    WaitStep::Tick => {
                        let timed_out = deadline
                            .is_some_and(|deadline| tokio::time::Instant::now() >= deadline);
                        if !cancel.is_cancelled() && !timed_out {
                            continue;
                        }

                        // Descendants share the group, so kill the group and not just the child.
                        let group_killed = pid.is_some_and(|pid| kill_process_group(pid).is_ok());
                        if !group_killed {
                            let _ = child.start_kill();
                        }
                        let _ = tokio::time::timeout(KILL_SETTLE_WINDOW, child.wait()).await;
                        stdout_reader.abort();
                        stderr_reader.abort();

                        if cancel.is_cancelled() {
                            return Err(TaskError::cancelled(format!(
                                "{task_type} process {} terminated",
                                pid.map(|pid| pid.to_string()).unwrap_or_default()
                            )));
                        }
                        let elapsed = timeout.map(|value| value.as_millis()).unwrap_or_default();
                        return Err(process_failure(
                            task_type,
                            format!("process timed out after {elapsed}ms"),
                        ));
                    }
                }
            };

            // Descendants may keep the pipes open after exit; bound the read.
            let stdout = match tokio::time::timeout(OUTPUT_READ_WINDOW, stdout_reader).await {
                Ok(Ok(buffer)) => buffer,
                _ => Vec::new(),
            };
            let stderr = match tokio::time::timeout(OUTPUT_READ_WINDOW, stderr_reader).await {
                Ok(Ok(buffer)) => buffer,
                _ => Vec::new(),
            };

            let finished_at = SystemTime::now();

            let status = match status.code() {
                Some(code) => ProcessExitStatus::ExitCode(code),
                None => ProcessExitStatus::Terminated,
            };

            Ok(ProcessOutput {
                status,
                stdout,
                stderr,
                started_at,
                finished_at,
            })
        })
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) -> std::io::Result<()> {
    let pgid = -(pid as libc::pid_t);
    let result = unsafe { libc::kill(pgid, libc::SIGKILL) };

    if result != 0 {
        let os_error = std::io::Error::last_os_error();
        if os_error.raw_os_error() != Some(libc::ESRCH) {
            return Err(os_error);
        }
    }

    Ok(())
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "process group signalling is only available on unix",
    ))
}

fn process_failure(task_type: TaskType, message: String) -> TaskError {
    TaskError::process_failed(message).with_detail(task_type.to_string())
}
