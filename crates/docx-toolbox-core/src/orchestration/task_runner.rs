use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinSet;

use crate::dispatch::Dispatcher;
use crate::models::{TaskError, TaskId, TaskRequest, TaskResponse, TerminalStatus};
use crate::orchestration::{OrchestrationResult, RunnerConfig, TaskCancellationToken, TaskObserver};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JobOutcome {
    pub response: TaskResponse,
    /// Adapter invocations made, retries included.
    pub attempts: u32,
    /// `false` when the job finished without reaching an adapter.
    pub executed: bool,
}

impl JobOutcome {
    fn not_executed(task_id: TaskId, error: TaskError) -> Self {
        Self {
            response: TaskResponse::failure(task_id, error),
            attempts: 0,
            executed: false,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        self.response.task_id()
    }

    pub fn status(&self) -> TerminalStatus {
        self.response.status()
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
    pub task_id: TaskId,
    pub status: TerminalStatus,
}

pub struct TaskHandle {
    task_id: TaskId,
    receiver: oneshot::Receiver<JobOutcome>,
}

impl TaskHandle {
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub async fn wait(self) -> JobOutcome {
        let task_id = self.task_id;
        self.receiver.await.unwrap_or_else(|_| {
            JobOutcome::not_executed(task_id, TaskError::internal("runner dropped the job"))
        })
    }
}

struct Job {
    request: TaskRequest,
    token: TaskCancellationToken,
    reply: oneshot::Sender<JobOutcome>,
}

#[derive(Default)]
struct RunnerState {
    queue: VecDeque<Job>,
    running: HashMap<TaskId, TaskCancellationToken>,
    in_flight: usize,
    admission_stopped: bool,
}

struct RunnerShared {
    dispatcher: Dispatcher,
    config: RunnerConfig,
    observer: Option<Arc<dyn TaskObserver>>,
    handle: Handle,
    state: Mutex<RunnerState>,
}

/// FIFO job queue drained by a bounded pool. Each job runs on tokio's
/// blocking pool. The job at the head is admitted while fewer jobs are in
/// flight than the larger of the configured `workers` and its own
/// `runtime.workers`, so a runner and requests that all ask for one worker
/// give strictly serial execution in submission order.
#[derive(Clone)]
pub struct TaskRunner {
    shared: Arc<RunnerShared>,
}

impl TaskRunner {
    /// Binds to the tokio runtime the caller is running in.
    pub fn new(dispatcher: Dispatcher, config: RunnerConfig) -> OrchestrationResult<Self> {
        let handle = Handle::try_current().map_err(|error| {
            TaskError::internal("task runner requires a tokio runtime")
                .with_detail(error.to_string())
        })?;
        Ok(Self::from_parts(dispatcher, config, handle, None))
    }

    pub fn from_parts(
        dispatcher: Dispatcher,
        config: RunnerConfig,
        handle: Handle,
        observer: Option<Arc<dyn TaskObserver>>,
    ) -> Self {
        Self {
            shared: Arc::new(RunnerShared {
                dispatcher,
                config: RunnerConfig::new(config.workers, config.retry),
                observer,
                handle,
                state: Mutex::new(RunnerState::default()),
            }),
        }
    }

    pub fn config(&self) -> RunnerConfig {
        self.shared.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.shared.dispatcher
    }

    /// Queues `request`. The handle resolves once the job reaches a terminal
    /// outcome, whether or not it ever ran.
    pub fn submit(&self, request: TaskRequest) -> TaskHandle {
        let (reply, receiver) = oneshot::channel();
        let task_id = request.task_id.clone();
        let handle = TaskHandle {
            task_id: task_id.clone(),
            receiver,
        };
        let job = Job {
            request,
            token: TaskCancellationToken::new(),
            reply,
        };

        let rejected = match self.shared.lock_state() {
            Err(error) => Some((job, error, false)),
            Ok(mut state) => {
                let duplicate = state.running.contains_key(&task_id)
                    || state.queue.iter().any(|queued| queued.request.task_id == task_id);
                if duplicate {
                    Some((
                        job,
                        TaskError::invalid_input("task id is already queued or running")
                            .with_detail(task_id.to_string()),
                        false,
                    ))
                } else if state.admission_stopped {
                    Some((
                        job,
                        TaskError::cancelled("batch cancelled, task not admitted"),
                        true,
                    ))
                } else {
                    state.queue.push_back(job);
                    None
                }
            }
        };

        match rejected {
            Some((job, error, notify)) => {
                tracing::warn!(task_id = %task_id, code = %error.code, "task not queued");
                self.shared.finish(job, JobOutcome::not_executed(task_id, error), notify);
            }
            None => {
                tracing::debug!(task_id = %task_id, "task queued");
                self.pump();
            }
        }

        handle
    }

    /// Cancels one task. A queued task finishes `cancelled` without running;
    /// a running task has its token set and stops at its next checkpoint.
    /// Returns `false` when the runner does not know the id.
    pub fn cancel(&self, task_id: &TaskId) -> bool {
        let removed = {
            let Ok(mut state) = self.shared.lock_state() else {
                return false;
            };
            if let Some(token) = state.running.get(task_id) {
                token.cancel();
                tracing::info!(task_id = %task_id, "cancellation signalled to running task");
                return true;
            }
            match state
                .queue
                .iter()
                .position(|job| &job.request.task_id == task_id)
            {
                Some(index) => state.queue.remove(index),
                None => None,
            }
        };

        match removed {
            Some(job) => {
                job.token.cancel();
                self.shared.finish(
                    job,
                    JobOutcome::not_executed(
                        task_id.clone(),
                        TaskError::cancelled("cancelled before admission"),
                    ),
                    true,
                );
                true
            }
            None => false,
        }
    }

    /// Stops admission. Everything still queued, and anything submitted until
    /// [`resume_admission`](Self::resume_admission), finishes `cancelled`
    /// without running. Jobs already running are left alone.
    pub fn cancel_batch(&self) -> usize {
        let drained: Vec<Job> = match self.shared.lock_state() {
            Ok(mut state) => {
                state.admission_stopped = true;
                state.queue.drain(..).collect()
            }
            Err(_) => return 0,
        };

        let count = drained.len();
        tracing::info!(dropped = count, "batch cancelled, admission stopped");
        for job in drained {
            job.token.cancel();
            let task_id = job.request.task_id.clone();
            self.shared.finish(
                job,
                JobOutcome::not_executed(
                    task_id,
                    TaskError::cancelled("batch cancelled before admission"),
                ),
                true,
            );
        }
        count
    }

    pub fn resume_admission(&self) {
        if let Ok(mut state) = self.shared.lock_state() {
            state.admission_stopped = false;
        }
    }

    pub fn is_admission_stopped(&self) -> bool {
        self.shared
            .lock_state()
            .map(|state| state.admission_stopped)
            .unwrap_or(true)
    }

    pub fn queued(&self) -> usize {
        self.shared
            .lock_state()
            .map(|state| state.queue.len())
            .unwrap_or_default()
    }

    pub fn in_flight(&self) -> usize {
        self.shared
            .lock_state()
            .map(|state| state.in_flight)
            .unwrap_or_default()
    }

    /// Submits every request and waits for all of them. Outcomes come back in
    /// submission order; `progress` sees them in completion order.
    pub async fn run_batch(
        &self,
        requests: Vec<TaskRequest>,
        progress: Option<&(dyn Fn(BatchProgress) + Send + Sync)>,
    ) -> Vec<JobOutcome> {
        let total = requests.len();
        let handles: Vec<TaskHandle> = requests
            .into_iter()
            .map(|request| self.submit(request))
            .collect();
        let task_ids: Vec<TaskId> = handles.iter().map(|handle| handle.task_id().clone()).collect();

        let mut waiting = JoinSet::new();
        for (index, handle) in handles.into_iter().enumerate() {
            waiting.spawn_on(async move { (index, handle.wait().await) }, &self.shared.handle);
        }

        let mut outcomes: Vec<Option<JobOutcome>> = vec![None; total];
        let mut completed = 0;
        while let Some(joined) = waiting.join_next().await {
            let Ok((index, outcome)) = joined else {
                continue;
            };
            completed += 1;
            if let Some(progress) = progress {
                progress(BatchProgress {
                    completed,
                    total,
                    task_id: outcome.task_id().clone(),
                    status: outcome.status(),
                });
            }
            outcomes[index] = Some(outcome);
        }

        outcomes
            .into_iter()
            .zip(task_ids)
            .map(|(outcome, task_id)| {
                outcome.unwrap_or_else(|| {
                    JobOutcome::not_executed(task_id, TaskError::internal("batch waiter failed"))
                })
            })
            .collect()
    }

    fn pump(&self) {
        let (admitted, abandoned) = {
            let Ok(mut state) = self.shared.lock_state() else {
                return;
            };
            let mut admitted = Vec::new();
            let mut abandoned = Vec::new();
            while let Some(head) = state.queue.front() {
                if !head.token.is_cancelled()
                    && state.in_flight >= self.shared.worker_limit(&head.request)
                {
                    break;
                }
                let Some(job) = state.queue.pop_front() else {
                    break;
                };
                if job.token.is_cancelled() {
                    abandoned.push(job);
                    continue;
                }
                state.in_flight += 1;
                state
                    .running
                    .insert(job.request.task_id.clone(), job.token.clone());
                admitted.push(job);
            }
            (admitted, abandoned)
        };

        for job in abandoned {
            let task_id = job.request.task_id.clone();
            self.shared.finish(
                job,
                JobOutcome::not_executed(
                    task_id,
                    TaskError::cancelled("cancelled before admission"),
                ),
                true,
            );
        }

        for job in admitted {
            let runner = self.clone();
            self.shared.handle.spawn(async move {
                runner.run_job(job).await;
            });
        }
    }

    async fn run_job(self, job: Job) {
        let task_id = job.request.task_id.clone();
        let admitted = self
            .shared
            .observer
            .as_ref()
            .is_none_or(|observer| observer.on_admitted(&task_id));

        let outcome = if !admitted || job.token.is_cancelled() {
            JobOutcome::not_executed(
                task_id.clone(),
                TaskError::cancelled("cancelled before start"),
            )
        } else {
            self.execute_with_retry(&job.request, &job.token).await
        };

        if let Ok(mut state) = self.shared.lock_state() {
            state.in_flight = state.in_flight.saturating_sub(1);
            state.running.remove(&task_id);
        }

        self.shared.finish(job, outcome, true);
        self.pump();
    }

    async fn execute_with_retry(
        &self,
        request: &TaskRequest,
        token: &TaskCancellationToken,
    ) -> JobOutcome {
        let task_id = request.task_id.clone();
        let retry = self.shared.config.retry;
        let mut attempts = 0;

        loop {
            attempts += 1;
            let dispatcher = self.shared.dispatcher.clone();
            let attempt_request = request.clone();
            let attempt_token = token.clone();
            let joined = tokio::task::spawn_blocking(move || {
                dispatcher.run_task_with_token(&attempt_request, &attempt_token)
            })
            .await;

            let response = joined.unwrap_or_else(|error| {
                tracing::error!(task_id = %task_id, error = %error, "task worker aborted");
                TaskResponse::failure(
                    task_id.clone(),
                    TaskError::internal("task worker aborted").with_detail(error.to_string()),
                )
            });

            if let Some(error) = response.error()
                && retry.should_retry(attempts, error, token)
            {
                tracing::info!(
                    task_id = %task_id,
                    attempt = attempts,
                    code = %error.code,
                    "retrying task"
                );
                if let Some(observer) = &self.shared.observer {
                    observer.on_retry(&task_id, attempts, error);
                }
                if !retry.backoff.is_zero() {
                    tokio::time::sleep(retry.backoff).await;
                }
                if token.is_cancelled() {
                    return JobOutcome {
                        response: TaskResponse::failure(
                            task_id,
                            TaskError::cancelled("cancelled before retry"),
                        ),
                        attempts,
                        executed: true,
                    };
                }
                continue;
            }

            return JobOutcome {
                response,
                attempts,
                executed: true,
            };
        }
    }
}

impl RunnerShared {
    /// Pool size the head of the queue may run in: the request's own
    /// `runtime.workers`, never below the runner's configured size.
    fn worker_limit(&self, request: &TaskRequest) -> usize {
        request.runtime.workers.max(self.config.workers)
    }

    fn lock_state(&self) -> OrchestrationResult<MutexGuard<'_, RunnerState>> {
        self.state
            .lock()
            .map_err(|_| TaskError::internal("task runner state lock poisoned"))
    }

    fn finish(&self, job: Job, outcome: JobOutcome, notify: bool) {
        if notify && let Some(observer) = &self.observer {
            observer.on_finished(&outcome);
        }
        let _ = job.reply.send(outcome);
    }
}
