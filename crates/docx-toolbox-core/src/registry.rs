use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;

use crate::logging::now_rfc3339;
use crate::models::{TaskError, TaskId, TaskRecord, TaskResponse, TaskStatus, TaskType};

pub type RegistryResult<T> = Result<T, TaskError>;

/// Fields a new record starts with; the registry owns everything else.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NewTaskRecord {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub input_path: String,
    pub output_dir: Option<String>,
    pub log_path: Option<String>,
}

#[derive(Default)]
struct RegistryState {
    records: HashMap<TaskId, TaskRecord>,
    order: Vec<TaskId>,
}

/// In-memory store of every task record visible to callers.
///
/// Each operation takes the one lock, applies the whole transition and
/// releases it, so readers never observe a half-written record. Callers only
/// ever receive clones.
#[derive(Default)]
pub struct TaskRegistry {
    state: Mutex<RegistryState>,
    terminal: Notify,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_pending(&self, record: NewTaskRecord) -> RegistryResult<TaskRecord> {
        let mut state = self.lock_state()?;
        if state.records.contains_key(&record.task_id) {
            return Err(TaskError::invalid_input("task id already exists")
                .with_detail(record.task_id.to_string()));
        }

        let created = TaskRecord {
            task_id: record.task_id.clone(),
            task_type: record.task_type,
            input_path: record.input_path,
            output_dir: record.output_dir,
            status: TaskStatus::Pending,
            summary: None,
            error: None,
            log_path: record.log_path,
            created_at: now_rfc3339(),
        };
        state.order.push(record.task_id.clone());
        state.records.insert(record.task_id, created.clone());
        Ok(created)
    }

    /// `pending -> running`. Returns `false` when the record has already left
    /// `pending`, for example because it was cancelled.
    pub fn mark_running(&self, task_id: &TaskId) -> RegistryResult<bool> {
        let mut state = self.lock_state()?;
        let record = state
            .records
            .get_mut(task_id)
            .ok_or_else(|| unknown_task(task_id))?;
        if record.status != TaskStatus::Pending {
            return Ok(false);
        }
        record.status = TaskStatus::Running;
        Ok(true)
    }

    /// Applies a runner result. A record that is already terminal is left
    /// untouched and `None` is returned.
    pub fn finish(&self, response: &TaskResponse) -> RegistryResult<Option<TaskRecord>> {
        let updated = {
            let mut state = self.lock_state()?;
            let record = state
                .records
                .get_mut(response.task_id())
                .ok_or_else(|| unknown_task(response.task_id()))?;
            if record.status.is_terminal() {
                return Ok(None);
            }
            record.status = response.task_status();
            record.summary = response.summary().cloned();
            record.error = response.error().cloned();
            record.clone()
        };
        self.terminal.notify_waiters();
        Ok(Some(updated))
    }

    /// Moves a pending or running record to `cancelled`. Returns the record's
    /// status afterwards and whether this call changed it; a terminal record
    /// is returned unchanged.
    pub fn cancel(&self, task_id: &TaskId) -> RegistryResult<(TaskStatus, bool)> {
        let result = {
            let mut state = self.lock_state()?;
            let record = state
                .records
                .get_mut(task_id)
                .ok_or_else(|| unknown_task(task_id))?;
            if record.status.is_terminal() {
                return Ok((record.status, false));
            }
            record.status = TaskStatus::Cancelled;
            record.summary = None;
            record.error = Some(TaskError::cancelled("cancelled by caller"));
            (record.status, true)
        };
        self.terminal.notify_waiters();
        Ok(result)
    }

    pub fn get(&self, task_id: &TaskId) -> RegistryResult<TaskRecord> {
        let state = self.lock_state()?;
        state
            .records
            .get(task_id)
            .cloned()
            .ok_or_else(|| unknown_task(task_id))
    }

    /// Snapshot of all records, most recent first.
    pub fn list(&self) -> RegistryResult<Vec<TaskRecord>> {
        let state = self.lock_state()?;
        Ok(state
            .order
            .iter()
            .rev()
            .filter_map(|task_id| state.records.get(task_id).cloned())
            .collect())
    }

    pub fn active_ids(&self) -> RegistryResult<Vec<TaskId>> {
        let state = self.lock_state()?;
        Ok(state
            .order
            .iter()
            .filter(|task_id| {
                state
                    .records
                    .get(*task_id)
                    .is_some_and(|record| !record.status.is_terminal())
            })
            .cloned()
            .collect())
    }

    pub async fn wait_for_terminal(
        &self,
        task_id: &TaskId,
        timeout_duration: Option<Duration>,
    ) -> RegistryResult<TaskRecord> {
        match timeout_duration {
            Some(duration) => tokio::time::timeout(duration, self.wait_until_terminal(task_id))
                .await
                .map_err(|_| {
                    TaskError::internal(format!("timed out waiting for task '{task_id}'"))
                })?,
            None => self.wait_until_terminal(task_id).await,
        }
    }

    async fn wait_until_terminal(&self, task_id: &TaskId) -> RegistryResult<TaskRecord> {
        loop {
            let notified = self.terminal.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let record = self.get(task_id)?;
            if record.status.is_terminal() {
                return Ok(record);
            }
            notified.await;
        }
    }

    fn lock_state(&self) -> RegistryResult<MutexGuard<'_, RegistryState>> {
        self.state
            .lock()
            .map_err(|_| TaskError::internal("task registry mutex poisoned"))
    }
}

fn unknown_task(task_id: &TaskId) -> TaskError {
    TaskError::invalid_input(format!("unknown task '{task_id}'"))
}

#[cfg(test)]
mod tests {
    use super::{NewTaskRecord, TaskRegistry};
    use crate::models::{
        ErrorCode, TaskError, TaskId, TaskResponse, TaskStatus, TaskSummary, TaskType,
    };

    fn new_record(id: &str) -> NewTaskRecord {
        NewTaskRecord {
            task_id: TaskId::from(id),
            task_type: TaskType::TableExtract,
            input_path: "/tmp/in.docx".to_string(),
            output_dir: None,
            log_path: None,
        }
    }

    #[test]
    fn lifecycle_runs_pending_running_terminal() {
        let registry = TaskRegistry::new();
        let record = registry.insert_pending(new_record("a")).unwrap();
        assert_eq!(record.status, TaskStatus::Pending);

        assert!(registry.mark_running(&record.task_id).unwrap());
        assert!(!registry.mark_running(&record.task_id).unwrap());

        let finished = registry
            .finish(&TaskResponse::success(record.task_id.clone(), TaskSummary::default()))
            .unwrap()
            .unwrap();
        assert_eq!(finished.status, TaskStatus::Success);
        assert!(finished.summary.is_some());
    }

    #[test]
    fn terminal_records_are_never_rewritten() {
        let registry = TaskRegistry::new();
        let id = registry.insert_pending(new_record("a")).unwrap().task_id;
        assert_eq!(registry.cancel(&id).unwrap(), (TaskStatus::Cancelled, true));

        let late = TaskResponse::success(id.clone(), TaskSummary::default());
        assert!(registry.finish(&late).unwrap().is_none());
        assert_eq!(registry.cancel(&id).unwrap(), (TaskStatus::Cancelled, false));

        let record = registry.get(&id).unwrap();
        assert_eq!(record.status, TaskStatus::Cancelled);
        assert_eq!(record.error.unwrap().code, ErrorCode::Cancelled);
        assert!(record.summary.is_none());
    }

    #[test]
    fn duplicate_and_unknown_ids_are_rejected() {
        let registry = TaskRegistry::new();
        registry.insert_pending(new_record("a")).unwrap();
        assert_eq!(
            registry.insert_pending(new_record("a")).unwrap_err().code,
            ErrorCode::InvalidInput
        );
        assert_eq!(
            registry.get(&TaskId::from("zz")).unwrap_err().code,
            ErrorCode::InvalidInput
        );
    }

    #[test]
    fn list_is_a_most_recent_first_snapshot() {
        let registry = TaskRegistry::new();
        registry.insert_pending(new_record("first")).unwrap();
        registry.insert_pending(new_record("second")).unwrap();

        let snapshot = registry.list().unwrap();
        registry
            .finish(&TaskResponse::failure(
                TaskId::from("first"),
                TaskError::process_failed("exit 1"),
            ))
            .unwrap();

        assert_eq!(snapshot[0].task_id.as_str(), "second");
        assert_eq!(snapshot[1].status, TaskStatus::Pending);
        assert_eq!(registry.active_ids().unwrap(), vec![TaskId::from("second")]);
    }
}
