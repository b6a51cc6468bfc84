use std::collections::{HashMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::models::{TaskError, TaskId, TaskLogLevel, TaskLogLine, TaskType};

/// Installs the global `fmt` subscriber filtered by `RUST_LOG` (default
/// `info`). Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}

pub(crate) fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string())
}

fn date_dir(now: OffsetDateTime) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        now.year(),
        u8::from(now.month()),
        now.day()
    )
}

/// Closed tasks whose in-memory window is kept by default.
pub const DEFAULT_RETAINED_CLOSED: usize = 256;

struct TaskLogState {
    path: PathBuf,
    file: Option<File>,
    recent: VecDeque<String>,
}

#[derive(Default)]
struct SinkState {
    tasks: HashMap<TaskId, TaskLogState>,
    /// Closed task ids, oldest first.
    closed: VecDeque<TaskId>,
}

/// Per-task history: the full log goes to `<root>/<YYYY-MM-DD>/<task_id>.log`
/// and the newest `window` lines stay in memory for UIs. Only the most recent
/// `retained_closed` closed tasks keep their window; older ones are dropped
/// and survive only on disk.
pub struct TaskLogSink {
    root: PathBuf,
    window: usize,
    retained_closed: usize,
    state: Mutex<SinkState>,
}

impl TaskLogSink {
    pub fn new(root: impl Into<PathBuf>, window: usize) -> Self {
        Self {
            root: root.into(),
            window: window.max(1),
            retained_closed: DEFAULT_RETAINED_CLOSED,
            state: Mutex::new(SinkState::default()),
        }
    }

    pub fn retained_closed(mut self, retained_closed: usize) -> Self {
        self.retained_closed = retained_closed;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the task's log file and returns its path. Opening an already
    /// open task returns the existing path.
    pub fn open(&self, task_id: &TaskId) -> Result<PathBuf, TaskError> {
        let mut sink = self.lock()?;
        if let Some(state) = sink.tasks.get(task_id) {
            return Ok(state.path.clone());
        }

        let dir = self.root.join(date_dir(OffsetDateTime::now_utc()));
        std::fs::create_dir_all(&dir)
            .map_err(|error| TaskError::from(error).with_detail(dir.display().to_string()))?;
        let path = dir.join(format!("{task_id}.log"));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|error| TaskError::from(error).with_detail(path.display().to_string()))?;

        sink.tasks.insert(
            task_id.clone(),
            TaskLogState {
                path: path.clone(),
                file: Some(file),
                recent: VecDeque::new(),
            },
        );
        Ok(path)
    }

    /// Records one line. Write failures are reported through `tracing` and
    /// otherwise ignored; logging never fails a task.
    pub fn log(
        &self,
        task_id: &TaskId,
        task_type: TaskType,
        level: TaskLogLevel,
        message: impl Into<String>,
    ) {
        let line = TaskLogLine {
            timestamp: now_rfc3339(),
            level,
            task_type,
            task_id: task_id.clone(),
            message: message.into(),
        };

        match level {
            TaskLogLevel::Debug => {
                tracing::debug!(task_id = %task_id, task_type = %task_type, "{}", line.message)
            }
            TaskLogLevel::Info => {
                tracing::info!(task_id = %task_id, task_type = %task_type, "{}", line.message)
            }
            TaskLogLevel::Warn => {
                tracing::warn!(task_id = %task_id, task_type = %task_type, "{}", line.message)
            }
            TaskLogLevel::Error => {
                tracing::error!(task_id = %task_id, task_type = %task_type, "{}", line.message)
            }
        }

        let Ok(mut sink) = self.lock() else {
            return;
        };
        let Some(state) = sink.tasks.get_mut(task_id) else {
            return;
        };

        let rendered = line.to_string();
        if let Some(file) = state.file.as_mut()
            && let Err(error) = writeln!(file, "{rendered}")
        {
            tracing::warn!(path = %state.path.display(), error = %error, "failed to write task log");
            state.file = None;
        }

        state.recent.push_back(rendered);
        while state.recent.len() > self.window {
            state.recent.pop_front();
        }
    }

    /// Releases the file handle. The path and the window stay available
    /// until the task ages out of the retained closed set.
    pub fn close(&self, task_id: &TaskId) {
        let Ok(mut sink) = self.lock() else {
            return;
        };
        let Some(state) = sink.tasks.get_mut(task_id) else {
            return;
        };
        let Some(mut file) = state.file.take() else {
            return;
        };
        let _ = file.flush();

        sink.closed.push_back(task_id.clone());
        while sink.closed.len() > self.retained_closed {
            if let Some(evicted) = sink.closed.pop_front() {
                sink.tasks.remove(&evicted);
            }
        }
    }

    pub fn path(&self, task_id: &TaskId) -> Option<PathBuf> {
        self.lock()
            .ok()
            .and_then(|sink| sink.tasks.get(task_id).map(|state| state.path.clone()))
    }

    pub fn recent_lines(&self, task_id: &TaskId) -> Vec<String> {
        self.lock()
            .ok()
            .and_then(|sink| {
                sink.tasks
                    .get(task_id)
                    .map(|state| state.recent.iter().cloned().collect())
            })
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, SinkState>, TaskError> {
        self.state
            .lock()
            .map_err(|_| TaskError::internal("task log state lock poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::TaskLogSink;
    use crate::models::{TaskId, TaskLogLevel, TaskType};

    #[test]
    fn writes_formatted_lines_to_dated_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = TaskLogSink::new(dir.path(), 500);
        let task_id = TaskId::from("abc123");

        let path = sink.open(&task_id).unwrap();
        assert_eq!(path.file_name().unwrap(), "abc123.log");
        assert_eq!(path.parent().unwrap().parent().unwrap(), dir.path());

        sink.log(&task_id, TaskType::TableExtract, TaskLogLevel::Info, "task started");
        sink.close(&task_id);

        let content = std::fs::read_to_string(&path).unwrap();
        let fields: Vec<&str> = content.trim_end().split(" | ").collect();
        assert_eq!(fields.len(), 5);
        assert_eq!(fields[1], "INFO ");
        assert_eq!(fields[2], "table_extract");
        assert_eq!(fields[3], "task=abc123");
        assert_eq!(fields[4], "task started");
    }

    #[test]
    fn memory_window_keeps_newest_lines() {
        let dir = tempfile::tempdir().unwrap();
        let sink = TaskLogSink::new(dir.path(), 3);
        let task_id = TaskId::from("windowed");
        sink.open(&task_id).unwrap();

        for index in 0..5 {
            sink.log(
                &task_id,
                TaskType::ImageExtract,
                TaskLogLevel::Debug,
                format!("line {index}"),
            );
        }

        let recent = sink.recent_lines(&task_id);
        assert_eq!(recent.len(), 3);
        assert!(recent[0].ends_with("line 2"));
        assert!(recent[2].ends_with("line 4"));
    }

    #[test]
    fn only_recent_closed_windows_are_retained() {
        let dir = tempfile::tempdir().unwrap();
        let sink = TaskLogSink::new(dir.path(), 10).retained_closed(2);
        let ids: Vec<TaskId> = ["t1", "t2", "t3"].into_iter().map(TaskId::from).collect();

        for task_id in &ids {
            sink.open(task_id).unwrap();
            sink.log(task_id, TaskType::TableExtract, TaskLogLevel::Info, "done");
        }
        for task_id in &ids {
            sink.close(task_id);
        }
        sink.close(&ids[2]);

        assert!(sink.recent_lines(&ids[0]).is_empty());
        assert!(sink.path(&ids[0]).is_none());
        assert_eq!(sink.recent_lines(&ids[1]).len(), 1);
        assert_eq!(sink.recent_lines(&ids[2]).len(), 1);
        assert!(dir.path().read_dir().unwrap().next().is_some());
    }

    #[test]
    fn unknown_task_has_no_history() {
        let dir = tempfile::tempdir().unwrap();
        let sink = TaskLogSink::new(dir.path(), 10);
        assert!(sink.path(&TaskId::from("nope")).is_none());
        assert!(sink.recent_lines(&TaskId::from("nope")).is_empty());
    }
}
