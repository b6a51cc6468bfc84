use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use docx_toolbox_core::adapters::{AdapterResult, DocumentAdapter};
use docx_toolbox_core::models::{
    AdapterRequest, ErrorCode, TaskError, TaskId, TaskRecord, TaskRequest, TaskStatus,
    TaskSummary, TaskType,
};
use docx_toolbox_core::orchestration::TaskCancellationToken;
use docx_toolbox_core::{CoreConfig, Dispatcher, TaskService};
use tokio::runtime::Handle;

const WAIT: Option<Duration> = Some(Duration::from_secs(10));

/// `block-*` inputs run until cancelled, `fail-*` inputs fail, anything else
/// succeeds with one output.
#[derive(Default)]
struct FakeAdapter {
    output_dirs: Mutex<Vec<Option<PathBuf>>>,
}

impl DocumentAdapter for FakeAdapter {
    fn task_type(&self) -> TaskType {
        TaskType::ImageExtract
    }

    fn validate(&self, _request: &AdapterRequest) -> AdapterResult<()> {
        Ok(())
    }

    fn execute(
        &self,
        request: &AdapterRequest,
        cancel: &TaskCancellationToken,
    ) -> AdapterResult<TaskSummary> {
        self.output_dirs
            .lock()
            .unwrap()
            .push(request.output_dir.clone());
        let name = request.input_path.display().to_string();

        if name.starts_with("block") {
            for _ in 0..1000 {
                cancel.checkpoint(&TaskSummary::default(), "stopped while blocked")?;
                std::thread::sleep(Duration::from_millis(10));
            }
            return Err(TaskError::internal("block was never cancelled"));
        }
        if name.starts_with("fail") {
            return Err(TaskError::unsupported_format("not a zip container"));
        }

        let mut summary = TaskSummary::default();
        summary.record_processed([format!("{name}_附图.pdf")]);
        Ok(summary)
    }
}

fn config(log_dir: &Path) -> CoreConfig {
    CoreConfig {
        log_dir: log_dir.to_path_buf(),
        max_retries: 0,
        ..CoreConfig::default()
    }
}

fn service(config: &CoreConfig, adapter: &Arc<FakeAdapter>) -> TaskService {
    let shared: Arc<dyn DocumentAdapter> = adapter.clone();
    TaskService::new(
        config,
        Dispatcher::new(vec![shared]).unwrap(),
        Handle::current(),
    )
}

fn request(id: &str, input: &str) -> TaskRequest {
    TaskRequest::new("image_extract", input).task_id(id)
}

async fn wait_running(service: &TaskService, task_id: &TaskId) -> TaskRecord {
    for _ in 0..500 {
        let record = service.get_task_status(task_id).unwrap();
        if record.status == TaskStatus::Running {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {task_id} never started");
}

/// The terminal log line is written right after the record turns terminal.
async fn wait_log_lines(service: &TaskService, task_id: &TaskId, count: usize) -> Vec<String> {
    for _ in 0..500 {
        let lines = service.recent_log_lines(task_id);
        if lines.len() >= count {
            return lines;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {task_id} never logged {count} lines");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn successful_task_is_recorded_and_logged() {
    let logs = tempfile::tempdir().unwrap();
    let adapter = Arc::new(FakeAdapter::default());
    let service = service(&config(logs.path()), &adapter);

    let record = service.start_task(request("ok-1", "report.docx")).unwrap();
    assert_eq!(record.status, TaskStatus::Pending);
    assert!(record.summary.is_none() && record.error.is_none());
    assert!(!record.created_at.is_empty());

    let done = service
        .wait_for_terminal(&record.task_id, WAIT)
        .await
        .unwrap();
    assert_eq!(done.status, TaskStatus::Success);
    assert_eq!(done.summary.as_ref().unwrap().processed, 1);
    assert!(done.error.is_none());

    wait_log_lines(&service, &record.task_id, 3).await;
    let log_path = PathBuf::from(done.log_path.unwrap());
    assert!(log_path.starts_with(logs.path()));
    assert_eq!(log_path.file_name().unwrap(), "ok-1.log");

    let content = std::fs::read_to_string(&log_path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].contains(" | INFO  | image_extract | task=ok-1 | task accepted"));
    assert!(lines[1].ends_with("| task started"));
    assert!(lines[2].ends_with("| task succeeded: processed=1 failed=0 skipped=0"));
    assert_eq!(service.recent_log_lines(&record.task_id).len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_task_keeps_error_and_no_summary() {
    let logs = tempfile::tempdir().unwrap();
    let adapter = Arc::new(FakeAdapter::default());
    let service = service(&config(logs.path()), &adapter);

    let record = service.start_task(request("bad-1", "fail.docx")).unwrap();
    let done = service
        .wait_for_terminal(&record.task_id, WAIT)
        .await
        .unwrap();

    assert_eq!(done.status, TaskStatus::Failed);
    assert!(done.summary.is_none());
    assert_eq!(done.error.unwrap().code, ErrorCode::UnsupportedFormat);
    let last = wait_log_lines(&service, &record.task_id, 3)
        .await
        .pop()
        .unwrap();
    assert!(last.contains("| ERROR | "));
    assert!(last.ends_with("task failed: E_UNSUPPORTED_FORMAT not a zip container"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn nonexistent_input_yields_failed_record() {
    let logs = tempfile::tempdir().unwrap();
    let config = config(logs.path());
    let service = TaskService::new(&config, Dispatcher::from_config(&config), Handle::current());

    let missing = logs.path().join("nowhere.docx").display().to_string();
    let record = service
        .start_task(TaskRequest::new("table_extract", missing))
        .unwrap();
    let done = service
        .wait_for_terminal(&record.task_id, WAIT)
        .await
        .unwrap();

    assert_eq!(done.status, TaskStatus::Failed);
    assert_eq!(done.error.unwrap().code, ErrorCode::InvalidInput);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unknown_task_type_creates_no_record() {
    let logs = tempfile::tempdir().unwrap();
    let service = service(&config(logs.path()), &Arc::new(FakeAdapter::default()));

    let error = service
        .start_task(TaskRequest::new("docx_to_epub", "a.docx"))
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::InvalidInput);
    assert!(service.list_tasks().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unknown_task_id_is_invalid_input() {
    let logs = tempfile::tempdir().unwrap();
    let service = service(&config(logs.path()), &Arc::new(FakeAdapter::default()));
    let unknown = TaskId::from("missing");

    assert_eq!(
        service.get_task_status(&unknown).unwrap_err().code,
        ErrorCode::InvalidInput
    );
    assert_eq!(
        service.cancel_task(&unknown).unwrap_err().code,
        ErrorCode::InvalidInput
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn running_record_is_never_torn() {
    let logs = tempfile::tempdir().unwrap();
    let service = service(&config(logs.path()), &Arc::new(FakeAdapter::default()));

    let id = service
        .start_task(request("run-1", "block.docx"))
        .unwrap()
        .task_id;
    let running = wait_running(&service, &id).await;
    assert!(running.summary.is_none());
    assert!(running.error.is_none());

    service.cancel_task(&id).unwrap();
}

fn assert_consistent(record: &TaskRecord) {
    let shape = (record.summary.is_some(), record.error.is_some());
    let expected = match record.status {
        TaskStatus::Pending | TaskStatus::Running => (false, false),
        TaskStatus::Success => (true, false),
        TaskStatus::Failed | TaskStatus::Cancelled => (false, true),
    };
    assert_eq!(shape, expected, "inconsistent record {record:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_listing_and_cancels_never_see_torn_records() {
    let logs = tempfile::tempdir().unwrap();
    let config = CoreConfig {
        workers: 4,
        ..config(logs.path())
    };
    let service = Arc::new(service(&config, &Arc::new(FakeAdapter::default())));
    let done = Arc::new(AtomicBool::new(false));

    let reader = {
        let service = service.clone();
        let done = done.clone();
        tokio::task::spawn_blocking(move || {
            let mut terminal: HashMap<TaskId, TaskStatus> = HashMap::new();
            let mut snapshots = 0usize;
            while !done.load(Ordering::SeqCst) {
                for record in service.list_tasks().unwrap() {
                    assert_consistent(&record);
                    if record.status.is_terminal() {
                        let first = *terminal
                            .entry(record.task_id.clone())
                            .or_insert(record.status);
                        assert_eq!(
                            first, record.status,
                            "{} changed after finishing",
                            record.task_id
                        );
                    }
                }
                snapshots += 1;
                std::thread::yield_now();
            }
            snapshots
        })
    };

    let ids: Vec<TaskId> = (0..30)
        .map(|index| {
            let input = match index % 3 {
                0 => format!("block-{index}.docx"),
                1 => format!("ok-{index}.docx"),
                _ => format!("fail-{index}.docx"),
            };
            service
                .start_task(request(&format!("task-{index}"), &input))
                .unwrap()
                .task_id
        })
        .collect();

    // Cancels race the runner: block tasks may be pending or running, ok tasks
    // may already be done.
    let canceller = {
        let service = service.clone();
        let ids = ids.clone();
        tokio::task::spawn_blocking(move || {
            for (index, id) in ids.iter().enumerate() {
                if index % 3 == 2 {
                    continue;
                }
                assert_consistent(&service.get_task_status(id).unwrap());
                service.cancel_task(id).unwrap();
            }
        })
    };
    canceller.await.unwrap();

    let mut finished = Vec::new();
    for id in &ids {
        finished.push(service.wait_for_terminal(id, WAIT).await.unwrap());
    }
    done.store(true, Ordering::SeqCst);
    assert!(reader.await.unwrap() > 0);

    for (index, record) in finished.iter().enumerate() {
        assert_consistent(record);
        match index % 3 {
            0 => assert_eq!(record.status, TaskStatus::Cancelled),
            1 => assert!(matches!(
                record.status,
                TaskStatus::Success | TaskStatus::Cancelled
            )),
            _ => assert_eq!(record.status, TaskStatus::Failed),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_is_idempotent_and_wins_over_late_results() {
    let logs = tempfile::tempdir().unwrap();
    let service = service(&config(logs.path()), &Arc::new(FakeAdapter::default()));

    let id = service
        .start_task(request("run-1", "block.docx"))
        .unwrap()
        .task_id;
    wait_running(&service, &id).await;

    let first = service.cancel_task(&id).unwrap();
    assert_eq!(first.status, TaskStatus::Cancelled);
    let second = service.cancel_task(&id).unwrap();
    assert_eq!(second.status, TaskStatus::Cancelled);

    for _ in 0..500 {
        if service.runner().in_flight() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(service.runner().in_flight(), 0);

    let record = service.get_task_status(&id).unwrap();
    assert_eq!(record.status, TaskStatus::Cancelled);
    assert!(record.summary.is_none());
    assert_eq!(record.error.unwrap().code, ErrorCode::Cancelled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelling_a_finished_task_keeps_its_status() {
    let logs = tempfile::tempdir().unwrap();
    let service = service(&config(logs.path()), &Arc::new(FakeAdapter::default()));

    let id = service.start_task(request("ok-1", "a.docx")).unwrap().task_id;
    service.wait_for_terminal(&id, WAIT).await.unwrap();

    let ack = service.cancel_task(&id).unwrap();
    assert_eq!(ack.status, TaskStatus::Success);
    assert!(service.get_task_status(&id).unwrap().summary.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_all_drops_queued_tasks() {
    let logs = tempfile::tempdir().unwrap();
    let service = service(&config(logs.path()), &Arc::new(FakeAdapter::default()));

    let running = service
        .start_task(request("run-1", "block.docx"))
        .unwrap()
        .task_id;
    let queued = service.start_task(request("q-1", "a.docx")).unwrap().task_id;
    wait_running(&service, &running).await;

    assert_eq!(service.cancel_all(), 1);
    let dropped = service.wait_for_terminal(&queued, WAIT).await.unwrap();
    assert_eq!(dropped.status, TaskStatus::Cancelled);

    service.cancel_task(&running).unwrap();
    service.resume();
    let later = service.start_task(request("ok-2", "b.docx")).unwrap().task_id;
    assert_eq!(
        service
            .wait_for_terminal(&later, WAIT)
            .await
            .unwrap()
            .status,
        TaskStatus::Success
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn list_returns_isolated_snapshots_most_recent_first() {
    let logs = tempfile::tempdir().unwrap();
    let service = service(&config(logs.path()), &Arc::new(FakeAdapter::default()));

    let first = service.start_task(request("t-1", "block.docx")).unwrap().task_id;
    service.start_task(request("t-2", "a.docx")).unwrap();

    let mut snapshot = service.list_tasks().unwrap();
    let ids: Vec<&str> = snapshot.iter().map(|record| record.task_id.as_str()).collect();
    assert_eq!(ids, vec!["t-2", "t-1"]);

    snapshot[1].status = TaskStatus::Success;
    assert_ne!(
        service.get_task_status(&first).unwrap().status,
        TaskStatus::Success
    );

    service.cancel_task(&first).unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn configured_output_dir_applies_when_request_has_none() {
    let logs = tempfile::tempdir().unwrap();
    let mut config = config(logs.path());
    config.output_dir = Some("/srv/exports".to_string());
    let adapter = Arc::new(FakeAdapter::default());
    let service = service(&config, &adapter);

    let defaulted = service.start_task(request("d-1", "a.docx")).unwrap();
    assert_eq!(defaulted.output_dir.as_deref(), Some("/srv/exports"));
    let explicit = service
        .start_task(request("d-2", "b.docx").output_dir("/tmp/mine"))
        .unwrap();
    assert_eq!(explicit.output_dir.as_deref(), Some("/tmp/mine"));

    service
        .wait_for_terminal(&explicit.task_id, WAIT)
        .await
        .unwrap();
    assert_eq!(
        *adapter.output_dirs.lock().unwrap(),
        vec![
            Some(PathBuf::from("/srv/exports")),
            Some(PathBuf::from("/tmp/mine")),
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn wait_for_terminal_times_out_as_internal_error() {
    let logs = tempfile::tempdir().unwrap();
    let service = service(&config(logs.path()), &Arc::new(FakeAdapter::default()));

    let id = service.start_task(request("run-1", "block.docx")).unwrap().task_id;
    let error = service
        .wait_for_terminal(&id, Some(Duration::from_millis(50)))
        .await
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::Internal);

    service.cancel_task(&id).unwrap();
}
