use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use docx_toolbox_core::logging::init_tracing;
use docx_toolbox_core::models::{ApiEnvelope, TaskError, TaskId, TaskRequest};
use docx_toolbox_core::{CoreConfig, Dispatcher, TaskService};
use lazy_static::lazy_static;
use serde::Serialize;

struct ToolboxState {
    dispatcher: Dispatcher,
    service: TaskService,
    _tokio_rt: tokio::runtime::Runtime,
}

lazy_static! {
    static ref STATE: Mutex<Option<ToolboxState>> = Mutex::new(None);
}

#[derive(Serialize)]
struct TaskLogView {
    task_id: TaskId,
    log_path: Option<String>,
    lines: Vec<String>,
}

/// Envelope returned when the response itself cannot be encoded.
const ENCODE_FAILURE: &str =
    r#"{"ok":false,"error":{"code":"E_INTERNAL","message":"failed to encode response","detail":""}}"#;

/// Initialize the core with the JSON configuration at `config_path`, or with
/// defaults when it is null. Calling it again after a successful init is a
/// no-op that returns `true`.
///
/// # Safety
///
/// `config_path` must be null or a valid pointer to a NUL-terminated UTF-8 C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn docx_toolbox_init(config_path: *const c_char) -> bool {
    let config = if config_path.is_null() {
        CoreConfig::default()
    } else {
        match unsafe { read_str(config_path) } {
            Some(path) => CoreConfig::load(Path::new(&path)),
            None => return false,
        }
    };

    let Ok(mut guard) = STATE.lock() else {
        return false;
    };
    if guard.is_some() {
        return true;
    }

    init_tracing();

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("docx-toolbox")
        .build()
    {
        Ok(rt) => rt,
        Err(error) => {
            tracing::error!(error = %error, "failed to create tokio runtime");
            return false;
        }
    };

    let dispatcher = Dispatcher::from_config(&config);
    let service = TaskService::new(&config, dispatcher.clone(), rt.handle().clone());
    tracing::info!(
        workers = config.workers,
        log_dir = %config.log_dir.display(),
        "docx-toolbox core initialized"
    );

    *guard = Some(ToolboxState {
        dispatcher,
        service,
        _tokio_rt: rt,
    });
    true
}

/// Run one request synchronously on the calling thread and return its
/// `TaskResponse` inside the envelope. Works without `docx_toolbox_init`,
/// using default settings.
///
/// # Safety
///
/// `request_json` must be null or a valid pointer to a NUL-terminated UTF-8 C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn docx_toolbox_run_task(request_json: *const c_char) -> *mut c_char {
    let Some(json) = (unsafe { read_str(request_json) }) else {
        return std::ptr::null_mut();
    };

    let result = parse_request(&json).map(|request| {
        let dispatcher = lock_state()
            .ok()
            .and_then(|guard| guard.as_ref().map(|state| state.dispatcher.clone()));
        match dispatcher {
            Some(dispatcher) => dispatcher.run_task(&request),
            None => docx_toolbox_core::run_task(&request),
        }
    });
    envelope_json(result)
}

/// Queue a request on the task service and return its pending record.
///
/// # Safety
///
/// `request_json` must be null or a valid pointer to a NUL-terminated UTF-8 C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn docx_toolbox_start_task(request_json: *const c_char) -> *mut c_char {
    let Some(json) = (unsafe { read_str(request_json) }) else {
        return std::ptr::null_mut();
    };

    envelope_json(with_service(|service| {
        let request = parse_request(&json)?;
        service.start_task(request)
    }))
}

#[unsafe(no_mangle)]
pub extern "C" fn docx_toolbox_list_tasks() -> *mut c_char {
    envelope_json(with_service(TaskService::list_tasks))
}

/// # Safety
///
/// `task_id` must be null or a valid pointer to a NUL-terminated UTF-8 C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn docx_toolbox_get_task_status(task_id: *const c_char) -> *mut c_char {
    let Some(task_id) = (unsafe { read_str(task_id) }) else {
        return std::ptr::null_mut();
    };
    let task_id = TaskId::from(task_id);
    envelope_json(with_service(|service| service.get_task_status(&task_id)))
}

/// Cancel a pending or running task. Cancelling a finished task returns its
/// current status unchanged.
///
/// # Safety
///
/// `task_id` must be null or a valid pointer to a NUL-terminated UTF-8 C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn docx_toolbox_cancel_task(task_id: *const c_char) -> *mut c_char {
    let Some(task_id) = (unsafe { read_str(task_id) }) else {
        return std::ptr::null_mut();
    };
    let task_id = TaskId::from(task_id);
    envelope_json(with_service(|service| service.cancel_task(&task_id)))
}

/// Log file path and the most recent in-memory log lines of a task.
///
/// # Safety
///
/// `task_id` must be null or a valid pointer to a NUL-terminated UTF-8 C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn docx_toolbox_task_log(task_id: *const c_char) -> *mut c_char {
    let Some(task_id) = (unsafe { read_str(task_id) }) else {
        return std::ptr::null_mut();
    };
    let task_id = TaskId::from(task_id);

    envelope_json(with_service(|service| {
        let record = service.get_task_status(&task_id)?;
        Ok(TaskLogView {
            log_path: record.log_path,
            lines: service.recent_log_lines(&task_id),
            task_id,
        })
    }))
}

/// Free a string previously returned by a `docx_toolbox_*` function.
///
/// # Safety
///
/// `s` must be a pointer previously returned by a `docx_toolbox_*` function, or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn docx_toolbox_free_string(s: *mut c_char) {
    if s.is_null() {
        return;
    }
    unsafe {
        let _ = CString::from_raw(s);
    }
}

unsafe fn read_str(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    let c_str = unsafe { CStr::from_ptr(ptr) };
    c_str.to_str().ok().map(str::to_owned)
}

fn parse_request(json: &str) -> Result<TaskRequest, TaskError> {
    serde_json::from_str(json).map_err(|error| {
        TaskError::invalid_input("request is not valid JSON").with_detail(error.to_string())
    })
}

fn lock_state() -> Result<MutexGuard<'static, Option<ToolboxState>>, TaskError> {
    STATE
        .lock()
        .map_err(|_| TaskError::internal("ffi state lock poisoned"))
}

fn with_service<T>(
    call: impl FnOnce(&TaskService) -> Result<T, TaskError>,
) -> Result<T, TaskError> {
    let guard = lock_state()?;
    let state = guard
        .as_ref()
        .ok_or_else(|| TaskError::internal("docx_toolbox_init has not been called"))?;
    call(&state.service)
}

fn envelope_json<T: Serialize>(result: Result<T, TaskError>) -> *mut c_char {
    let json = serde_json::to_string(&ApiEnvelope::from(result)).unwrap_or_else(|error| {
        tracing::error!(error = %error, "failed to encode ffi response");
        ENCODE_FAILURE.to_string()
    });

    match CString::new(json) {
        Ok(c) => c.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}
