use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::adapters::document::{
    AdapterResult, DocumentAdapter, ItemOutcome, ensure_task_type, process_documents,
};
use crate::adapters::fs_utils::{candidate_documents, check_output_dir, file_stem, resolve_input};
use crate::execution::{CommandSpec, ProcessSpawnRequest};
use crate::models::{
    AdapterRequest, ExcelAllinoneOptions, TaskError, TaskOptions, TaskSummary, TaskType,
};
use crate::orchestration::TaskCancellationToken;

pub const EXCEL_ALLINONE_SCRIPT: &str = "docx-allinone.py";

/// Stems carrying one of these were produced by an earlier run.
const OUTPUT_FILE_TAGS: &[&str] = &["-WithAttachments", "-NoWM", "-A3", "-AIO"];

pub trait ExcelAllinoneSource: Send + Sync {
    /// Fails the whole request before any document is touched, for example
    /// when the conversion script is missing.
    fn check_ready(&self) -> AdapterResult<()> {
        Ok(())
    }

    /// Rewrites `document` in place of its embedded workbooks. The result is
    /// written next to the input, named by [`predict_output_path`]. `workers`
    /// is the request's pool size, handed on to the converter.
    fn process_document(
        &self,
        document: &Path,
        options: &ExcelAllinoneOptions,
        workers: usize,
        cancel: &TaskCancellationToken,
    ) -> AdapterResult<()>;
}

pub struct ExcelAllinoneAdapter<S: ExcelAllinoneSource> {
    source: S,
}

impl<S: ExcelAllinoneSource> ExcelAllinoneAdapter<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }
}

impl<S: ExcelAllinoneSource> DocumentAdapter for ExcelAllinoneAdapter<S> {
    fn task_type(&self) -> TaskType {
        TaskType::ExcelAllinone
    }

    fn validate(&self, request: &AdapterRequest) -> AdapterResult<()> {
        ensure_task_type(self, request)?;
        options(request)?;
        resolve_input(&request.input_path)?;
        // Outputs land beside the inputs; an explicit output_dir is only checked.
        if let Some(output_dir) = &request.output_dir {
            check_output_dir(output_dir)?;
        }
        Ok(())
    }

    fn execute(
        &self,
        request: &AdapterRequest,
        cancel: &TaskCancellationToken,
    ) -> AdapterResult<TaskSummary> {
        let options = options(request)?;
        let target = resolve_input(&request.input_path)?;
        check_output_dir(&target.default_output_dir())?;
        if !request.runtime.dry_run {
            self.source.check_ready()?;
        }

        let documents = candidate_documents(&target, is_generated_output)?;
        if documents.is_empty() {
            tracing::info!(input = %request.input_path.display(), "no .docx documents to convert");
            return Ok(TaskSummary::default());
        }

        process_documents(
            TaskType::ExcelAllinone,
            &documents,
            request.runtime.dry_run,
            cancel,
            |document| {
                self.source
                    .process_document(document, options, request.runtime.workers, cancel)?;

                let output = predict_output_path(document, options);
                if output.is_file() {
                    Ok(ItemOutcome::Processed(vec![output.display().to_string()]))
                } else {
                    tracing::warn!(output = %output.display(), "converter produced no output");
                    Ok(ItemOutcome::Skipped)
                }
            },
        )
    }
}

fn options(request: &AdapterRequest) -> AdapterResult<&ExcelAllinoneOptions> {
    match &request.options {
        TaskOptions::ExcelAllinone(options) => Ok(options),
        other => Err(TaskError::invalid_input(format!(
            "excel_allinone received {} options",
            other.task_type()
        ))),
    }
}

fn is_generated_output(stem: &str) -> bool {
    OUTPUT_FILE_TAGS.iter().any(|tag| stem.contains(tag))
}

/// `report.docx` becomes `report-AIO.docx`, or `report-A3-NoWM.docx` style
/// names when any tagging option is on.
pub fn predict_output_path(document: &Path, options: &ExcelAllinoneOptions) -> PathBuf {
    let mut tags = Vec::new();
    if options.keep_attachment {
        tags.push("WithAttachments");
    }
    if options.remove_watermark {
        tags.push("NoWM");
    }
    if options.a3 {
        tags.push("A3");
    }

    let suffix = if tags.is_empty() {
        "-AIO".to_string()
    } else {
        format!("-{}", tags.join("-"))
    };

    let extension = document
        .extension()
        .map(|extension| format!(".{}", extension.to_string_lossy()))
        .unwrap_or_default();
    document.with_file_name(format!("{}{suffix}{extension}", file_stem(document)))
}

pub fn excel_allinone_request(
    python: &Path,
    script: &Path,
    document: &Path,
    options: &ExcelAllinoneOptions,
    workers: usize,
    timeout: Duration,
) -> ProcessSpawnRequest {
    let mut command = CommandSpec::new(python)
        .arg(script.display().to_string())
        .arg(document.display().to_string())
        .env("PYTHONIOENCODING", "utf-8");

    let flags = [
        (options.word_table, "--word-table"),
        (options.extract_excel, "--extract-excel"),
        (options.image, "--image"),
        (options.keep_attachment, "--keep-attachment"),
        (options.remove_watermark, "--remove-watermark"),
        (options.a3, "--a3"),
    ];
    command = command.args(
        flags
            .into_iter()
            .filter(|(enabled, _)| *enabled)
            .map(|(_, flag)| flag),
    );
    if workers > 1 {
        command = command.arg("--workers").arg(workers.to_string());
    }

    if let Some(parent) = document.parent()
        && !parent.as_os_str().is_empty()
    {
        command = command.working_dir(parent);
    }

    ProcessSpawnRequest::new(TaskType::ExcelAllinone, command).timeout(timeout)
}
