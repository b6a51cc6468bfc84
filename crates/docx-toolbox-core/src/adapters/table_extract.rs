use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::adapters::document::{
    AdapterResult, DocumentAdapter, ItemOutcome, ensure_task_type, process_documents,
};
use crate::adapters::fs_utils::{candidate_documents, check_output_dir, file_stem, resolve_input};
use crate::execution::{CommandSpec, ProcessSpawnRequest};
use crate::models::{
    AdapterRequest, TableExtractOptions, TaskError, TaskOptions, TaskSummary, TaskType,
};
use crate::orchestration::TaskCancellationToken;

pub const TABLE_EXTRACT_SCRIPT: &str = "DOCX表格提取.py";
pub const TABLE_MARK_SUFFIX: &str = "_已标记表格";
pub const TABLE_EXPORT_SUFFIX: &str = "_表格提取";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TableExtraction {
    Extracted,
    NoTables,
}

pub trait TableExtractSource: Send + Sync {
    /// Fails the whole request before any document is touched.
    fn check_ready(&self) -> AdapterResult<()> {
        Ok(())
    }

    /// Writes the marked document and the table exports beside `document`.
    fn extract_tables(
        &self,
        document: &Path,
        cancel: &TaskCancellationToken,
    ) -> AdapterResult<TableExtraction>;
}

pub struct TableExtractAdapter<S: TableExtractSource> {
    source: S,
}

impl<S: TableExtractSource> TableExtractAdapter<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }
}

impl<S: TableExtractSource> DocumentAdapter for TableExtractAdapter<S> {
    fn task_type(&self) -> TaskType {
        TaskType::TableExtract
    }

    fn validate(&self, request: &AdapterRequest) -> AdapterResult<()> {
        ensure_task_type(self, request)?;
        options(request)?;
        let target = resolve_input(&request.input_path)?;
        match &request.output_dir {
            Some(output_dir) => check_output_dir(output_dir),
            None => check_output_dir(&target.default_output_dir()),
        }
    }

    fn execute(
        &self,
        request: &AdapterRequest,
        cancel: &TaskCancellationToken,
    ) -> AdapterResult<TaskSummary> {
        let include_marked = options(request)?.include_marked;
        let target = resolve_input(&request.input_path)?;
        if !request.runtime.dry_run {
            self.source.check_ready()?;
        }

        let documents = candidate_documents(&target, |stem| {
            !include_marked && stem.contains(TABLE_MARK_SUFFIX)
        })?;
        if documents.is_empty() {
            tracing::info!(input = %request.input_path.display(), "no .docx documents with tables to extract");
            return Ok(TaskSummary::default());
        }
        tracing::debug!(count = documents.len(), "table extraction candidates");

        process_documents(
            TaskType::TableExtract,
            &documents,
            request.runtime.dry_run,
            cancel,
            |document| match self.source.extract_tables(document, cancel)? {
                TableExtraction::NoTables => {
                    tracing::info!(document = %document.display(), "no tables found, skipping");
                    Ok(ItemOutcome::Skipped)
                }
                TableExtraction::Extracted => Ok(ItemOutcome::Processed(
                    expected_outputs(document)
                        .into_iter()
                        .filter(|path| path.exists())
                        .map(|path| path.display().to_string())
                        .collect(),
                )),
            },
        )
    }
}

fn options(request: &AdapterRequest) -> AdapterResult<&TableExtractOptions> {
    match &request.options {
        TaskOptions::TableExtract(options) => Ok(options),
        other => Err(TaskError::invalid_input(format!(
            "table_extract received {} options",
            other.task_type()
        ))),
    }
}

pub fn expected_outputs(document: &Path) -> Vec<PathBuf> {
    let stem = file_stem(document);
    let parent = document.parent().unwrap_or_else(|| Path::new(""));
    let mut outputs = vec![parent.join(format!("{stem}{TABLE_MARK_SUFFIX}.docx"))];
    outputs.extend(
        ["txt", "xlsx", "pdf"]
            .into_iter()
            .map(|extension| parent.join(format!("{stem}{TABLE_EXPORT_SUFFIX}.{extension}"))),
    );
    outputs
}

pub fn table_extract_request(
    python: &Path,
    script: &Path,
    document: &Path,
    timeout: Duration,
) -> ProcessSpawnRequest {
    let command = CommandSpec::new(python)
        .arg(script.display().to_string())
        .arg(document.display().to_string())
        .env("PYTHONIOENCODING", "utf-8");

    ProcessSpawnRequest::new(TaskType::TableExtract, command).timeout(timeout)
}
