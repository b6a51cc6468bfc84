use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::document::AdapterResult;
use crate::adapters::process_utils::{ensure_script, ensure_success, run_process};
use crate::adapters::table_extract::{
    TABLE_EXTRACT_SCRIPT, TableExtractSource, TableExtraction, table_extract_request,
};
use crate::execution::{ProcessExecutor, ProcessExitStatus};
use crate::models::TaskType;
use crate::orchestration::TaskCancellationToken;

/// Printed by the extraction script before it exits 1 on a table-less document.
const NO_TABLES_MARKER: &str = "没有找到表格";

pub struct ProcessTableExtractSource {
    executor: Arc<dyn ProcessExecutor>,
    python: PathBuf,
    script: PathBuf,
    timeout: Duration,
}

impl ProcessTableExtractSource {
    pub fn new(
        executor: Arc<dyn ProcessExecutor>,
        python: impl Into<PathBuf>,
        references_dir: &Path,
        timeout: Duration,
    ) -> Self {
        Self {
            executor,
            python: python.into(),
            script: references_dir.join(TABLE_EXTRACT_SCRIPT),
            timeout,
        }
    }
}

impl TableExtractSource for ProcessTableExtractSource {
    fn check_ready(&self) -> AdapterResult<()> {
        ensure_script(&self.script)
    }

    fn extract_tables(
        &self,
        document: &Path,
        cancel: &TaskCancellationToken,
    ) -> AdapterResult<TableExtraction> {
        let request = table_extract_request(&self.python, &self.script, document, self.timeout);
        let output = run_process(self.executor.as_ref(), request, cancel)?;

        if output.status == ProcessExitStatus::ExitCode(1)
            && String::from_utf8_lossy(&output.stdout).contains(NO_TABLES_MARKER)
        {
            return Ok(TableExtraction::NoTables);
        }

        ensure_success(TaskType::TableExtract, &output)?;
        Ok(TableExtraction::Extracted)
    }
}
