use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::document::AdapterResult;
use crate::adapters::excel_allinone::{
    EXCEL_ALLINONE_SCRIPT, ExcelAllinoneSource, excel_allinone_request,
};
use crate::adapters::process_utils::{ensure_script, run_to_success};
use crate::execution::ProcessExecutor;
use crate::models::ExcelAllinoneOptions;
use crate::orchestration::TaskCancellationToken;

pub struct ProcessExcelAllinoneSource {
    executor: Arc<dyn ProcessExecutor>,
    python: PathBuf,
    script: PathBuf,
    timeout: Duration,
}

impl ProcessExcelAllinoneSource {
    pub fn new(
        executor: Arc<dyn ProcessExecutor>,
        python: impl Into<PathBuf>,
        references_dir: &Path,
        timeout: Duration,
    ) -> Self {
        Self {
            executor,
            python: python.into(),
            script: references_dir.join(EXCEL_ALLINONE_SCRIPT),
            timeout,
        }
    }
}

impl ExcelAllinoneSource for ProcessExcelAllinoneSource {
    fn check_ready(&self) -> AdapterResult<()> {
        ensure_script(&self.script)
    }

    fn process_document(
        &self,
        document: &Path,
        options: &ExcelAllinoneOptions,
        workers: usize,
        cancel: &TaskCancellationToken,
    ) -> AdapterResult<()> {
        let request = excel_allinone_request(
            &self.python,
            &self.script,
            document,
            options,
            workers,
            self.timeout,
        );
        run_to_success(self.executor.as_ref(), request, cancel)?;
        Ok(())
    }
}
