use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::document::AdapterResult;
use crate::adapters::image_extract::{
    IMAGE_EXTRACT_SCRIPT, ImageExtractSource, image_extract_request,
};
use crate::adapters::process_utils::{ensure_script, run_to_success};
use crate::execution::ProcessExecutor;
use crate::models::ImageExtractOptions;
use crate::orchestration::TaskCancellationToken;

pub struct ProcessImageExtractSource {
    executor: Arc<dyn ProcessExecutor>,
    python: PathBuf,
    script: PathBuf,
    timeout: Duration,
}

impl ProcessImageExtractSource {
    pub fn new(
        executor: Arc<dyn ProcessExecutor>,
        python: impl Into<PathBuf>,
        references_dir: &Path,
        timeout: Duration,
    ) -> Self {
        Self {
            executor,
            python: python.into(),
            script: references_dir.join(IMAGE_EXTRACT_SCRIPT),
            timeout,
        }
    }
}

impl ImageExtractSource for ProcessImageExtractSource {
    fn check_ready(&self) -> AdapterResult<()> {
        ensure_script(&self.script)
    }

    fn extract_images(
        &self,
        document: &Path,
        output_dir: &Path,
        options: &ImageExtractOptions,
        cancel: &TaskCancellationToken,
    ) -> AdapterResult<()> {
        let request = image_extract_request(
            &self.python,
            &self.script,
            document,
            output_dir,
            options,
            self.timeout,
        );
        run_to_success(self.executor.as_ref(), request, cancel)?;
        Ok(())
    }
}
