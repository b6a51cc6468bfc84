use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::adapters::document::{
    AdapterResult, DocumentAdapter, ItemOutcome, ensure_task_type, process_documents,
};
use crate::adapters::fs_utils::{
    InputTarget, candidate_documents, check_output_dir, ensure_output_dir, file_stem,
    resolve_input,
};
use crate::execution::{CommandSpec, ProcessSpawnRequest};
use crate::models::{
    AdapterRequest, ImageExtractOptions, TaskError, TaskOptions, TaskSummary, TaskType,
};
use crate::orchestration::TaskCancellationToken;

pub const IMAGE_EXTRACT_SCRIPT: &str = "DOCX图片分离.py";
pub const IMAGE_MARK_SUFFIX: &str = "_已标记图片";
pub const IMAGE_PDF_SUFFIX: &str = "_附图";

pub trait ImageExtractSource: Send + Sync {
    /// Fails the whole request before any document is touched.
    fn check_ready(&self) -> AdapterResult<()> {
        Ok(())
    }

    /// Moves the images of `document` into a PDF and writes a marked copy of
    /// the document, both into `output_dir`.
    fn extract_images(
        &self,
        document: &Path,
        output_dir: &Path,
        options: &ImageExtractOptions,
        cancel: &TaskCancellationToken,
    ) -> AdapterResult<()>;
}

pub struct ImageExtractAdapter<S: ImageExtractSource> {
    source: S,
}

impl<S: ImageExtractSource> ImageExtractAdapter<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }
}

impl<S: ImageExtractSource> DocumentAdapter for ImageExtractAdapter<S> {
    fn task_type(&self) -> TaskType {
        TaskType::ImageExtract
    }

    fn validate(&self, request: &AdapterRequest) -> AdapterResult<()> {
        ensure_task_type(self, request)?;
        options(request)?;
        let target = resolve_input(&request.input_path)?;
        check_output_dir(&output_dir(request, &target))
    }

    fn execute(
        &self,
        request: &AdapterRequest,
        cancel: &TaskCancellationToken,
    ) -> AdapterResult<TaskSummary> {
        let options = options(request)?;
        let target = resolve_input(&request.input_path)?;

        let documents = candidate_documents(&target, |_| false)?;
        if documents.is_empty() {
            return Err(TaskError::invalid_input("no .docx documents found in directory")
                .with_detail(request.input_path.display().to_string()));
        }

        let output_dir = output_dir(request, &target);
        check_output_dir(&output_dir)?;
        if !request.runtime.dry_run {
            self.source.check_ready()?;
            ensure_output_dir(&output_dir)?;
        }

        let summary = process_documents(
            TaskType::ImageExtract,
            &documents,
            request.runtime.dry_run,
            cancel,
            |document| {
                let stem = file_stem(document);
                if stem.contains(IMAGE_MARK_SUFFIX) {
                    tracing::info!(document = %document.display(), "already marked, skipping");
                    return Ok(ItemOutcome::Skipped);
                }

                self.source
                    .extract_images(document, &output_dir, options, cancel)?;

                let outputs = expected_outputs(&output_dir, &stem)
                    .into_iter()
                    .filter(|path| path.exists())
                    .map(|path| path.display().to_string())
                    .collect();
                Ok(ItemOutcome::Processed(outputs))
            },
        )?;

        if summary.processed == 0 && summary.failed > 0 {
            return Err(TaskError::process_failed(format!(
                "all {} documents failed",
                summary.failed
            ))
            .with_detail(format!("input={}", request.input_path.display()))
            .with_partial(summary));
        }

        Ok(summary)
    }
}

fn options(request: &AdapterRequest) -> AdapterResult<&ImageExtractOptions> {
    match &request.options {
        TaskOptions::ImageExtract(options) => Ok(options),
        other => Err(TaskError::invalid_input(format!(
            "image_extract received {} options",
            other.task_type()
        ))),
    }
}

fn output_dir(request: &AdapterRequest, target: &InputTarget) -> PathBuf {
    request
        .output_dir
        .clone()
        .unwrap_or_else(|| target.default_output_dir())
}

pub fn expected_outputs(output_dir: &Path, stem: &str) -> [PathBuf; 2] {
    [
        output_dir.join(format!("{stem}{IMAGE_MARK_SUFFIX}.docx")),
        output_dir.join(format!("{stem}{IMAGE_PDF_SUFFIX}.pdf")),
    ]
}

pub fn image_extract_request(
    python: &Path,
    script: &Path,
    document: &Path,
    output_dir: &Path,
    options: &ImageExtractOptions,
    timeout: Duration,
) -> ProcessSpawnRequest {
    let mut command = CommandSpec::new(python)
        .arg(script.display().to_string())
        .arg(document.display().to_string())
        .args(["--output-dir".to_string(), output_dir.display().to_string()])
        .env("PYTHONIOENCODING", "utf-8");

    if options.remove_images {
        command = command.arg("--remove-images");
    }
    if !options.optimize_images {
        command = command.arg("--no-optimize");
    }
    command = command.args(["--jpeg-quality".to_string(), options.jpeg_quality.to_string()]);

    ProcessSpawnRequest::new(TaskType::ImageExtract, command).timeout(timeout)
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use super::{expected_outputs, image_extract_request};
    use crate::models::ImageExtractOptions;

    #[test]
    fn outputs_are_named_after_the_stem() {
        let [marked, pdf] = expected_outputs(Path::new("/out"), "report");
        assert_eq!(marked, PathBuf::from("/out/report_已标记图片.docx"));
        assert_eq!(pdf, PathBuf::from("/out/report_附图.pdf"));
    }

    #[test]
    fn request_maps_options_to_flags() {
        let options = ImageExtractOptions {
            remove_images: true,
            optimize_images: false,
            jpeg_quality: 70,
        };
        let request = image_extract_request(
            Path::new("python3"),
            Path::new("/refs/DOCX图片分离.py"),
            Path::new("/docs/a.docx"),
            Path::new("/out"),
            &options,
            Duration::from_secs(5),
        );
        assert_eq!(
            request.command.args,
            vec![
                "/refs/DOCX图片分离.py",
                "/docs/a.docx",
                "--output-dir",
                "/out",
                "--remove-images",
                "--no-optimize",
                "--jpeg-quality",
                "70",
            ]
        );
    }
}
