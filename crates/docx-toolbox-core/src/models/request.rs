use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::{TaskError, TaskId, TaskType};

fn default_workers() -> usize {
    1
}

fn deserialize_workers<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let workers = usize::deserialize(deserializer)?;
    Ok(workers.max(1))
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RuntimeOptions {
    #[serde(
        default = "default_workers",
        deserialize_with = "deserialize_workers"
    )]
    pub workers: usize,
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            dry_run: false,
        }
    }
}

impl RuntimeOptions {
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Request envelope as exchanged with front-ends. Options stay untyped here
/// and are checked once by [`TaskRequest::parse`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    #[serde(default = "TaskId::generate")]
    pub task_id: TaskId,
    pub task_type: String,
    pub input_path: String,
    #[serde(default)]
    pub output_dir: Option<String>,
    #[serde(default)]
    pub options: Map<String, Value>,
    #[serde(default)]
    pub runtime: RuntimeOptions,
}

impl TaskRequest {
    pub fn new(task_type: impl Into<String>, input_path: impl Into<String>) -> Self {
        Self {
            task_id: TaskId::generate(),
            task_type: task_type.into(),
            input_path: input_path.into(),
            output_dir: None,
            options: Map::new(),
            runtime: RuntimeOptions::default(),
        }
    }

    pub fn task_id(mut self, task_id: impl Into<TaskId>) -> Self {
        self.task_id = task_id.into();
        self
    }

    pub fn output_dir(mut self, output_dir: impl Into<String>) -> Self {
        self.output_dir = Some(output_dir.into());
        self
    }

    pub fn option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn runtime(mut self, runtime: RuntimeOptions) -> Self {
        self.runtime = runtime;
        self
    }

    /// Checks the envelope and turns the option map into the typed variant for
    /// its task type.
    pub fn parse(&self) -> Result<AdapterRequest, TaskError> {
        let task_type: TaskType = self.task_type.parse()?;

        if self.task_id.as_str().trim().is_empty() {
            return Err(TaskError::invalid_input("task_id must not be empty"));
        }
        if self.input_path.trim().is_empty() {
            return Err(TaskError::invalid_input("input_path must not be empty"));
        }

        let output_dir = match self.output_dir.as_deref().map(str::trim) {
            Some("") | None => None,
            Some(dir) => Some(PathBuf::from(dir)),
        };

        Ok(AdapterRequest {
            task_id: self.task_id.clone(),
            input_path: PathBuf::from(&self.input_path),
            output_dir,
            options: TaskOptions::parse(task_type, &self.options)?,
            runtime: RuntimeOptions {
                workers: self.runtime.workers.max(1),
                dry_run: self.runtime.dry_run,
            },
        })
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExcelAllinoneOptions {
    pub word_table: bool,
    pub extract_excel: bool,
    pub image: bool,
    pub keep_attachment: bool,
    pub remove_watermark: bool,
    pub a3: bool,
}

impl ExcelAllinoneOptions {
    /// Word-table conversion is the mode used when nothing else is selected.
    fn normalized(mut self) -> Self {
        if !(self.word_table
            || self.extract_excel
            || self.image
            || self.remove_watermark
            || self.a3)
        {
            self.word_table = true;
        }
        self
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImageExtractOptions {
    pub remove_images: bool,
    pub optimize_images: bool,
    pub jpeg_quality: u8,
}

impl Default for ImageExtractOptions {
    fn default() -> Self {
        Self {
            remove_images: false,
            optimize_images: true,
            jpeg_quality: 85,
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TableExtractOptions {
    pub include_marked: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TaskOptions {
    ExcelAllinone(ExcelAllinoneOptions),
    ImageExtract(ImageExtractOptions),
    TableExtract(TableExtractOptions),
}

impl TaskOptions {
    pub fn task_type(&self) -> TaskType {
        match self {
            Self::ExcelAllinone(_) => TaskType::ExcelAllinone,
            Self::ImageExtract(_) => TaskType::ImageExtract,
            Self::TableExtract(_) => TaskType::TableExtract,
        }
    }

    pub fn parse(task_type: TaskType, options: &Map<String, Value>) -> Result<Self, TaskError> {
        let value = Value::Object(options.clone());
        let parsed = match task_type {
            TaskType::ExcelAllinone => {
                serde_json::from_value::<ExcelAllinoneOptions>(value)
                    .map(|options| Self::ExcelAllinone(options.normalized()))
            }
            TaskType::ImageExtract => {
                serde_json::from_value(value).map(Self::ImageExtract)
            }
            TaskType::TableExtract => {
                serde_json::from_value(value).map(Self::TableExtract)
            }
        };

        let parsed = parsed.map_err(|error| {
            TaskError::invalid_input(format!("invalid options for {task_type}"))
                .with_detail(error.to_string())
        })?;

        if let Self::ImageExtract(image) = &parsed
            && !(1..=100).contains(&image.jpeg_quality)
        {
            return Err(TaskError::invalid_input(format!(
                "jpeg_quality must be between 1 and 100, got {}",
                image.jpeg_quality
            )));
        }

        Ok(parsed)
    }
}

/// A request whose envelope and options have been validated; this is what
/// adapters receive.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AdapterRequest {
    pub task_id: TaskId,
    pub input_path: PathBuf,
    pub output_dir: Option<PathBuf>,
    pub options: TaskOptions,
    pub runtime: RuntimeOptions,
}

impl AdapterRequest {
    pub fn task_type(&self) -> TaskType {
        self.options.task_type()
    }
}
