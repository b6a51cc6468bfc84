use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::TaskError;
use crate::orchestration::{RetryPolicy, RunnerConfig};

/// Settings shared by every front-end. Every field has a default, so a partial
/// or empty JSON object is a valid configuration file.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub output_dir: Option<String>,
    pub workers: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub log_dir: PathBuf,
    pub log_window_lines: usize,
    pub python: PathBuf,
    pub references_dir: PathBuf,
    pub process_timeout_secs: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            workers: 1,
            max_retries: 1,
            retry_backoff_ms: 250,
            log_dir: PathBuf::from("logs"),
            log_window_lines: 500,
            python: PathBuf::from("python3"),
            references_dir: PathBuf::from("references"),
            process_timeout_secs: 30 * 60,
        }
    }
}

impl CoreConfig {
    /// Reads `path`, falling back to defaults when it is missing. A file that
    /// cannot be read or parsed is logged and replaced by defaults as well.
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(Some(config)) => config,
            Ok(None) => Self::default(),
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %error,
                    "ignoring unreadable config, using defaults"
                );
                Self::default()
            }
        }
    }

    pub fn try_load(path: &Path) -> Result<Option<Self>, TaskError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => {
                return Err(TaskError::from(error).with_detail(path.display().to_string()));
            }
        };

        let config: Self = serde_json::from_str(&content).map_err(|error| {
            TaskError::invalid_input("config is not valid JSON").with_detail(error.to_string())
        })?;
        Ok(Some(config.normalized()))
    }

    pub fn save(&self, path: &Path) -> Result<(), TaskError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|error| {
                TaskError::from(error).with_detail(parent.display().to_string())
            })?;
        }

        let content = serde_json::to_string_pretty(self).map_err(|error| {
            TaskError::internal("failed to encode config").with_detail(error.to_string())
        })?;
        std::fs::write(path, content)
            .map_err(|error| TaskError::from(error).with_detail(path.display().to_string()))
    }

    pub fn normalized(mut self) -> Self {
        self.workers = self.workers.max(1);
        self.log_window_lines = self.log_window_lines.max(1);
        if self.process_timeout_secs == 0 {
            self.process_timeout_secs = Self::default().process_timeout_secs;
        }
        if self
            .output_dir
            .as_deref()
            .is_some_and(|dir| dir.trim().is_empty())
        {
            self.output_dir = None;
        }
        self
    }

    pub fn process_timeout(&self) -> Duration {
        Duration::from_secs(self.process_timeout_secs.max(1))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_backoff_ms))
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig::new(self.workers, self.retry_policy())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::CoreConfig;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CoreConfig::load(&dir.path().join("config.json"));
        assert_eq!(config, CoreConfig::default());
        assert_eq!(config.log_window_lines, 500);
        assert_eq!(config.process_timeout(), Duration::from_secs(1800));
    }

    #[test]
    fn corrupt_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(CoreConfig::try_load(&path).is_err());
        assert_eq!(CoreConfig::load(&path), CoreConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"workers": 0, "max_retries": 3, "output_dir": " "}"#).unwrap();

        let config = CoreConfig::load(&path);
        assert_eq!(config.workers, 1);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.output_dir, None);
        assert_eq!(config.retry_backoff_ms, 250);
    }

    #[test]
    fn save_then_load_preserves_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.json");
        let config = CoreConfig {
            workers: 4,
            output_dir: Some("/srv/out".to_string()),
            ..CoreConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(CoreConfig::load(&path), config);
    }
}
