use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use docx_toolbox_core::logging::init_tracing;
use docx_toolbox_core::models::{RuntimeOptions, TaskRequest, TaskStatus};
use docx_toolbox_core::{CoreConfig, Dispatcher, TaskService};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "docx-toolbox")]
#[command(about = "Run docx-toolbox document tasks", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true, env = "DOCX_TOOLBOX_CONFIG")]
    config: Option<PathBuf>,

    /// Root directory for per-task log files
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Directory holding the transformation scripts
    #[arg(long, global = true)]
    references_dir: Option<PathBuf>,

    /// Python interpreter used to run the scripts
    #[arg(long, global = true)]
    python: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single task and print its response
    Run {
        /// excel_allinone, image_extract or table_extract
        #[arg(short, long)]
        task_type: String,

        /// A .docx file or a directory of them
        #[arg(short, long)]
        input: String,

        #[arg(short, long)]
        output_dir: Option<String>,

        #[arg(long)]
        task_id: Option<String>,

        /// Worker pool size requested for this task
        #[arg(short, long, default_value_t = 1)]
        workers: usize,

        /// Enumerate documents without transforming them
        #[arg(long)]
        dry_run: bool,

        /// Task option as key=value; the value is read as JSON when it parses
        #[arg(long = "option", value_parser = parse_option)]
        options: Vec<(String, Value)>,
    },

    /// Run a JSON array of task requests and print the final records
    Batch {
        file: PathBuf,

        /// Minimum pool size; a request's own `runtime.workers` can widen it
        #[arg(short, long)]
        workers: Option<usize>,

        /// Retry budget for failed transformation processes
        #[arg(long)]
        retries: Option<u32>,
    },

    /// Print the effective configuration, optionally saving it
    Config {
        #[arg(long)]
        save: Option<PathBuf>,
    },
}

fn parse_option(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("option key is empty in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

impl Cli {
    fn core_config(&self) -> CoreConfig {
        let mut config = match &self.config {
            Some(path) => CoreConfig::load(path),
            None => CoreConfig::default(),
        };
        if let Some(log_dir) = &self.log_dir {
            config.log_dir = log_dir.clone();
        }
        if let Some(references_dir) = &self.references_dir {
            config.references_dir = references_dir.clone();
        }
        if let Some(python) = &self.python {
            config.python = python.clone();
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    init_tracing();

    let cli = Cli::parse();
    let mut config = cli.core_config();

    match cli.command {
        Commands::Run {
            task_type,
            input,
            output_dir,
            task_id,
            workers,
            dry_run,
            options,
        } => {
            let mut request = TaskRequest::new(task_type, input).runtime(
                RuntimeOptions::default()
                    .workers(workers)
                    .dry_run(dry_run),
            );
            if let Some(task_id) = task_id {
                request = request.task_id(task_id);
            }
            if let Some(output_dir) = output_dir.or_else(|| config.output_dir.clone()) {
                request = request.output_dir(output_dir);
            }
            for (key, value) in options {
                request = request.option(key, value);
            }

            let dispatcher = Dispatcher::from_config(&config);
            let response = tokio::task::spawn_blocking(move || dispatcher.run_task(&request))
                .await
                .context("task worker aborted")?;

            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(exit_code(response.ok()))
        }

        Commands::Batch {
            file,
            workers,
            retries,
        } => {
            if let Some(workers) = workers {
                config.workers = workers.max(1);
            }
            if let Some(retries) = retries {
                config.max_retries = retries;
            }

            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let requests: Vec<TaskRequest> = serde_json::from_str(&content)
                .with_context(|| format!("{} is not a JSON array of requests", file.display()))?;
            if requests.is_empty() {
                bail!("{} contains no requests", file.display());
            }

            let service = TaskService::from_config(&config)?;
            let total = requests.len();
            let mut task_ids = Vec::with_capacity(total);
            for request in requests {
                match service.start_task(request) {
                    Ok(record) => task_ids.push(record.task_id),
                    Err(error) => eprintln!("rejected: {error}"),
                }
            }

            let mut records = Vec::with_capacity(task_ids.len());
            for (index, task_id) in task_ids.iter().enumerate() {
                let record = service.wait_for_terminal(task_id, None).await?;
                eprintln!(
                    "[{}/{}] {} {:?}",
                    index + 1,
                    task_ids.len(),
                    record.task_id,
                    record.status
                );
                records.push(record);
            }

            println!("{}", serde_json::to_string_pretty(&records)?);
            let all_succeeded = records.len() == total
                && records
                    .iter()
                    .all(|record| record.status == TaskStatus::Success);
            Ok(exit_code(all_succeeded))
        }

        Commands::Config { save } => {
            if let Some(path) = save {
                config.save(&path)?;
                eprintln!("configuration saved to {}", path.display());
            }
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
