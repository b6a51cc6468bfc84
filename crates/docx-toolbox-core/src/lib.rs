pub mod adapters;
pub mod config;
pub mod dispatch;
pub mod execution;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod registry;
pub mod service;

pub use config::CoreConfig;
pub use dispatch::{Dispatcher, run_task};
pub use service::TaskService;
