pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod routes;
pub mod services;
pub mod storage;
pub mod tasks;
pub mod test_util;

pub use config::Config;
pub use db::{RepoError, Repository};
pub use error::ApiError;
pub use jobs::{Job, JobError, JobExecutor, JobOrchestrator, JobSpec};
pub use services::{CommandPredictor, CommandRenderer, Predictor, Renderer, ServiceError};
pub use storage::Storage;
pub use tasks::{GateStats, GpuGate, RunnerError, TaskRunner};

use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub storage: Storage,
    pub repo: Arc<Repository>,
    pub jobs: JobOrchestrator,
}
