mod stub_services;

pub use stub_services::{StubBehavior, StubPredictor, StubRenderer};

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mlsharp_common::TaskRecord;

use crate::config::Config;
use crate::db::Repository;
use crate::jobs::{JobExecutor, JobOrchestrator};
use crate::storage::Storage;
use crate::tasks::{GpuGate, TaskRunner};
use crate::AppState;

/// Default config rooted at `data_dir` with an in-memory database.
pub fn test_config(data_dir: &Path) -> Config {
    let mut config = Config::for_data_dir(data_dir.to_string_lossy());
    config.runner.max_workers = 4;
    config.runner.max_gpu_tasks = 1;
    config.logging.level = "debug".to_string();
    config
}

/// Build application state around the given collaborators.
///
/// A gate is started when `config.runner.max_gpu_tasks` is non-zero.
pub fn create_test_state(
    config: Config,
    predictor: Arc<StubPredictor>,
    renderer: Arc<StubRenderer>,
) -> AppState {
    let storage = Storage::new(&config.storage.data_dir);
    let repo = Arc::new(Repository::new(&config.storage.database_url).expect("open test database"));

    let mut runner = TaskRunner::new(config.runner.max_workers).expect("start test runner");
    if config.runner.max_gpu_tasks > 0 {
        let gate = GpuGate::start(config.runner.max_gpu_tasks).expect("start test gate");
        runner = runner.with_gpu_gate(gate);
    }

    let executor = JobExecutor::new(Arc::clone(&repo), predictor, renderer);
    let jobs = JobOrchestrator::new(Arc::clone(&repo), runner, executor);

    AppState {
        config,
        storage,
        repo,
        jobs,
    }
}

/// Poll until the task reaches `completed` or `failed`. Panics after 10s.
pub fn wait_for_terminal(repo: &Repository, task_id: &str) -> TaskRecord {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let task = repo.get_task(task_id).expect("task exists");
        if task.status.is_terminal() {
            return task;
        }
        assert!(
            Instant::now() < deadline,
            "task {} still {} after 10s",
            task_id,
            task.status
        );
        std::thread::sleep(Duration::from_millis(10));
    }
}
