use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use mlsharp_common::{FileOutputs, RenderParams, TaskStatus, TaskType};

use crate::db::Repository;
use crate::services::{PredictInput, Predictor, RenderInput, Renderer};
use crate::tasks::{panic_message, RunnerError, Work};

/// What a job computes.
#[derive(Debug, Clone)]
pub enum JobSpec {
    Predict {
        input_path: PathBuf,
        /// Requested device; `None` uses the predictor default.
        device: Option<String>,
    },
    Render {
        gaussians_path: PathBuf,
        params: RenderParams,
    },
}

/// A job bound to the task that tracks it.
#[derive(Debug, Clone)]
pub struct Job {
    pub task_id: String,
    pub file_id: String,
    pub spec: JobSpec,
}

impl Job {
    pub fn task_type(&self) -> TaskType {
        match self.spec {
            JobSpec::Predict { .. } => TaskType::Predict,
            JobSpec::Render { .. } => TaskType::Render,
        }
    }

    /// Render jobs must hold a GPU slot while they run.
    pub fn requires_gpu(&self) -> bool {
        matches!(self.spec, JobSpec::Render { .. })
    }
}

/// Runs jobs and records their lifecycle.
pub struct JobExecutor {
    repo: Arc<Repository>,
    predictor: Arc<dyn Predictor>,
    renderer: Arc<dyn Renderer>,
}

impl JobExecutor {
    pub fn new(
        repo: Arc<Repository>,
        predictor: Arc<dyn Predictor>,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        Self {
            repo,
            predictor,
            renderer,
        }
    }

    /// Run `job` to a terminal status and return it.
    ///
    /// Never fails and never panics on behalf of the collaborator: errors and
    /// panics are recorded as a `failed` task with the error text.
    pub fn execute(&self, job: &Job) -> TaskStatus {
        let task_id = job.task_id.as_str();
        let file_id = job.file_id.as_str();
        let task_type = job.task_type();

        if let Err(e) = self.repo.update_task(task_id, TaskStatus::Running, None) {
            tracing::error!(task_id, file_id, %task_type, "Could not mark task running: {}", e);
            return self.fail(job, &e.to_string());
        }
        tracing::info!(task_id, file_id, %task_type, "Job started");

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.run(job)))
            .unwrap_or_else(|payload| Err(format!("job panicked: {}", panic_message(&*payload))));

        let outputs = match result {
            Ok(outputs) => outputs,
            Err(message) => return self.fail(job, &message),
        };

        if let Err(e) = self.repo.update_file_outputs(file_id, &outputs) {
            return self.fail(job, &format!("failed to record outputs: {}", e));
        }

        match self.repo.update_task(task_id, TaskStatus::Completed, None) {
            Ok(_) => {
                tracing::info!(task_id, file_id, %task_type, "Job completed");
                TaskStatus::Completed
            }
            Err(e) => {
                tracing::error!(task_id, file_id, "Could not mark task completed: {}", e);
                self.fail(job, &e.to_string())
            }
        }
    }

    /// Fail a job that never started.
    pub fn abandon(&self, job: &Job, reason: &RunnerError) -> TaskStatus {
        tracing::error!(task_id = %job.task_id, file_id = %job.file_id, "Job abandoned: {}", reason);
        self.fail(job, &reason.to_string())
    }

    fn run(&self, job: &Job) -> Result<FileOutputs, String> {
        match &job.spec {
            JobSpec::Predict { input_path, device } => {
                let output = self
                    .predictor
                    .predict(&PredictInput {
                        file_id: job.file_id.clone(),
                        input_path: input_path.clone(),
                        device: device.clone(),
                    })
                    .map_err(|e| e.to_string())?;
                Ok(FileOutputs::gaussians(path_text(&output.gaussians_path)))
            }
            JobSpec::Render {
                gaussians_path,
                params,
            } => {
                let output = self
                    .renderer
                    .render(&RenderInput {
                        file_id: job.file_id.clone(),
                        gaussians_path: gaussians_path.clone(),
                        params: params.clone(),
                    })
                    .map_err(|e| e.to_string())?;
                Ok(FileOutputs::render(
                    path_text(&output.render_path),
                    path_text(&output.render_depth_path),
                ))
            }
        }
    }

    fn fail(&self, job: &Job, message: &str) -> TaskStatus {
        tracing::error!(
            task_id = %job.task_id,
            file_id = %job.file_id,
            task_type = %job.task_type(),
            "Job failed: {}",
            message
        );
        match self
            .repo
            .update_task(&job.task_id, TaskStatus::Failed, Some(message))
        {
            Ok(record) => record.status,
            Err(e) => {
                tracing::error!(task_id = %job.task_id, "Could not mark task failed: {}", e);
                self.repo
                    .get_task(&job.task_id)
                    .map(|record| record.status)
                    .unwrap_or(TaskStatus::Failed)
            }
        }
    }
}

/// A job scheduled on the task runner.
pub struct JobWork {
    pub executor: Arc<JobExecutor>,
    pub job: Job,
}

impl Work for JobWork {
    fn run(self: Box<Self>) {
        self.executor.execute(&self.job);
    }

    fn abandon(self: Box<Self>, reason: RunnerError) {
        self.executor.abandon(&self.job, &reason);
    }
}

fn path_text(path: &std::path::Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ServiceError;
    use crate::storage::Storage;
    use crate::test_util::{StubBehavior, StubPredictor, StubRenderer};
    use std::sync::Mutex;

    fn setup(predictor: Arc<dyn Predictor>) -> (Arc<Repository>, JobExecutor) {
        let renderer = Arc::new(StubRenderer::new(Storage::new("/unused"), StubBehavior::Succeed));
        setup_with(predictor, renderer)
    }

    fn setup_with(
        predictor: Arc<dyn Predictor>,
        renderer: Arc<dyn Renderer>,
    ) -> (Arc<Repository>, JobExecutor) {
        let repo = Arc::new(Repository::new(":memory:").unwrap());
        let executor = JobExecutor::new(Arc::clone(&repo), predictor, renderer);
        (repo, executor)
    }

    fn predict_job(repo: &Repository) -> Job {
        repo.create_file("f1", "scene.png", "/data/files/f1/original.png")
            .unwrap();
        repo.create_task("t1", TaskType::Predict, "f1").unwrap();
        Job {
            task_id: "t1".to_string(),
            file_id: "f1".to_string(),
            spec: JobSpec::Predict {
                input_path: PathBuf::from("/data/files/f1/original.png"),
                device: None,
            },
        }
    }

    /// Records the task status the predictor observes while it runs.
    struct ObservingPredictor {
        repo: Mutex<Option<Arc<Repository>>>,
        seen: Mutex<Vec<TaskStatus>>,
    }

    impl Predictor for ObservingPredictor {
        fn predict(&self, _input: &PredictInput) -> Result<crate::services::PredictOutput, ServiceError> {
            if let Some(repo) = self.repo.lock().unwrap().as_ref() {
                self.seen.lock().unwrap().push(repo.get_task("t1").unwrap().status);
            }
            Err(ServiceError::OutputMissing("gaussians.ply".to_string()))
        }
    }

    #[test]
    fn test_predict_failure_recorded_and_outputs_untouched() {
        let predictor = Arc::new(ObservingPredictor {
            repo: Mutex::new(None),
            seen: Mutex::new(Vec::new()),
        });
        let (repo, executor) = setup(predictor.clone());
        *predictor.repo.lock().unwrap() = Some(Arc::clone(&repo));
        let job = predict_job(&repo);

        let status = executor.execute(&job);

        assert_eq!(status, TaskStatus::Failed);
        assert_eq!(*predictor.seen.lock().unwrap(), vec![TaskStatus::Running]);

        let task = repo.get_task("t1").unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(
            task.error.as_deref(),
            Some("Expected output was not written: gaussians.ply")
        );

        let file = repo.get_file("f1").unwrap();
        assert!(file.gaussians_path.is_none());
        assert!(file.render_path.is_none());
    }

    #[test]
    fn test_failed_render_keeps_earlier_outputs() {
        let (repo, executor) = setup_with(
            Arc::new(StubPredictor::new(Storage::new("/unused"), StubBehavior::Succeed)),
            Arc::new(StubRenderer::new(
                Storage::new("/unused"),
                StubBehavior::Fail("gpu oom".to_string()),
            )),
        );
        repo.create_file("f1", "scene.png", "/data/files/f1/original.png")
            .unwrap();
        repo.update_file_outputs("f1", &FileOutputs::gaussians("/data/files/f1/gaussians.ply"))
            .unwrap();
        repo.update_file_outputs(
            "f1",
            &FileOutputs::render("/data/files/f1/render.mp4", "/data/files/f1/render.depth.mp4"),
        )
        .unwrap();
        let before = repo.get_file("f1").unwrap();
        repo.create_task("t2", TaskType::Render, "f1").unwrap();

        let job = Job {
            task_id: "t2".to_string(),
            file_id: "f1".to_string(),
            spec: JobSpec::Render {
                gaussians_path: PathBuf::from("/data/files/f1/gaussians.ply"),
                params: RenderParams::default(),
            },
        };
        assert_eq!(executor.execute(&job), TaskStatus::Failed);

        let task = repo.get_task("t2").unwrap();
        assert!(task.error.unwrap().contains("gpu oom"));
        let after = repo.get_file("f1").unwrap();
        assert_eq!(after, before);
        assert_eq!(after.gaussians_path.as_deref(), Some("/data/files/f1/gaussians.ply"));
        assert_eq!(after.render_path.as_deref(), Some("/data/files/f1/render.mp4"));
    }

    #[test]
    fn test_predict_success_merges_gaussians() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path());
        let (repo, executor) = setup(Arc::new(StubPredictor::new(
            storage.clone(),
            StubBehavior::Succeed,
        )));
        let job = predict_job(&repo);

        assert_eq!(executor.execute(&job), TaskStatus::Completed);

        let task = repo.get_task("t1").unwrap();
        assert!(task.error.is_none());
        let file = repo.get_file("f1").unwrap();
        assert_eq!(
            file.gaussians_path,
            Some(path_text(&storage.gaussians_path("f1")))
        );
    }

    #[test]
    fn test_collaborator_panic_becomes_failure() {
        let (repo, executor) = setup(Arc::new(StubPredictor::new(
            Storage::new("/unused"),
            StubBehavior::Panic("tensor shape mismatch".to_string()),
        )));
        let job = predict_job(&repo);

        assert_eq!(executor.execute(&job), TaskStatus::Failed);
        let task = repo.get_task("t1").unwrap();
        assert_eq!(
            task.error.as_deref(),
            Some("job panicked: tensor shape mismatch")
        );
    }

    #[test]
    fn test_executing_twice_does_not_revert_terminal_status() {
        let (repo, executor) = setup(Arc::new(StubPredictor::new(
            Storage::new("/unused"),
            StubBehavior::Fail("first".to_string()),
        )));
        let job = predict_job(&repo);

        assert_eq!(executor.execute(&job), TaskStatus::Failed);
        assert_eq!(executor.execute(&job), TaskStatus::Failed);

        let task = repo.get_task("t1").unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.unwrap().contains("first"));
    }

    #[test]
    fn test_abandoned_job_fails_from_queued() {
        let (repo, executor) = setup(Arc::new(StubPredictor::new(
            Storage::new("/unused"),
            StubBehavior::Succeed,
        )));
        let job = predict_job(&repo);

        let status = executor.abandon(&job, &RunnerError::GateUnavailable);

        assert_eq!(status, TaskStatus::Failed);
        let task = repo.get_task("t1").unwrap();
        assert_eq!(task.error.as_deref(), Some("GPU gate coordinator is not running"));
    }

    #[test]
    fn test_only_render_requires_gpu() {
        let render = Job {
            task_id: "t".to_string(),
            file_id: "f".to_string(),
            spec: JobSpec::Render {
                gaussians_path: PathBuf::from("g.ply"),
                params: RenderParams::default(),
            },
        };
        assert!(render.requires_gpu());
        assert_eq!(render.task_type(), TaskType::Render);

        let predict = Job {
            spec: JobSpec::Predict {
                input_path: PathBuf::from("i.png"),
                device: None,
            },
            ..render
        };
        assert!(!predict.requires_gpu());
    }
}
