use std::path::PathBuf;
use std::sync::Arc;

use mlsharp_common::{new_id, RenderParams, SubmittedJob, TaskStatus};

use super::{Job, JobError, JobExecutor, JobSpec, JobWork};
use crate::db::Repository;
use crate::tasks::{GateStats, TaskHandle, TaskRunner};

/// Accepts predict and render requests and schedules them on the runner.
pub struct JobOrchestrator {
    repo: Arc<Repository>,
    runner: TaskRunner,
    executor: Arc<JobExecutor>,
}

impl JobOrchestrator {
    pub fn new(repo: Arc<Repository>, runner: TaskRunner, executor: JobExecutor) -> Self {
        Self {
            repo,
            runner,
            executor: Arc::new(executor),
        }
    }

    /// Record an uploaded image and queue a predict job for it.
    pub fn submit_predict(
        &self,
        file_id: &str,
        original_name: &str,
        original_path: &str,
        device: Option<String>,
    ) -> Result<SubmittedJob, JobError> {
        self.repo.create_file(file_id, original_name, original_path)?;
        self.schedule(predict_job(file_id, original_path, device))
    }

    /// Queue a render job for a file whose gaussians are ready.
    ///
    /// Every rejection happens before the task row is created.
    pub fn submit_render(
        &self,
        file_id: &str,
        params: RenderParams,
    ) -> Result<SubmittedJob, JobError> {
        params.validate().map_err(JobError::Validation)?;

        let file = self.repo.get_file(file_id)?;
        let gaussians_path = file
            .gaussians_path
            .map(PathBuf::from)
            .filter(|path| path.is_file())
            .ok_or_else(|| JobError::Validation("gaussians not found".to_string()))?;

        self.runner.ensure_gpu_ready()?;

        let job = Job {
            task_id: new_id(),
            file_id: file_id.to_string(),
            spec: JobSpec::Render {
                gaussians_path,
                params,
            },
        };
        self.schedule(job)
    }

    /// Current GPU gate usage, if a gate is configured.
    pub fn gpu_stats(&self) -> Option<GateStats> {
        self.runner.gpu_gate().map(|gate| gate.stats())
    }

    pub fn worker_count(&self) -> usize {
        self.runner.worker_count()
    }

    fn schedule(&self, job: Job) -> Result<SubmittedJob, JobError> {
        self.dispatch(job).map(|dispatched| SubmittedJob {
            task_id: dispatched.task_id().to_string(),
            file_id: dispatched.file_id,
        })
    }

    /// Create the task row and submit. A submit failure fails the task.
    fn dispatch(&self, job: Job) -> Result<DispatchedJob, JobError> {
        let task_type = job.task_type();
        let requires_gpu = job.requires_gpu();
        let task_id = job.task_id.clone();
        let file_id = job.file_id.clone();

        self.repo.create_task(&task_id, task_type, &file_id)?;

        let work = JobWork {
            executor: Arc::clone(&self.executor),
            job,
        };
        match self.runner.submit(task_id.as_str(), work, requires_gpu) {
            Ok(handle) => {
                tracing::info!(task_id = %task_id, file_id = %file_id, %task_type, "Job queued");
                Ok(DispatchedJob { handle, file_id })
            }
            Err(e) => {
                tracing::error!(task_id = %task_id, file_id = %file_id, "Submit failed: {}", e);
                if let Err(update_err) =
                    self.repo
                        .update_task(&task_id, TaskStatus::Failed, Some(&e.to_string()))
                {
                    tracing::error!(task_id = %task_id, "Could not mark task failed: {}", update_err);
                }
                Err(e.into())
            }
        }
    }
}

fn predict_job(file_id: &str, original_path: &str, device: Option<String>) -> Job {
    Job {
        task_id: new_id(),
        file_id: file_id.to_string(),
        spec: JobSpec::Predict {
            input_path: PathBuf::from(original_path),
            device,
        },
    }
}

struct DispatchedJob {
    handle: TaskHandle,
    file_id: String,
}

impl DispatchedJob {
    fn task_id(&self) -> &str {
        self.handle.task_id()
    }
}
