//! Predict and render jobs.
//!
//! A [`Job`] is a plain value describing what to run. The [`JobExecutor`]
//! interprets any job against the external collaborators and records its
//! lifecycle in the repository, and the [`JobOrchestrator`] validates requests,
//! creates records and hands jobs to the task runner.

mod executor;
mod orchestrator;

pub use executor::{Job, JobExecutor, JobSpec, JobWork};
pub use orchestrator::JobOrchestrator;

use crate::db::RepoError;
use crate::tasks::RunnerError;

/// Errors returned synchronously when a job is submitted.
///
/// Failures while a job executes are never returned; they end up in the
/// task's `error` column instead.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Configuration(String),

    #[error("Repository error: {0}")]
    Repository(RepoError),

    #[error("Runner error: {0}")]
    Runner(RunnerError),
}

impl From<RepoError> for JobError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound { .. } => JobError::NotFound(err.to_string()),
            other => JobError::Repository(other),
        }
    }
}

impl From<RunnerError> for JobError {
    fn from(err: RunnerError) -> Self {
        if err.is_configuration() {
            JobError::Configuration(err.to_string())
        } else {
            JobError::Runner(err)
        }
    }
}
