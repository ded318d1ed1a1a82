//! Task execution: a fixed pool of worker threads plus the GPU admission gate.
//!
//! This module provides:
//! - [`TaskRunner`] for running blocking work off the request path
//! - [`GpuGate`] for capping how many GPU-bound jobs run at once

mod gate;
mod runner;

pub use gate::{GateStats, GpuGate, GpuPermit};
pub use runner::{TaskHandle, TaskRunner, Work, WorkOutcome};
pub(crate) use runner::panic_message;

/// Errors from the runner and the admission gate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunnerError {
    #[error("GPU work submitted but no GPU gate is configured")]
    GateNotConfigured,
    #[error("invalid {what}: {value} (must be at least 1)")]
    InvalidCapacity { what: &'static str, value: usize },
    #[error("GPU gate coordinator is not running")]
    GateUnavailable,
    #[error("task runner is shut down")]
    Shutdown,
    #[error("failed to start {0} thread: {1}")]
    Spawn(String, String),
}

impl RunnerError {
    /// Whether this error comes from wiring rather than from a running job.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            RunnerError::GateNotConfigured | RunnerError::InvalidCapacity { .. }
        )
    }
}
