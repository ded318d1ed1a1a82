//! Task types for predict and render jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of job a task tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Image to gaussians inference.
    Predict,
    /// Gaussians to video rendering. Requires a GPU slot.
    Render,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Predict => "predict",
            TaskType::Render => "render",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "predict" => Ok(TaskType::Predict),
            "render" => Ok(TaskType::Render),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Lifecycle state of a task.
///
/// Tasks move `queued -> running -> completed | failed`. A task may also go
/// straight from `queued` to `failed` when its work is abandoned before it
/// starts. `completed` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for a worker thread or, for render jobs, a GPU slot.
    Queued,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Queued,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Statuses a task may be in immediately before moving to `self`.
    pub fn allowed_sources(&self) -> &'static [TaskStatus] {
        match self {
            TaskStatus::Queued => &[],
            TaskStatus::Running => &[TaskStatus::Queued],
            TaskStatus::Completed => &[TaskStatus::Running],
            TaskStatus::Failed => &[TaskStatus::Queued, TaskStatus::Running],
        }
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        next.allowed_sources().contains(self)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TaskStatus::Queued),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Returned when parsing a stored enum value that is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown variant: {0}")]
pub struct UnknownVariant(pub String);

/// A persisted task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    /// Present iff `status` is `failed`.
    pub error: Option<String>,
    pub file_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Identifiers handed back when a job is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedJob {
    pub task_id: String,
    pub file_id: String,
}

/// Mint a new opaque identifier for a file or task.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&TaskStatus::Completed).unwrap();
        assert_eq!(json, r#""completed""#);

        let parsed: TaskStatus = serde_json::from_str(r#""queued""#).unwrap();
        assert_eq!(parsed, TaskStatus::Queued);
    }

    #[test]
    fn test_status_display_matches_from_str() {
        for status in TaskStatus::ALL {
            assert_eq!(status.to_string().parse::<TaskStatus>().unwrap(), status);
        }
        let err = "paused".parse::<TaskStatus>().unwrap_err();
        assert_eq!(err, UnknownVariant("paused".to_string()));
        assert_eq!(err.to_string(), "unknown variant: paused");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn test_transitions() {
        assert!(TaskStatus::Queued.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Queued.can_transition_to(TaskStatus::Failed));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Failed));

        assert!(!TaskStatus::Queued.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Running.can_transition_to(TaskStatus::Running));
        for next in TaskStatus::ALL {
            assert!(!TaskStatus::Completed.can_transition_to(next));
            assert!(!TaskStatus::Failed.can_transition_to(next));
        }
    }

    #[test]
    fn test_task_type_round_trip() {
        assert_eq!("render".parse::<TaskType>().unwrap(), TaskType::Render);
        assert_eq!(TaskType::Predict.to_string(), "predict");
    }

    #[test]
    fn test_new_id_is_simple_uuid() {
        let id = new_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, new_id());
    }
}
