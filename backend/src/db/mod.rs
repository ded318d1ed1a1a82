//! Durable store for file and task records.
//!
//! The [`Repository`] is the only component that mutates persisted state.
//! Every operation touches a single row and runs under one connection lock,
//! so callers on any thread need no extra synchronisation.

mod sqlite;

pub use sqlite::Repository;

use mlsharp_common::TaskStatus;

/// Errors returned by the [`Repository`].
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: &'static str, id: String },
    #[error("task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },
    #[error("Database error: {0}")]
    Database(String),
    #[error("IO error: {0}")]
    Io(String),
}

impl RepoError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RepoError::NotFound { .. })
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(err: rusqlite::Error) -> Self {
        RepoError::Database(err.to_string())
    }
}
