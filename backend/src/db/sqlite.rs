use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, ToSql};

use mlsharp_common::{FileOutputs, FileRecord, TaskRecord, TaskStatus, TaskType};

use super::RepoError;

const FILE_COLUMNS: &str = "file_id, original_name, original_path, gaussians_path, \
                            render_path, render_depth_path, created_at, updated_at";
const TASK_COLUMNS: &str = "task_id, task_type, status, error, file_id, created_at, updated_at";

/// Stored when a task is failed without an error message.
const DEFAULT_FAILURE: &str = "job failed";

/// SQLite-backed store of file and task records.
pub struct Repository {
    conn: Mutex<Connection>,
}

impl Repository {
    /// Open (or create) the database at `database_url`.
    ///
    /// Accepts a plain path, a `sqlite:` prefixed path, or `:memory:`.
    pub fn new(database_url: &str) -> Result<Self, RepoError> {
        // Parse sqlite: prefix if present
        let path = database_url.strip_prefix("sqlite:").unwrap_or(database_url);

        let conn = if path == ":memory:" || path.is_empty() {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent).map_err(|e| RepoError::Io(e.to_string()))?;
            }
            let conn = Connection::open(path)?;
            let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
            tracing::debug!("SQLite journal mode: {}", mode);
            conn
        };

        conn.pragma_update(None, "foreign_keys", "ON")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS files (
                file_id TEXT PRIMARY KEY,
                original_name TEXT NOT NULL,
                original_path TEXT NOT NULL,
                gaussians_path TEXT,
                render_path TEXT,
                render_depth_path TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS tasks (
                task_id TEXT PRIMARY KEY,
                task_type TEXT NOT NULL,
                status TEXT NOT NULL,
                error TEXT,
                file_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (file_id) REFERENCES files(file_id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_tasks_file_id ON tasks(file_id)",
            [],
        )?;

        tracing::info!("Job repository initialized with database: {}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, RepoError> {
        self.conn
            .lock()
            .map_err(|e| RepoError::Database(e.to_string()))
    }

    pub fn create_file(
        &self,
        file_id: &str,
        original_name: &str,
        original_path: &str,
    ) -> Result<FileRecord, RepoError> {
        let conn = self.lock()?;
        let now = timestamp();

        conn.execute(
            "INSERT INTO files (file_id, original_name, original_path, gaussians_path,
                                render_path, render_depth_path, created_at, updated_at)
             VALUES (?1, ?2, ?3, NULL, NULL, NULL, ?4, ?4)",
            params![file_id, original_name, original_path, now],
        )
        .map_err(|e| match constraint_code(&e) {
            Some(rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY) => RepoError::AlreadyExists {
                kind: "file",
                id: file_id.to_string(),
            },
            _ => e.into(),
        })?;

        tracing::debug!(file_id, "Created file record");
        fetch_file(&conn, file_id)
    }

    /// Merge output paths into a file record. Fields left as `None` keep
    /// whatever is already stored.
    pub fn update_file_outputs(
        &self,
        file_id: &str,
        outputs: &FileOutputs,
    ) -> Result<FileRecord, RepoError> {
        let conn = self.lock()?;

        let changed = conn.execute(
            "UPDATE files
             SET gaussians_path = COALESCE(?1, gaussians_path),
                 render_path = COALESCE(?2, render_path),
                 render_depth_path = COALESCE(?3, render_depth_path),
                 updated_at = ?4
             WHERE file_id = ?5",
            params![
                outputs.gaussians_path,
                outputs.render_path,
                outputs.render_depth_path,
                timestamp(),
                file_id,
            ],
        )?;

        if changed == 0 {
            return Err(not_found("file", file_id));
        }
        fetch_file(&conn, file_id)
    }

    pub fn get_file(&self, file_id: &str) -> Result<FileRecord, RepoError> {
        let conn = self.lock()?;
        fetch_file(&conn, file_id)
    }

    /// Fetch the records for the given ids. Unknown ids are skipped.
    pub fn list_files(&self, file_ids: &[String]) -> Result<Vec<FileRecord>, RepoError> {
        if file_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = (1..=file_ids.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {} FROM files WHERE file_id IN ({}) ORDER BY created_at, file_id",
            FILE_COLUMNS, placeholders
        );

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let files = stmt
            .query_map(params_from_iter(file_ids.iter()), file_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(files)
    }

    /// Insert a task in the `queued` state. The file must already exist.
    pub fn create_task(
        &self,
        task_id: &str,
        task_type: TaskType,
        file_id: &str,
    ) -> Result<TaskRecord, RepoError> {
        let conn = self.lock()?;
        let now = timestamp();

        conn.execute(
            "INSERT INTO tasks (task_id, task_type, status, error, file_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, NULL, ?4, ?5, ?5)",
            params![
                task_id,
                task_type.as_str(),
                TaskStatus::Queued.as_str(),
                file_id,
                now,
            ],
        )
        .map_err(|e| match constraint_code(&e) {
            Some(rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY) => RepoError::AlreadyExists {
                kind: "task",
                id: task_id.to_string(),
            },
            Some(rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY) => not_found("file", file_id),
            _ => e.into(),
        })?;

        tracing::debug!(task_id, file_id, task_type = %task_type, "Created task record");
        fetch_task(&conn, task_id)
    }

    /// Move a task to `status`.
    ///
    /// The update only applies when the current status is an allowed source
    /// for `status`; anything else, including any move out of a terminal
    /// status, fails with [`RepoError::InvalidTransition`] and leaves the row
    /// untouched. `error` is stored only for `failed`.
    pub fn update_task(
        &self,
        task_id: &str,
        status: TaskStatus,
        error: Option<&str>,
    ) -> Result<TaskRecord, RepoError> {
        let error = match status {
            TaskStatus::Failed => Some(error.unwrap_or(DEFAULT_FAILURE)),
            _ => None,
        };
        let sources: Vec<&str> = status.allowed_sources().iter().map(|s| s.as_str()).collect();

        let conn = self.lock()?;

        let changed = if sources.is_empty() {
            0
        } else {
            let placeholders = (5..5 + sources.len())
                .map(|i| format!("?{}", i))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "UPDATE tasks SET status = ?1, error = ?2, updated_at = ?3
                 WHERE task_id = ?4 AND status IN ({})",
                placeholders
            );

            let status_str = status.as_str();
            let now = timestamp();
            let mut values: Vec<&dyn ToSql> = vec![&status_str, &error, &now, &task_id];
            for source in &sources {
                values.push(source);
            }
            conn.execute(&sql, values.as_slice())?
        };

        if changed == 0 {
            let current: Option<String> = conn
                .query_row(
                    "SELECT status FROM tasks WHERE task_id = ?1",
                    params![task_id],
                    |row| row.get(0),
                )
                .optional()?;

            return match current {
                None => Err(not_found("task", task_id)),
                Some(from) => {
                    let from = from
                        .parse::<TaskStatus>()
                        .map_err(|e| RepoError::Database(e.to_string()))?;
                    tracing::warn!(task_id, %from, to = %status, "Rejected task transition");
                    Err(RepoError::InvalidTransition {
                        task_id: task_id.to_string(),
                        from,
                        to: status,
                    })
                }
            };
        }

        tracing::debug!(task_id, status = %status, "Updated task status");
        fetch_task(&conn, task_id)
    }

    pub fn get_task(&self, task_id: &str) -> Result<TaskRecord, RepoError> {
        let conn = self.lock()?;
        fetch_task(&conn, task_id)
    }

    /// All tasks recorded for a file, oldest first.
    pub fn list_tasks_for_file(&self, file_id: &str) -> Result<Vec<TaskRecord>, RepoError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM tasks WHERE file_id = ?1 ORDER BY created_at, task_id",
            TASK_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let tasks = stmt
            .query_map(params![file_id], task_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }
}

/// Current time in the fixed-width form stored in the database.
///
/// Microsecond precision with a `Z` suffix keeps lexical and chronological
/// order identical.
fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn not_found(kind: &'static str, id: &str) -> RepoError {
    RepoError::NotFound {
        kind,
        id: id.to_string(),
    }
}

fn constraint_code(err: &rusqlite::Error) -> Option<i32> {
    match err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
            Some(e.extended_code)
        }
        _ => None,
    }
}

fn fetch_file(conn: &Connection, file_id: &str) -> Result<FileRecord, RepoError> {
    let sql = format!("SELECT {} FROM files WHERE file_id = ?1", FILE_COLUMNS);
    conn.query_row(&sql, params![file_id], file_from_row)
        .optional()?
        .ok_or_else(|| not_found("file", file_id))
}

fn fetch_task(conn: &Connection, task_id: &str) -> Result<TaskRecord, RepoError> {
    let sql = format!("SELECT {} FROM tasks WHERE task_id = ?1", TASK_COLUMNS);
    conn.query_row(&sql, params![task_id], task_from_row)
        .optional()?
        .ok_or_else(|| not_found("task", task_id))
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        file_id: row.get(0)?,
        original_name: row.get(1)?,
        original_path: row.get(2)?,
        gaussians_path: row.get(3)?,
        render_path: row.get(4)?,
        render_depth_path: row.get(5)?,
        created_at: time_column(row, 6)?,
        updated_at: time_column(row, 7)?,
    })
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<TaskRecord> {
    Ok(TaskRecord {
        task_id: row.get(0)?,
        task_type: parsed_column(row, 1)?,
        status: parsed_column(row, 2)?,
        error: row.get(3)?,
        file_id: row.get(4)?,
        created_at: time_column(row, 5)?,
        updated_at: time_column(row, 6)?,
    })
}

fn parsed_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value: String = row.get(idx)?;
    value
        .parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let value: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
