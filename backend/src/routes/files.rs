use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use tower::ServiceExt;
use tower_http::services::ServeFile;

use mlsharp_common::{FileRecord, TaskRecord};

use crate::error::{ApiError, Result};
use crate::AppState;

async fn get_file(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<String>,
) -> Result<Json<FileRecord>> {
    Ok(Json(state.repo.get_file(&file_id)?))
}

async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<String>,
) -> Result<Json<Vec<TaskRecord>>> {
    // 404 for unknown files rather than an empty list.
    state.repo.get_file(&file_id)?;
    Ok(Json(state.repo.list_tasks_for_file(&file_id)?))
}

/// Download the original upload or a generated artifact.
async fn get_artifact(
    State(state): State<Arc<AppState>>,
    Path((file_id, artifact)): Path<(String, String)>,
    request: Request,
) -> Result<Response> {
    let file = state.repo.get_file(&file_id)?;

    let path = match artifact.as_str() {
        "original" => Some(file.original_path),
        "gaussians" => file.gaussians_path,
        "render" => file.render_path,
        "render-depth" => file.render_depth_path,
        other => return Err(ApiError::NotFound(format!("unknown artifact: {}", other))),
    }
    .ok_or_else(|| ApiError::NotFound(format!("{} not ready", artifact.replace('-', " "))))?;

    // ServeFile answers a missing file with an empty 404; keep the JSON error body.
    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => return Err(ApiError::NotFound("file not found".to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound("file not found".to_string()));
        }
        Err(e) => return Err(ApiError::Internal(format!("failed to read {}: {}", path, e))),
    }

    match ServeFile::new(&path).oneshot(request).await {
        Ok(response) => Ok(response.into_response()),
        Err(never) => match never {},
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/files/:file_id", get(get_file))
        .route("/files/:file_id/tasks", get(list_tasks))
        .route("/files/:file_id/:artifact", get(get_artifact))
        .with_state(state)
}
