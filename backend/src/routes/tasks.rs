use std::sync::Arc;

use axum::extract::{Path, State};
use axum::{routing::get, Json, Router};

use mlsharp_common::TaskRecord;

use crate::error::Result;
use crate::AppState;

async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskRecord>> {
    Ok(Json(state.repo.get_task(&task_id)?))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/tasks/:task_id", get(get_task))
        .with_state(state)
}
