use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::{routing::post, Json, Router};

use mlsharp_common::{new_id, RenderRequest, SubmittedJob};

use crate::error::{ApiError, Result};
use crate::AppState;

/// Name used when the upload has no file name.
const DEFAULT_UPLOAD_NAME: &str = "upload.bin";

/// Accept an image upload (multipart field `file`, optional `device`) and
/// queue a predict job for it.
async fn predict(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<SubmittedJob>> {
    let mut upload = None;
    let mut device = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidRequest(e.body_text()))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = field
                    .file_name()
                    .filter(|n| !n.is_empty())
                    .unwrap_or(DEFAULT_UPLOAD_NAME)
                    .to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::InvalidRequest(e.body_text()))?;
                upload = Some((filename, data));
            }
            Some("device") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::InvalidRequest(e.body_text()))?;
                device = Some(value).filter(|v| !v.trim().is_empty());
            }
            _ => {}
        }
    }

    let (filename, data) =
        upload.ok_or_else(|| ApiError::InvalidRequest("missing multipart field: file".to_string()))?;
    if data.len() > state.config.storage.max_upload_bytes() {
        return Err(ApiError::InvalidRequest("File too large".to_string()));
    }

    let file_id = new_id();
    let original_path = state
        .storage
        .persist_upload(&file_id, &filename, &data)
        .map_err(|e| ApiError::Internal(format!("failed to store upload: {}", e)))?;

    let job = state.jobs.submit_predict(
        &file_id,
        &filename,
        &original_path.to_string_lossy(),
        device,
    )?;
    Ok(Json(job))
}

/// Queue a render job for a file whose gaussians are ready.
async fn render(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RenderRequest>,
) -> Result<Json<SubmittedJob>> {
    let job = state.jobs.submit_render(&request.file_id, request.params)?;
    Ok(Json(job))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/predict", post(predict))
        .route("/render", post(render))
        .with_state(state)
}
