pub mod files;
pub mod health;
pub mod jobs;
pub mod tasks;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::{middleware, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::logging::request_logger;
use crate::AppState;

/// Multipart framing allowed on top of the upload size limit.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Build the full HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Oversized uploads are read far enough to be rejected with a 400.
    let body_limit = state
        .config
        .storage
        .max_upload_bytes()
        .saturating_mul(2)
        .saturating_add(MULTIPART_OVERHEAD);

    let v1 = Router::new()
        .merge(jobs::router(state.clone()))
        .merge(tasks::router(state.clone()))
        .merge(files::router(state.clone()));

    Router::new()
        .merge(health::router(state))
        .nest("/v1", v1)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(request_logger))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
