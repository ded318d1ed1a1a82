use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::tasks::GateStats;
use crate::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn gpu(State(state): State<Arc<AppState>>) -> Json<Option<GateStats>> {
    Json(state.jobs.gpu_stats())
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let version = env!("CARGO_PKG_VERSION");
    let mut body = format!(
        "# HELP mlsharp_up Whether the service is up\n\
         # TYPE mlsharp_up gauge\n\
         mlsharp_up 1\n\
         # HELP mlsharp_info Service information\n\
         # TYPE mlsharp_info gauge\n\
         mlsharp_info{{version=\"{}\"}} 1\n\
         # HELP mlsharp_task_workers Worker threads executing jobs\n\
         # TYPE mlsharp_task_workers gauge\n\
         mlsharp_task_workers {}\n",
        version,
        state.jobs.worker_count()
    );
    if let Some(stats) = state.jobs.gpu_stats() {
        body.push_str(&format!(
            "# HELP mlsharp_gpu_slots GPU slots by state\n\
             # TYPE mlsharp_gpu_slots gauge\n\
             mlsharp_gpu_slots{{state=\"capacity\"}} {}\n\
             mlsharp_gpu_slots{{state=\"in_use\"}} {}\n\
             mlsharp_gpu_slots{{state=\"waiting\"}} {}\n",
            stats.capacity, stats.in_use, stats.waiting
        ));
    }
    (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/v1/gpu", get(gpu))
        .with_state(state)
}
