use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::{info, warn};

use crate::camera_manager::CameraManager;
use crate::errors::{Result, WorkerError};

/// Management REST surface: health plus per-camera start/stop, all thin
/// wrappers over the camera manager.
pub fn router(manager: Arc<CameraManager>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/start/:camera_id", post(start_camera))
        .route("/stop/:camera_id", post(stop_camera))
        .layer(CatchPanicLayer::new())
        .layer(middleware::from_fn(log_requests))
        .with_state(manager)
}

/// Serves the management API until the shutdown token fires.
pub async fn serve(manager: Arc<CameraManager>, addr: &str, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| WorkerError::server(format!("failed to bind {addr}: {e}")))?;
    info!("management API listening on {addr}");

    axum::serve(listener, router(manager))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| WorkerError::server(format!("serve: {e}")))
}

async fn health(State(manager): State<Arc<CameraManager>>) -> impl IntoResponse {
    Json(json!({ "status": "ok", "cameras": manager.active_cameras().await }))
}

async fn start_camera(
    State(manager): State<Arc<CameraManager>>,
    Path(camera_id): Path<String>,
) -> Response {
    match manager.start_camera(&camera_id).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(err) => {
            warn!(camera_id = %camera_id, error = %err, "failed to start camera");
            (StatusCode::BAD_REQUEST, Json(json!({ "error": err.to_string() }))).into_response()
        }
    }
}

async fn stop_camera(
    State(manager): State<Arc<CameraManager>>,
    Path(camera_id): Path<String>,
) -> StatusCode {
    manager.stop_camera(&camera_id).await;
    StatusCode::ACCEPTED
}

async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();
    let response = next.run(request).await;
    info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        "http request"
    );
    response
}
