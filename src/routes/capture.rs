use axum::extract::Path;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;

use crate::error::AppResult;
use crate::services::meter_monitor::MonitorError;
use crate::services::orchestrator::CaptureError;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub(crate) struct NoChangeResponse {
    pub(crate) no_change: bool,
}

/// Duplicate-capture is not an error (spec.md §4.10: "duplicate capture ->
/// 200 with `no_change:true`"); every other failure falls through to the
/// standard `AppError` mapping (502 for camera/vision errors, 404 for an
/// unknown meter, etc).
fn duplicate_capture_response(err: &CaptureError) -> Option<axum::response::Response> {
    if matches!(err, CaptureError::Failed(MonitorError::DuplicateCapture)) {
        Some(Json(NoChangeResponse { no_change: true }).into_response())
    } else {
        None
    }
}

#[utoipa::path(
    post,
    path = "/api/capture/{meter}",
    tag = "capture",
    params(("meter" = String, Path, description = "Meter name")),
    responses(
        (status = 200, description = "New reading, or {no_change:true} on duplicate capture"),
        (status = 404, description = "Unknown meter"),
        (status = 502, description = "Camera or vision provider failure")
    )
)]
pub(crate) async fn capture_once(
    axum::extract::State(state): axum::extract::State<AppState>,
    Path(meter): Path<String>,
) -> AppResult<axum::response::Response> {
    match state.orchestrator.capture_once(&meter).await {
        Ok(reading) => Ok(Json(reading).into_response()),
        Err(err) => match duplicate_capture_response(&err) {
            Some(response) => Ok(response),
            None => Err(err.into()),
        },
    }
}

#[utoipa::path(
    post,
    path = "/api/reprocess/{meter}/{id}",
    tag = "capture",
    params(
        ("meter" = String, Path, description = "Meter name"),
        ("id" = String, Path, description = "Snapshot id to reprocess")
    ),
    responses(
        (status = 200, description = "New reading referencing the same snapshot"),
        (status = 404, description = "Unknown meter or snapshot"),
        (status = 502, description = "Vision provider failure")
    )
)]
pub(crate) async fn reprocess(
    axum::extract::State(state): axum::extract::State<AppState>,
    Path((meter, id)): Path<(String, String)>,
) -> AppResult<axum::response::Response> {
    match state.orchestrator.reprocess(&meter, &id).await {
        Ok(reading) => Ok(Json(reading).into_response()),
        Err(err) => match duplicate_capture_response(&err) {
            Some(response) => Ok(response),
            None => Err(err.into()),
        },
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/capture/{meter}", post(capture_once))
        .route("/reprocess/{meter}/{id}", post(reprocess))
}
