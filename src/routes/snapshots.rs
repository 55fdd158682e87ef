use axum::extract::{Path, Query};
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::models::SnapshotSidecar;
use crate::state::AppState;

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub(crate) struct SnapshotIndexQuery {
    limit: Option<usize>,
    before: Option<String>,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub(crate) struct SnapshotIndexEntry {
    pub(crate) id: String,
}

/// Snapshot index: ids only (spec.md §4.10 "metadata only"). IDs already
/// encode the capture timestamp (spec.md §3/§6), so the dashboard does not
/// need the full sidecar to render a scrubber.
#[utoipa::path(
    get,
    path = "/api/snapshots/{meter}",
    tag = "snapshots",
    params(("meter" = String, Path, description = "Meter name"), SnapshotIndexQuery),
    responses(
        (status = 200, description = "Snapshot index, newest first", body = [SnapshotIndexEntry]),
        (status = 404, description = "Unknown meter")
    )
)]
pub(crate) async fn list_snapshots(
    axum::extract::State(state): axum::extract::State<AppState>,
    Path(meter): Path<String>,
    Query(query): Query<SnapshotIndexQuery>,
) -> AppResult<Json<Vec<SnapshotIndexEntry>>> {
    if state.config.current().meter(&meter).is_none() {
        return Err(AppError::not_found(format!("unknown meter '{meter}'")));
    }

    let mut ids = state
        .archive
        .list(&meter)
        .map_err(crate::error::AppError::from)?;

    if let Some(before) = query.before {
        if let Some(position) = ids.iter().position(|id| *id == before) {
            ids.drain(0..=position);
        }
    }
    if let Some(limit) = query.limit {
        ids.truncate(limit);
    }

    Ok(Json(
        ids.into_iter().map(|id| SnapshotIndexEntry { id }).collect(),
    ))
}

#[utoipa::path(
    get,
    path = "/api/snapshot/{meter}/{id}/image",
    tag = "snapshots",
    params(
        ("meter" = String, Path, description = "Meter name"),
        ("id" = String, Path, description = "Snapshot id")
    ),
    responses(
        (status = 200, description = "JPEG image bytes", content_type = "image/jpeg"),
        (status = 404, description = "Snapshot not found")
    )
)]
pub(crate) async fn snapshot_image(
    axum::extract::State(state): axum::extract::State<AppState>,
    Path((meter, id)): Path<(String, String)>,
) -> AppResult<impl IntoResponse> {
    let bytes = state.archive.get_image(&meter, &id).await?;
    Ok(([(CONTENT_TYPE, "image/jpeg")], bytes))
}

#[utoipa::path(
    get,
    path = "/api/snapshot/{meter}/{id}/sidecar",
    tag = "snapshots",
    params(
        ("meter" = String, Path, description = "Meter name"),
        ("id" = String, Path, description = "Snapshot id")
    ),
    responses(
        (status = 200, description = "Sidecar metadata", body = SnapshotSidecar),
        (status = 404, description = "Snapshot not found")
    )
)]
pub(crate) async fn snapshot_sidecar(
    axum::extract::State(state): axum::extract::State<AppState>,
    Path((meter, id)): Path<(String, String)>,
) -> AppResult<Json<SnapshotSidecar>> {
    let sidecar = state.archive.get_sidecar(&meter, &id).await?;
    Ok(Json(sidecar))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/snapshots/{meter}", get(list_snapshots))
        .route("/snapshot/{meter}/{id}/image", get(snapshot_image))
        .route("/snapshot/{meter}/{id}/sidecar", get(snapshot_sidecar))
}
