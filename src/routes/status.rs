use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::services::meter_monitor::MeterStatus;
use crate::state::AppState;

/// Surfaces each monitor's in-memory state (spec.md §4.10 `/api/status`),
/// grounded on the teacher's `routes/nodes.rs::list_nodes` shape of
/// projecting a running service's state straight into a response DTO.
#[utoipa::path(
    get,
    path = "/api/status",
    tag = "status",
    responses((status = 200, description = "Per-meter monitor status", body = [MeterStatus]))
)]
pub(crate) async fn status(State(state): State<AppState>) -> Json<Vec<MeterStatus>> {
    Json(state.orchestrator.status().await)
}

pub fn router() -> Router<AppState> {
    Router::new().route("/status", get(status))
}
