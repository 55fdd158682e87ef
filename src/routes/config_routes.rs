use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use crate::error::AppResult;
use crate::models::{DialOrientation, EndpointKind, Meter, MeterKind, MeterType};
use crate::state::AppState;

/// Meter definition without camera credentials, served to the dashboard
/// (spec.md §4.10 "`GET /api/config/meters` -> enumerated list of Meter
/// definitions (without secrets)").
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub(crate) struct MeterSummary {
    pub(crate) name: String,
    pub(crate) meter_type: MeterType,
    pub(crate) unit: String,
    pub(crate) location: String,
    pub(crate) enabled: bool,
    pub(crate) camera_endpoint_kind: EndpointKind,
    pub(crate) reading_interval_seconds: u64,
    pub(crate) max_change_per_reading: f64,
    pub(crate) meter_kind: MeterKind,
    pub(crate) dial_full_revolution_units: Option<f64>,
    pub(crate) dial_orientation: Option<DialOrientation>,
    pub(crate) vision_primary_provider: String,
    pub(crate) vision_primary_model: String,
    pub(crate) vision_fallback_count: usize,
}

impl From<&Meter> for MeterSummary {
    fn from(meter: &Meter) -> Self {
        Self {
            name: meter.name.clone(),
            meter_type: meter.meter_type,
            unit: meter.unit.clone(),
            location: meter.location.clone(),
            enabled: meter.enabled,
            camera_endpoint_kind: meter.camera.endpoint_kind,
            reading_interval_seconds: meter.reading_interval_seconds,
            max_change_per_reading: meter.max_change_per_reading,
            meter_kind: meter.meter_kind,
            dial_full_revolution_units: meter.dial_full_revolution_units,
            dial_orientation: meter.dial_orientation,
            vision_primary_provider: meter.vision.primary.provider.clone(),
            vision_primary_model: meter.vision.primary.model.clone(),
            vision_fallback_count: meter.vision.fallbacks.len(),
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/config/meters",
    tag = "config",
    responses((status = 200, description = "Configured meters, secrets omitted", body = [MeterSummary]))
)]
pub(crate) async fn list_meters(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Json<Vec<MeterSummary>> {
    let config = state.config.current();
    Json(config.meters.iter().map(MeterSummary::from).collect())
}

#[utoipa::path(
    get,
    path = "/api/config/pricing",
    tag = "config",
    responses((status = 200, description = "Pricing/household tables, served verbatim"))
)]
pub(crate) async fn get_pricing(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> AppResult<Json<serde_json::Value>> {
    let config = state.config.current();
    let value = serde_json::to_value(&config.pricing).map_err(crate::error::internal_error)?;
    Ok(Json(value))
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub(crate) struct ReloadResponse {
    pub(crate) reloaded: bool,
    pub(crate) meter_count: usize,
}

/// Supplemental endpoint (SPEC_FULL.md §3 "Config hot-reload trigger"):
/// re-parses both config files and, on success, diffs the Orchestrator's
/// running monitor set against the new snapshot.
#[utoipa::path(
    post,
    path = "/api/config/reload",
    tag = "config",
    responses(
        (status = 200, description = "Config reloaded", body = ReloadResponse),
        (status = 400, description = "Config invalid, previous snapshot retained")
    )
)]
pub(crate) async fn reload_config(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> AppResult<Json<ReloadResponse>> {
    let config = state
        .config
        .reload()
        .map_err(|err| crate::error::AppError::new(crate::error::ErrorKind::ConfigInvalid, err.to_string()))?;
    state.orchestrator.reload_config().await;
    Ok(Json(ReloadResponse {
        reloaded: true,
        meter_count: config.meters.len(),
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/config/meters", get(list_meters))
        .route("/config/pricing", get(get_pricing))
        .route("/config/reload", post(reload_config))
}
