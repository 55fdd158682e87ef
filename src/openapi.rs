use utoipa::OpenApi;

use crate::error::ErrorKind;
use crate::models::{
    AuthConfig, CameraConfig, Confidence, ConsumptionBucket, DialOrientation, EndpointKind, Meter,
    MeterKind, MeterType, Reading, ReadingComponents, ReadingFormat, SnapshotRef, SnapshotSidecar,
    VisionConfig, VisionTarget,
};
use crate::routes::capture::NoChangeResponse;
use crate::routes::config_routes::{MeterSummary, ReloadResponse};
use crate::routes::health::HealthResponse;
use crate::routes::snapshots::SnapshotIndexEntry;
use crate::services::meter_monitor::{CycleState, MeterStatus};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::health::healthz_handler,
        crate::routes::config_routes::list_meters,
        crate::routes::config_routes::get_pricing,
        crate::routes::config_routes::reload_config,
        crate::routes::readings::latest_reading,
        crate::routes::readings::history,
        crate::routes::consumption::consumption,
        crate::routes::snapshots::list_snapshots,
        crate::routes::snapshots::snapshot_image,
        crate::routes::snapshots::snapshot_sidecar,
        crate::routes::capture::capture_once,
        crate::routes::capture::reprocess,
        crate::routes::stream::stream_camera,
        crate::routes::status::status,
    ),
    components(schemas(
        HealthResponse,
        MeterSummary,
        ReloadResponse,
        NoChangeResponse,
        SnapshotIndexEntry,
        Meter,
        MeterType,
        MeterKind,
        EndpointKind,
        DialOrientation,
        AuthConfig,
        CameraConfig,
        VisionConfig,
        VisionTarget,
        Reading,
        ReadingComponents,
        ReadingFormat,
        Confidence,
        ConsumptionBucket,
        SnapshotRef,
        SnapshotSidecar,
        MeterStatus,
        CycleState,
        ErrorKind,
    )),
    tags(
        (name = "config", description = "Meter and pricing configuration"),
        (name = "readings", description = "Latest and historical readings"),
        (name = "consumption", description = "Bucketed consumption derived from rolling totals"),
        (name = "snapshots", description = "Archived capture images and metadata"),
        (name = "capture", description = "On-demand capture and reprocessing"),
        (name = "stream", description = "Live camera proxy"),
        (name = "status", description = "Per-meter monitor status"),
    )
)]
pub struct ApiDoc;

/// Used by the `--print-openapi` CLI flag; never served over HTTP since the
/// dashboard this crate backs ships its own bundled client.
pub fn openapi_json() -> serde_json::Value {
    serde_json::to_value(ApiDoc::openapi()).expect("OpenApi document always serializes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_document_serializes() {
        let value = openapi_json();
        assert!(value.get("paths").is_some());
    }
}
