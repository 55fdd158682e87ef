use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{ConfigStore, RuntimeConfig};
use crate::db;
use crate::services::camera_client::CameraClient;
use crate::services::consumption_aggregator::ConsumptionAggregator;
use crate::services::orchestrator::Orchestrator;
use crate::services::snapshot_archive::SnapshotArchive;
use crate::services::timeseries_writer::TimeSeriesWriter;
use crate::services::vision::VisionClient;
use crate::state::AppState;

const METERS_YAML: &str = r#"
meters:
  - name: water_main
    type: water
    unit: "m3"
    enabled: true
    reading_interval_seconds: 600
    max_change_per_reading: 10.0
    camera:
      endpoint_url: "http://camera.local/mjpeg"
      endpoint_kind: mjpeg
      auth: {kind: none}
      timeout_ms: 10000
      rotation_deg: 0
    meter_kind: digital_plus_dial
    dial_full_revolution_units: 0.10
    dial_orientation: top
    vision:
      primary: {provider: gemini, model: "gemini-2.5-flash", prompt_profile: detailed_water}
      fallbacks: [{provider: claude, model: "claude-sonnet-4-5", prompt_profile: detailed_water}]
"#;

const PRICING_YAML: &str = r#"
tiers:
  - name: base
    rate: 0.012
"#;

fn test_runtime(storage_root: PathBuf) -> RuntimeConfig {
    RuntimeConfig {
        storage_root,
        database_url: "postgresql://postgres@localhost/postgres".to_string(),
        timeseries_token: None,
        http_listen_addr: "127.0.0.1:0".to_string(),
        log_level: "info".to_string(),
        gemini_api_key: None,
        claude_api_key: None,
        snapshot_max_age_days: None,
        snapshot_max_count: None,
        snapshot_prune_interval_seconds: 3600,
    }
}

/// Mirrors the teacher's `test_support::test_state` shape: every component
/// wired against a throwaway temp directory and a lazily-connected pool that
/// never actually dials Postgres in unit tests.
pub fn test_state() -> AppState {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let data_root = tempdir.keep();

    let meters_path = data_root.join("meters.yaml");
    let pricing_path = data_root.join("pricing.yaml");
    std::fs::write(&meters_path, METERS_YAML).expect("write meters.yaml");
    std::fs::write(&pricing_path, PRICING_YAML).expect("write pricing.yaml");

    let config = Arc::new(ConfigStore::load(meters_path, pricing_path).expect("load config"));
    let runtime = test_runtime(data_root.join("storage"));
    std::fs::create_dir_all(&runtime.storage_root).expect("create storage root");

    let pool = db::connect_lazy(&runtime.database_url).expect("connect_lazy");
    let http = reqwest::Client::new();

    let camera_client = Arc::new(CameraClient::new(http.clone()));
    let vision_client = Arc::new(VisionClient::new(http.clone(), None, None));
    let archive = Arc::new(SnapshotArchive::new(runtime.storage_root.clone()));
    let writer = Arc::new(TimeSeriesWriter::new(pool.clone(), data_root.join("audit")));
    let orchestrator = Arc::new(Orchestrator::new(
        config.clone(),
        camera_client.clone(),
        vision_client.clone(),
        archive.clone(),
        writer.clone(),
    ));
    let consumption = Arc::new(ConsumptionAggregator::new(writer.clone()));

    AppState {
        runtime,
        config,
        db: pool,
        http,
        camera_client,
        vision_client,
        archive,
        writer,
        orchestrator,
        consumption,
    }
}
