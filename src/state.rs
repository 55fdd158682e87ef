use std::sync::Arc;

use reqwest::Client;
use sqlx::PgPool;

use crate::config::{ConfigStore, RuntimeConfig};
use crate::services::camera_client::CameraClient;
use crate::services::consumption_aggregator::ConsumptionAggregator;
use crate::services::orchestrator::Orchestrator;
use crate::services::snapshot_archive::SnapshotArchive;
use crate::services::timeseries_writer::TimeSeriesWriter;
use crate::services::vision::VisionClient;

/// Shared, cheaply-cloneable handle to every core component, handed to
/// every axum route the way the teacher's `AppState` bundles its
/// `Arc<AuthManager>` / `Arc<MqttPublisher>` / etc (spec.md §2 data flow).
#[derive(Clone)]
pub struct AppState {
    pub runtime: RuntimeConfig,
    pub config: Arc<ConfigStore>,
    pub db: PgPool,
    pub http: Client,
    pub camera_client: Arc<CameraClient>,
    pub vision_client: Arc<VisionClient>,
    pub archive: Arc<SnapshotArchive>,
    pub writer: Arc<TimeSeriesWriter>,
    pub orchestrator: Arc<Orchestrator>,
    pub consumption: Arc<ConsumptionAggregator>,
}
