use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::ids::snapshot_id;
use crate::models::{Confidence, Meter, Reading};
use crate::services::camera_client::{CameraClient, CameraError};
use crate::services::reading_parser::{self, ParseError};
use crate::services::reading_validator::{self, ValidationError};
use crate::services::snapshot_archive::{SnapshotArchive, SnapshotError};
use crate::services::timeseries_writer::TimeSeriesWriter;
use crate::services::vision::{VisionClient, VisionError};
use crate::time::{backoff_duration, delay_until_next_boundary};

const BACKOFF_BASE: Duration = Duration::from_secs(5);
const BACKOFF_CAP: Duration = Duration::from_secs(300);

/// Preserves the originating error's shape across a cycle so HTTP handlers
/// can map it to the right status/kind (spec.md §7), instead of collapsing
/// everything to a string at the point of failure.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("camera: {0}")]
    Camera(#[from] CameraError),
    #[error("vision: {0}")]
    Vision(#[from] VisionError),
    #[error("parse: {0}")]
    Parse(#[from] ParseError),
    #[error("validation: {0}")]
    Validation(#[from] ValidationError),
    #[error("snapshot: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("all vision providers failed: {0}")]
    VisionExhausted(String),
    #[error("cycle exceeded its deadline")]
    CycleTimeout,
    #[error("capture matched the previous reading, no change recorded")]
    DuplicateCapture,
}

impl MonitorError {
    /// Whether this failure should count toward the camera-outage
    /// exponential backoff (spec.md §4.8 step 1, §7). A `CameraError` or a
    /// cycle timeout is "handled as a camera failure (backoff applies)"
    /// per spec.md §5; every other cycle failure happens after the image
    /// was already captured and must not amplify into backoff.
    fn counts_toward_backoff(&self) -> bool {
        matches!(self, MonitorError::Camera(_) | MonitorError::CycleTimeout)
    }
}

const CYCLE_DEADLINE_CAP: Duration = Duration::from_secs(90);

/// Per-meter capture lifecycle (spec.md §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Idle,
    Capturing,
    Reading,
    Validating,
    Persisting,
    Backoff,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct MeterStatus {
    pub meter_name: String,
    pub state: CycleState,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_reading: Option<Reading>,
}

/// Drives one meter through capture -> read -> validate -> persist on a
/// wall-clock-aligned schedule with exponential backoff after failures.
/// Grounded on `services/external_devices.rs::ExternalDeviceService`'s
/// `start(self, cancel)` polling-loop shape, generalized from a single tick
/// per device to a full read pipeline per meter.
pub struct MeterMonitor {
    meter: RwLock<Meter>,
    camera_client: Arc<CameraClient>,
    vision_client: Arc<VisionClient>,
    archive: Arc<SnapshotArchive>,
    writer: Arc<TimeSeriesWriter>,
    status: RwLock<MeterStatus>,
    capture_lock: Mutex<()>,
    epoch: DateTime<Utc>,
}

impl MeterMonitor {
    pub fn new(
        meter: Meter,
        camera_client: Arc<CameraClient>,
        vision_client: Arc<VisionClient>,
        archive: Arc<SnapshotArchive>,
        writer: Arc<TimeSeriesWriter>,
        epoch: DateTime<Utc>,
    ) -> Self {
        let status = MeterStatus {
            meter_name: meter.name.clone(),
            state: CycleState::Idle,
            consecutive_failures: 0,
            last_success: None,
            last_error: None,
            last_reading: None,
        };
        Self {
            meter: RwLock::new(meter),
            camera_client,
            vision_client,
            archive,
            writer,
            status: RwLock::new(status),
            capture_lock: Mutex::new(()),
            epoch,
        }
    }

    pub async fn status(&self) -> MeterStatus {
        self.status.read().await.clone()
    }

    /// Replaces the meter definition in place, used by the orchestrator's
    /// config-reload diff when only the meter's settings changed.
    pub async fn update_meter(&self, meter: Meter) {
        *self.meter.write().await = meter;
    }

    pub fn start(self: Arc<Self>, cancel: CancellationToken) {
        tokio::spawn(async move {
            loop {
                let wait = {
                    let status = self.status.read().await;
                    if status.consecutive_failures > 0 {
                        backoff_duration(status.consecutive_failures, BACKOFF_BASE, BACKOFF_CAP)
                    } else {
                        let interval = Duration::from_secs(self.meter.read().await.reading_interval_seconds);
                        delay_until_next_boundary(self.epoch, interval, Utc::now())
                    }
                };

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }

                if cancel.is_cancelled() {
                    break;
                }

                self.run_guarded_cycle().await;
            }
        });
    }

    /// Manual trigger (`POST /api/capture/:meter`); serialized against the
    /// scheduled loop by `capture_lock` so the two never race on the same
    /// meter.
    pub async fn capture_once(&self) -> Result<Reading, MonitorError> {
        let _guard = self.capture_lock.lock().await;
        self.run_cycle().await
    }

    async fn run_guarded_cycle(&self) {
        let _guard = self.capture_lock.lock().await;
        let _ = self.run_cycle().await;
    }

    async fn run_cycle(&self) -> Result<Reading, MonitorError> {
        let meter = self.meter.read().await.clone();
        let deadline = Duration::from_secs(meter.reading_interval_seconds)
            .saturating_sub(Duration::from_secs(1))
            .min(CYCLE_DEADLINE_CAP);

        let outcome = tokio::time::timeout(deadline, self.run_cycle_inner(&meter)).await;

        match outcome {
            Ok(Ok(reading)) => {
                self.record_success(reading.clone()).await;
                Ok(reading)
            }
            Ok(Err(MonitorError::DuplicateCapture)) => {
                self.set_state(CycleState::Idle).await;
                Err(MonitorError::DuplicateCapture)
            }
            Ok(Err(err)) => {
                if err.counts_toward_backoff() {
                    self.record_failure(&err).await;
                } else {
                    self.record_non_backoff_failure(&err).await;
                }
                Err(err)
            }
            Err(_) => {
                self.record_failure(&MonitorError::CycleTimeout).await;
                Err(MonitorError::CycleTimeout)
            }
        }
    }

    async fn run_cycle_inner(&self, meter: &Meter) -> Result<Reading, MonitorError> {
        self.set_state(CycleState::Capturing).await;
        let image = self.camera_client.fetch(&meter.camera).await?;

        self.set_state(CycleState::Reading).await;
        let targets: Vec<_> = std::iter::once(&meter.vision.primary)
            .chain(meter.vision.fallbacks.iter())
            .collect();
        let last_index = targets.len() - 1;

        let mut last_error: Option<String> = None;
        let mut accepted = None;
        for (index, target) in targets.iter().enumerate() {
            let is_last = index == last_index;
            let raw = match self.vision_client.read(&image.bytes, target).await {
                Ok(raw) => raw,
                Err(err) => {
                    last_error = Some(err.to_string());
                    continue;
                }
            };
            let parsed = match reading_parser::parse(&raw.json_text, meter, &target.prompt_profile) {
                Ok(parsed) => parsed,
                Err(err) => {
                    last_error = Some(err.to_string());
                    continue;
                }
            };
            if parsed.confidence == Confidence::Low && !is_last {
                last_error = Some("low confidence reading, trying fallback".to_string());
                continue;
            }
            accepted = Some((raw, parsed, target.prompt_profile.clone()));
            break;
        }

        let (raw, parsed, prompt_profile) = accepted.ok_or_else(|| {
            MonitorError::VisionExhausted(last_error.unwrap_or_else(|| "all vision providers failed".to_string()))
        })?;

        self.set_state(CycleState::Validating).await;
        let timestamp = Utc::now();
        let mut reading = Reading {
            meter_name: meter.name.clone(),
            timestamp,
            total: parsed.total,
            components: parsed.components,
            confidence: parsed.confidence,
            confidence_numeric: parsed.confidence_numeric,
            vision_model: raw.model,
            vision_provider: raw.provider,
            prompt_profile,
            notes: parsed.notes,
            warnings: vec![],
            snapshot_ref: snapshot_id(&meter.name, timestamp),
            raw_response_ref: None,
            reprocessed_from: None,
            format: parsed.format,
            schema_version: crate::models::reading::CURRENT_SCHEMA_VERSION,
            ts_write_failed: false,
        };

        let previous = self.writer.query_latest(&meter.name).await.ok().flatten();
        match reading_validator::validate(&mut reading, meter, previous.as_ref()) {
            Ok(()) => {}
            Err(ValidationError::DuplicateCapture) => return Err(MonitorError::DuplicateCapture),
            Err(err) => return Err(MonitorError::Validation(err)),
        }

        self.set_state(CycleState::Persisting).await;
        let (snapshot_ref, _) = self.archive.put(
            &meter.name,
            &meter.camera.endpoint_url,
            timestamp,
            &image.bytes,
            reading.clone(),
        )?;
        reading.snapshot_ref = snapshot_ref.id.clone();
        self.writer.write(&reading).await;

        Ok(reading)
    }

    /// Reprocesses a previously archived snapshot through the vision+parse+
    /// validate pipeline without re-capturing from the camera.
    pub async fn reprocess(&self, snapshot_id_value: &str) -> Result<Reading, MonitorError> {
        let _guard = self.capture_lock.lock().await;
        let meter = self.meter.read().await.clone();
        let image_bytes = self.archive.get_image(&meter.name, snapshot_id_value).await?;
        let original = self.archive.get_sidecar(&meter.name, snapshot_id_value).await?;

        self.set_state(CycleState::Reading).await;
        let target = &meter.vision.primary;
        let raw = self.vision_client.read(&image_bytes, target).await?;
        let parsed = reading_parser::parse(&raw.json_text, &meter, &target.prompt_profile)?;

        self.set_state(CycleState::Validating).await;
        let timestamp = Utc::now();
        let mut reading = Reading {
            meter_name: meter.name.clone(),
            timestamp,
            total: parsed.total,
            components: parsed.components,
            confidence: parsed.confidence,
            confidence_numeric: parsed.confidence_numeric,
            vision_model: raw.model,
            vision_provider: raw.provider,
            prompt_profile: target.prompt_profile.clone(),
            notes: parsed.notes,
            warnings: vec![],
            snapshot_ref: snapshot_id_value.to_string(),
            raw_response_ref: None,
            reprocessed_from: Some(original.reading.timestamp),
            format: parsed.format,
            schema_version: crate::models::reading::CURRENT_SCHEMA_VERSION,
            ts_write_failed: false,
        };

        let previous = self.writer.query_latest(&meter.name).await.ok().flatten();
        match reading_validator::validate(&mut reading, &meter, previous.as_ref()) {
            Ok(()) => {}
            Err(ValidationError::DuplicateCapture) => return Err(MonitorError::DuplicateCapture),
            Err(err) => return Err(MonitorError::Validation(err)),
        }

        self.set_state(CycleState::Persisting).await;
        self.writer.write(&reading).await;
        self.set_state(CycleState::Idle).await;
        Ok(reading)
    }

    async fn set_state(&self, state: CycleState) {
        self.status.write().await.state = state;
    }

    async fn record_success(&self, reading: Reading) {
        let mut status = self.status.write().await;
        status.state = CycleState::Idle;
        status.consecutive_failures = 0;
        status.last_success = Some(Utc::now());
        status.last_error = None;
        status.last_reading = Some(reading);
    }

    /// Camera-layer failures (and cycle timeouts, spec.md §5): these count
    /// toward the exponential backoff that paces retries during an outage.
    async fn record_failure(&self, err: &MonitorError) {
        let mut status = self.status.write().await;
        status.state = CycleState::Backoff;
        status.consecutive_failures += 1;
        status.last_error = Some(err.to_string());
    }

    /// Post-capture failures (vision/parse/validation/snapshot, spec.md
    /// §7): the image was already captured, so these do not amplify camera
    /// backoff. The monitor returns to `Idle` and resumes its normal
    /// interval on the next tick.
    async fn record_non_backoff_failure(&self, err: &MonitorError) {
        let mut status = self.status.write().await;
        status.state = CycleState::Idle;
        status.last_error = Some(err.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AuthConfig, CameraConfig, EndpointKind, MeterKind, MeterType, VisionConfig, VisionTarget,
    };
    use crate::services::timeseries_writer::TimeSeriesWriter;
    use std::sync::Arc;

    fn sample_meter() -> Meter {
        Meter {
            name: "water_main".to_string(),
            meter_type: MeterType::Water,
            unit: "m3".to_string(),
            location: String::new(),
            enabled: true,
            camera: CameraConfig {
                endpoint_url: "http://camera.local/still.jpg".to_string(),
                endpoint_kind: EndpointKind::Still,
                auth: AuthConfig::None,
                timeout_ms: 5_000,
                rotation_deg: 0,
            },
            reading_interval_seconds: 600,
            max_change_per_reading: 10.0,
            vision: VisionConfig {
                primary: VisionTarget {
                    provider: "gemini".to_string(),
                    model: "gemini-2.5-flash".to_string(),
                    prompt_profile: "detailed_water".to_string(),
                },
                fallbacks: vec![],
            },
            meter_kind: MeterKind::DigitalOnly,
            dial_full_revolution_units: None,
            dial_orientation: None,
        }
    }

    fn sample_reading() -> Reading {
        Reading {
            meter_name: "water_main".to_string(),
            timestamp: Utc::now(),
            total: 100.0,
            components: None,
            confidence: Confidence::High,
            confidence_numeric: None,
            vision_model: "gemini-2.5-flash".to_string(),
            vision_provider: "gemini".to_string(),
            prompt_profile: "detailed_water".to_string(),
            notes: String::new(),
            warnings: vec![],
            snapshot_ref: "water_main_20260101T120000Z".to_string(),
            raw_response_ref: None,
            reprocessed_from: None,
            format: crate::models::ReadingFormat::Detailed,
            schema_version: crate::models::reading::CURRENT_SCHEMA_VERSION,
            ts_write_failed: false,
        }
    }

    fn test_monitor() -> MeterMonitor {
        let tempdir = tempfile::tempdir().unwrap();
        let pool = crate::db::connect_lazy("postgresql://postgres@localhost/postgres").unwrap();
        MeterMonitor::new(
            sample_meter(),
            Arc::new(CameraClient::new(reqwest::Client::new())),
            Arc::new(VisionClient::new(reqwest::Client::new(), None, None)),
            Arc::new(SnapshotArchive::new(tempdir.path().to_path_buf())),
            Arc::new(TimeSeriesWriter::new(pool, tempdir.path().join("audit"))),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn starts_idle_with_no_failures() {
        let monitor = test_monitor();
        let status = monitor.status().await;
        assert_eq!(status.state, CycleState::Idle);
        assert_eq!(status.consecutive_failures, 0);
        assert!(status.last_success.is_none());
    }

    #[tokio::test]
    async fn record_failure_increments_count_and_enters_backoff() {
        let monitor = test_monitor();
        monitor.record_failure(&MonitorError::CycleTimeout).await;
        let status = monitor.status().await;
        assert_eq!(status.state, CycleState::Backoff);
        assert_eq!(status.consecutive_failures, 1);
        assert!(status.last_error.is_some());
    }

    #[tokio::test]
    async fn record_success_resets_failure_count() {
        let monitor = test_monitor();
        monitor.record_failure(&MonitorError::CycleTimeout).await;
        monitor.record_success(sample_reading()).await;
        let status = monitor.status().await;
        assert_eq!(status.state, CycleState::Idle);
        assert_eq!(status.consecutive_failures, 0);
        assert!(status.last_success.is_some());
        assert!(status.last_error.is_none());
        assert!(status.last_reading.is_some());
    }

    #[tokio::test]
    async fn parse_and_vision_exhaustion_failures_do_not_count_toward_backoff() {
        let monitor = test_monitor();
        monitor
            .record_non_backoff_failure(&MonitorError::VisionExhausted("no provider responded".to_string()))
            .await;
        let status = monitor.status().await;
        assert_eq!(status.state, CycleState::Idle);
        assert_eq!(status.consecutive_failures, 0);
        assert!(status.last_error.is_some());
    }

    #[test]
    fn only_camera_and_timeout_errors_count_toward_backoff() {
        assert!(MonitorError::CycleTimeout.counts_toward_backoff());
        assert!(!MonitorError::VisionExhausted("x".to_string()).counts_toward_backoff());
    }

    #[tokio::test]
    async fn update_meter_replaces_definition_in_place() {
        let monitor = test_monitor();
        let mut updated = sample_meter();
        updated.reading_interval_seconds = 900;
        monitor.update_meter(updated).await;
        assert_eq!(monitor.meter.read().await.reading_interval_seconds, 900);
    }
}
