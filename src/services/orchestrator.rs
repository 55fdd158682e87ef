use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::config::ConfigStore;
use crate::models::{Meter, Reading};
use crate::services::camera_client::CameraClient;
use crate::services::meter_monitor::{MeterMonitor, MeterStatus, MonitorError};
use crate::services::snapshot_archive::SnapshotArchive;
use crate::services::timeseries_writer::TimeSeriesWriter;
use crate::services::vision::VisionClient;

struct MonitorHandle {
    monitor: Arc<MeterMonitor>,
    cancel: CancellationToken,
    camera_endpoint: String,
    change_key: String,
    reading_interval_seconds: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("unknown meter")]
    UnknownMeter,
    #[error(transparent)]
    Failed(#[from] MonitorError),
}

/// Owns one [`MeterMonitor`] per enabled meter (spec.md §4.9). Holds the
/// only strong reference to each monitor; monitors never hold a
/// back-reference to the orchestrator (spec.md §9 avoids the cyclic
/// "Orchestrator <-> MeterMonitor" reference the source exhibited by
/// having monitors report status passively instead).
pub struct Orchestrator {
    config: Arc<ConfigStore>,
    camera_client: Arc<CameraClient>,
    vision_client: Arc<VisionClient>,
    archive: Arc<SnapshotArchive>,
    writer: Arc<TimeSeriesWriter>,
    monitors: tokio::sync::RwLock<HashMap<String, MonitorHandle>>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<ConfigStore>,
        camera_client: Arc<CameraClient>,
        vision_client: Arc<VisionClient>,
        archive: Arc<SnapshotArchive>,
        writer: Arc<TimeSeriesWriter>,
    ) -> Self {
        Self {
            config,
            camera_client,
            vision_client,
            archive,
            writer,
            monitors: tokio::sync::RwLock::new(HashMap::new()),
        }
    }

    /// Instantiates one monitor per enabled meter in the current config
    /// snapshot and starts each running concurrently.
    pub async fn start(&self) {
        let config = self.config.current();
        let mut monitors = self.monitors.write().await;
        for meter in config.enabled_meters() {
            let handle = self.spawn_monitor(meter.clone());
            monitors.insert(meter.name.clone(), handle);
        }
    }

    fn spawn_monitor(&self, meter: Meter) -> MonitorHandle {
        let cancel = CancellationToken::new();
        let reading_interval_seconds = meter.reading_interval_seconds;
        let camera_endpoint = meter.camera.endpoint_url.clone();
        let change_key = change_detection_key(&meter);
        let monitor = Arc::new(MeterMonitor::new(
            meter,
            self.camera_client.clone(),
            self.vision_client.clone(),
            self.archive.clone(),
            self.writer.clone(),
            Utc::now(),
        ));
        monitor.clone().start(cancel.clone());
        MonitorHandle {
            monitor,
            cancel,
            camera_endpoint,
            change_key,
            reading_interval_seconds,
        }
    }

    pub async fn status(&self) -> Vec<MeterStatus> {
        let monitors = self.monitors.read().await;
        let mut statuses = Vec::with_capacity(monitors.len());
        for handle in monitors.values() {
            statuses.push(handle.monitor.status().await);
        }
        statuses.sort_by(|a, b| a.meter_name.cmp(&b.meter_name));
        statuses
    }

    pub async fn monitor(&self, meter_name: &str) -> Option<Arc<MeterMonitor>> {
        self.monitors
            .read()
            .await
            .get(meter_name)
            .map(|handle| handle.monitor.clone())
    }

    pub async fn capture_once(&self, meter_name: &str) -> Result<Reading, CaptureError> {
        let monitor = self
            .monitor(meter_name)
            .await
            .ok_or(CaptureError::UnknownMeter)?;
        monitor.capture_once().await.map_err(CaptureError::Failed)
    }

    pub async fn reprocess(
        &self,
        meter_name: &str,
        snapshot_id: &str,
    ) -> Result<Reading, CaptureError> {
        let monitor = self
            .monitor(meter_name)
            .await
            .ok_or(CaptureError::UnknownMeter)?;
        monitor
            .reprocess(snapshot_id)
            .await
            .map_err(CaptureError::Failed)
    }

    /// Diffs the freshly-reloaded config against the running monitor set:
    /// starts monitors for newly-enabled meters, stops monitors for
    /// newly-disabled/removed meters, restarts monitors whose camera or
    /// interval changed, and leaves unchanged monitors running untouched
    /// (spec.md §4.9).
    pub async fn reload_config(&self) {
        let config = self.config.current();
        let mut monitors = self.monitors.write().await;

        let enabled: HashMap<&str, &Meter> = config
            .enabled_meters()
            .map(|meter| (meter.name.as_str(), meter))
            .collect();

        let removed: Vec<String> = monitors
            .keys()
            .filter(|name| !enabled.contains_key(name.as_str()))
            .cloned()
            .collect();
        for name in removed {
            if let Some(handle) = monitors.remove(&name) {
                handle.cancel.cancel();
            }
        }

        for (name, meter) in enabled {
            match monitors.get(name) {
                None => {
                    let handle = self.spawn_monitor(meter.clone());
                    monitors.insert(name.to_string(), handle);
                }
                Some(existing) => {
                    let changed = existing.camera_endpoint != meter.camera.endpoint_url
                        || existing.reading_interval_seconds != meter.reading_interval_seconds
                        || existing.change_key != change_detection_key(meter);
                    if changed {
                        existing.cancel.cancel();
                        let handle = self.spawn_monitor(meter.clone());
                        monitors.insert(name.to_string(), handle);
                    } else {
                        existing.monitor.update_meter(meter.clone()).await;
                    }
                }
            }
        }
    }

    /// Signals every monitor to stop, waits up to `grace_deadline` for
    /// in-flight cycles to finish, then returns regardless (spec.md §4.9:
    /// "forcibly abandons remaining monitors; their partial state is safe
    /// because Persisting is atomic").
    pub async fn stop(&self, grace_deadline: Duration) {
        let monitors = self.monitors.read().await;
        for handle in monitors.values() {
            handle.cancel.cancel();
        }
        drop(monitors);
        tokio::time::sleep(grace_deadline).await;
    }
}

fn change_detection_key(meter: &Meter) -> String {
    format!(
        "{:?}|{}|{:?}",
        meter.camera.endpoint_kind, meter.camera.rotation_deg, meter.camera.auth
    )
}
