use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::config::ConfigStore;
use crate::services::snapshot_archive::{RetentionPolicy, SnapshotArchive};

/// Periodically prunes each enabled meter's snapshot archive to its
/// retention policy (spec.md §4.6 "Retention: configurable max-age and
/// max-count per meter"). Grounded on the teacher's
/// `RestoreWorkerService`/`PowerRunwayService` shape: a small
/// `struct { state, interval } impl { fn start(self, cancel) }` background
/// worker spawned once from `main.rs`.
pub struct SnapshotPruneService {
    config: Arc<ConfigStore>,
    archive: Arc<SnapshotArchive>,
    interval: Duration,
    max_age_days: Option<i64>,
    max_count: Option<usize>,
}

impl SnapshotPruneService {
    pub fn new(
        config: Arc<ConfigStore>,
        archive: Arc<SnapshotArchive>,
        interval: Duration,
        max_age_days: Option<i64>,
        max_count: Option<usize>,
    ) -> Self {
        Self {
            config,
            archive,
            interval,
            max_age_days,
            max_count,
        }
    }

    pub fn start(self: Arc<Self>, cancel: CancellationToken) {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.interval) => {}
                }
                self.prune_all();
            }
        });
    }

    fn prune_all(&self) {
        let policy = RetentionPolicy {
            max_age: self.max_age_days.map(chrono::Duration::days),
            max_count: self.max_count,
        };
        if policy.max_age.is_none() && policy.max_count.is_none() {
            return;
        }
        let now = Utc::now();
        for meter in &self.config.current().meters {
            match self.archive.prune(&meter.name, policy, now) {
                Ok(removed) if removed > 0 => {
                    tracing::info!(meter = %meter.name, removed, "pruned snapshot archive");
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(meter = %meter.name, error = %err, "snapshot prune failed");
                }
            }
        }
    }
}
