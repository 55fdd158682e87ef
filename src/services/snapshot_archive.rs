use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::task;

use crate::ids::{sha256_hex, snapshot_id};
use crate::models::{Reading, SnapshotRef, SnapshotSidecar};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to persist temp file: {0}")]
    Persist(String),
    #[error("sidecar json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("snapshot '{0}' not found")]
    NotFound(String),
}

/// Retention policy applied by [`SnapshotArchive::prune`] (spec.md §4.6).
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub max_age: Option<chrono::Duration>,
    pub max_count: Option<usize>,
}

#[derive(Clone)]
pub struct SnapshotArchive {
    root: PathBuf,
}

impl SnapshotArchive {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn meter_dir(&self, meter_name: &str) -> PathBuf {
        self.root.join(meter_name)
    }

    fn image_path(&self, meter_name: &str, id: &str) -> PathBuf {
        self.meter_dir(meter_name).join(format!("{id}.jpg"))
    }

    fn sidecar_path(&self, meter_name: &str, id: &str) -> PathBuf {
        self.meter_dir(meter_name).join(format!("{id}.json"))
    }

    /// Writes the image and its sidecar atomically: write-to-temp, fsync,
    /// rename (grounded on `services/analysis/lake.rs::write_manifest`'s
    /// `NamedTempFile::new_in` + `persist` pattern).
    pub fn put(
        &self,
        meter_name: &str,
        camera_endpoint: &str,
        timestamp: DateTime<Utc>,
        image_bytes: &[u8],
        reading: Reading,
    ) -> Result<(SnapshotRef, SnapshotSidecar), SnapshotError> {
        let id = snapshot_id(meter_name, timestamp);
        let dir = self.meter_dir(meter_name);
        std::fs::create_dir_all(&dir)?;

        let image_path = self.image_path(meter_name, &id);
        let sidecar_path = self.sidecar_path(meter_name, &id);

        atomic_write(&dir, &image_path, image_bytes)?;

        let sidecar = SnapshotSidecar {
            reading,
            image_size: image_bytes.len() as u64,
            image_hash_sha256: sha256_hex(image_bytes),
            camera_endpoint: camera_endpoint.to_string(),
        };
        let sidecar_bytes = serde_json::to_vec_pretty(&sidecar)?;
        atomic_write(&dir, &sidecar_path, &sidecar_bytes)?;

        Ok((
            SnapshotRef {
                id,
                meter_name: meter_name.to_string(),
                timestamp,
                image_path,
                sidecar_path,
            },
            sidecar,
        ))
    }

    pub async fn get_image(&self, meter_name: &str, id: &str) -> Result<Vec<u8>, SnapshotError> {
        let path = self.image_path(meter_name, id);
        task::spawn_blocking(move || std::fs::read(&path))
            .await
            .map_err(|err| SnapshotError::Io(std::io::Error::other(err)))?
            .map_err(|_| SnapshotError::NotFound(id.to_string()))
    }

    pub async fn get_sidecar(
        &self,
        meter_name: &str,
        id: &str,
    ) -> Result<SnapshotSidecar, SnapshotError> {
        let path = self.sidecar_path(meter_name, id);
        let bytes = task::spawn_blocking(move || std::fs::read(&path))
            .await
            .map_err(|err| SnapshotError::Io(std::io::Error::other(err)))?
            .map_err(|_| SnapshotError::NotFound(id.to_string()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Lists snapshot ids for a meter, newest first.
    pub fn list(&self, meter_name: &str) -> Result<Vec<String>, SnapshotError> {
        let dir = self.meter_dir(meter_name);
        if !dir.exists() {
            return Ok(vec![]);
        }
        let mut ids: Vec<String> = std::fs::read_dir(&dir)?
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().and_then(|ext| ext.to_str()) == Some("jpg") {
                    path.file_stem()
                        .and_then(|stem| stem.to_str())
                        .map(str::to_string)
                } else {
                    None
                }
            })
            .collect();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        Ok(ids)
    }

    /// Removes leftover `.tmp*` files from a previous crash mid-write.
    /// Run once at startup, mirroring the orphan-cleanup `fs::remove_file`
    /// sweeps the teacher runs over its analysis lake's staging directories.
    pub fn clean_orphaned_temp_files(&self) -> Result<usize, SnapshotError> {
        if !self.root.exists() {
            return Ok(0);
        }
        let mut removed = 0usize;
        for meter_dir in std::fs::read_dir(&self.root)? {
            let meter_dir = meter_dir?.path();
            if !meter_dir.is_dir() {
                continue;
            }
            for entry in std::fs::read_dir(&meter_dir)? {
                let path = entry?.path();
                let is_tmp = path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .map(|name| name.contains(".tmp"))
                    .unwrap_or(false);
                if is_tmp {
                    std::fs::remove_file(&path)?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Prunes a meter's snapshots to the retention policy, oldest first.
    pub fn prune(
        &self,
        meter_name: &str,
        policy: RetentionPolicy,
        now: DateTime<Utc>,
    ) -> Result<usize, SnapshotError> {
        let mut ids = self.list(meter_name)?;
        // `list` returns newest-first; reverse to walk oldest-first for pruning.
        ids.reverse();

        let mut removed = 0usize;
        let total = ids.len();
        for (index, id) in ids.iter().enumerate() {
            let keep_by_count = policy
                .max_count
                .map(|max| total - index <= max)
                .unwrap_or(true);

            let too_old = policy
                .max_age
                .map(|max_age| {
                    parse_timestamp_from_id(id)
                        .map(|ts| now.signed_duration_since(ts) > max_age)
                        .unwrap_or(false)
                })
                .unwrap_or(false);

            if !keep_by_count || too_old {
                let image = self.image_path(meter_name, id);
                let sidecar = self.sidecar_path(meter_name, id);
                let _ = std::fs::remove_file(image);
                let _ = std::fs::remove_file(sidecar);
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn parse_timestamp_from_id(id: &str) -> Option<DateTime<Utc>> {
    let suffix = id.rsplit('_').next()?;
    let naive = chrono::NaiveDateTime::parse_from_str(suffix, "%Y%m%dT%H%M%SZ").ok()?;
    Some(DateTime::from_naive_utc_and_offset(naive, Utc))
}

fn atomic_write(dir: &Path, target: &Path, contents: &[u8]) -> Result<(), SnapshotError> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(target)
        .map_err(|err| SnapshotError::Persist(err.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Confidence, ReadingFormat};
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn sample_reading(ts: DateTime<Utc>) -> Reading {
        Reading {
            meter_name: "water_main".to_string(),
            timestamp: ts,
            total: 100.2,
            components: None,
            confidence: Confidence::High,
            confidence_numeric: None,
            vision_model: "gemini-2.5-flash".to_string(),
            vision_provider: "gemini".to_string(),
            prompt_profile: "detailed_water".to_string(),
            notes: String::new(),
            warnings: vec![],
            snapshot_ref: String::new(),
            raw_response_ref: None,
            reprocessed_from: None,
            format: ReadingFormat::Detailed,
            schema_version: 1,
            ts_write_failed: false,
        }
    }

    #[test]
    fn put_then_list_then_get_roundtrips() {
        let dir = tempdir().unwrap();
        let archive = SnapshotArchive::new(dir.path().to_path_buf());
        let ts = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let (snapshot_ref, sidecar) = archive
            .put("water_main", "http://cam.local/still.jpg", ts, b"fakejpegbytes", sample_reading(ts))
            .unwrap();

        assert_eq!(snapshot_ref.id, "water_main_20260101T120000Z");
        assert_eq!(sidecar.image_size, 13);

        let ids = archive.list("water_main").unwrap();
        assert_eq!(ids, vec!["water_main_20260101T120000Z".to_string()]);
    }

    #[tokio::test]
    async fn get_image_returns_not_found_for_unknown_id() {
        let dir = tempdir().unwrap();
        let archive = SnapshotArchive::new(dir.path().to_path_buf());
        let result = archive.get_image("water_main", "missing").await;
        assert!(matches!(result, Err(SnapshotError::NotFound(_))));
    }

    #[test]
    fn clean_orphaned_temp_files_removes_stray_tmp_files() {
        let dir = tempdir().unwrap();
        let archive = SnapshotArchive::new(dir.path().to_path_buf());
        let meter_dir = dir.path().join("water_main");
        std::fs::create_dir_all(&meter_dir).unwrap();
        std::fs::write(meter_dir.join("leftover.tmpABCDEF"), b"partial").unwrap();

        let removed = archive.clean_orphaned_temp_files().unwrap();
        assert_eq!(removed, 1);
        assert!(!meter_dir.join("leftover.tmpABCDEF").exists());
    }

    #[test]
    fn prune_keeps_only_max_count_newest() {
        let dir = tempdir().unwrap();
        let archive = SnapshotArchive::new(dir.path().to_path_buf());
        for hour in 0..5 {
            let ts = Utc.with_ymd_and_hms(2026, 1, 1, hour, 0, 0).unwrap();
            archive
                .put("water_main", "http://cam.local", ts, b"x", sample_reading(ts))
                .unwrap();
        }

        let removed = archive
            .prune(
                "water_main",
                RetentionPolicy {
                    max_age: None,
                    max_count: Some(2),
                },
                Utc.with_ymd_and_hms(2026, 1, 1, 5, 0, 0).unwrap(),
            )
            .unwrap();

        assert_eq!(removed, 3);
        assert_eq!(archive.list("water_main").unwrap().len(), 2);
    }
}
