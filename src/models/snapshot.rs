use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::reading::Reading;

/// A reference to an archived capture (spec.md §3 Snapshot, §4.6).
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct SnapshotRef {
    pub id: String,
    pub meter_name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip)]
    pub image_path: std::path::PathBuf,
    #[serde(skip)]
    pub sidecar_path: std::path::PathBuf,
}

/// Sidecar JSON mirroring the Reading plus capture metadata (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct SnapshotSidecar {
    #[serde(flatten)]
    pub reading: Reading,
    pub image_size: u64,
    pub image_hash_sha256: String,
    pub camera_endpoint: String,
}
