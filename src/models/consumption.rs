use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Derived, never stored (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ConsumptionBucket {
    pub meter_name: String,
    pub bucket_start: DateTime<Utc>,
    pub bucket_end: DateTime<Utc>,
    pub delta_units: f64,
}
