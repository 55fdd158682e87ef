use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    /// Simple/numeric-confidence thresholds from spec.md §4.4.
    pub fn from_numeric(value: f64) -> Self {
        if value >= 0.8 {
            Confidence::High
        } else if value >= 0.5 {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }

    pub fn downgrade(self) -> Self {
        match self {
            Confidence::High => Confidence::Medium,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ReadingComponents {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digital_int: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dial_fraction: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dial_angle_deg: Option<f64>,
}

/// Immutable validated measurement (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Reading {
    pub meter_name: String,
    pub timestamp: DateTime<Utc>,
    pub total: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components: Option<ReadingComponents>,
    pub confidence: Confidence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_numeric: Option<f64>,
    pub vision_model: String,
    pub vision_provider: String,
    pub prompt_profile: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub snapshot_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reprocessed_from: Option<DateTime<Utc>>,
    /// provenance of the JSON schema the vision model emitted (spec.md §4.4).
    pub format: ReadingFormat,
    #[serde(default)]
    pub schema_version: u32,
    /// Set on the audit-log record when the primary time-series write
    /// failed and the reading was queued for retry (spec.md §4.7).
    #[serde(default)]
    pub ts_write_failed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReadingFormat {
    Detailed,
    Simple,
}

pub const CURRENT_SCHEMA_VERSION: u32 = 1;

impl Reading {
    pub fn tags(&self) -> [(&'static str, String); 4] {
        [
            ("meter", self.meter_name.clone()),
            ("confidence", format!("{:?}", self.confidence).to_lowercase()),
            ("vision_provider", self.vision_provider.clone()),
            ("vision_model", self.vision_model.clone()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_from_numeric_thresholds() {
        assert_eq!(Confidence::from_numeric(0.95), Confidence::High);
        assert_eq!(Confidence::from_numeric(0.8), Confidence::High);
        assert_eq!(Confidence::from_numeric(0.79), Confidence::Medium);
        assert_eq!(Confidence::from_numeric(0.5), Confidence::Medium);
        assert_eq!(Confidence::from_numeric(0.1), Confidence::Low);
    }

    #[test]
    fn downgrade_only_affects_high() {
        assert_eq!(Confidence::High.downgrade(), Confidence::Medium);
        assert_eq!(Confidence::Medium.downgrade(), Confidence::Medium);
        assert_eq!(Confidence::Low.downgrade(), Confidence::Low);
    }
}
