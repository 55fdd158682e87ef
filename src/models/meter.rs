use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MeterType {
    Water,
    Electric,
    Gas,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MeterKind {
    DigitalOnly,
    DigitalPlusDial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    Still,
    Mjpeg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DialOrientation {
    Top,
    Right,
    Bottom,
    Left,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthConfig {
    None,
    Basic { user: String, pass: String },
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig::None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct CameraConfig {
    pub endpoint_url: String,
    pub endpoint_kind: EndpointKind,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub rotation_deg: u16,
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl CameraConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !matches!(self.rotation_deg, 0 | 90 | 180 | 270) {
            return Err(format!(
                "rotation_deg must be one of 0, 90, 180, 270 (got {})",
                self.rotation_deg
            ));
        }
        if self.timeout_ms == 0 {
            return Err("timeout_ms must be positive".to_string());
        }
        url::Url::parse(&self.endpoint_url)
            .map_err(|err| format!("invalid endpoint_url: {err}"))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct VisionTarget {
    pub provider: String,
    pub model: String,
    pub prompt_profile: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct VisionConfig {
    pub primary: VisionTarget,
    #[serde(default)]
    pub fallbacks: Vec<VisionTarget>,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Meter {
    pub name: String,
    #[serde(rename = "type")]
    pub meter_type: MeterType,
    pub unit: String,
    #[serde(default)]
    pub location: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub camera: CameraConfig,
    pub reading_interval_seconds: u64,
    pub max_change_per_reading: f64,
    pub vision: VisionConfig,
    pub meter_kind: MeterKind,
    #[serde(default)]
    pub dial_full_revolution_units: Option<f64>,
    #[serde(default)]
    pub dial_orientation: Option<DialOrientation>,
}

fn default_true() -> bool {
    true
}

impl Meter {
    /// Per spec.md §4.1: "Rejects missing required fields; rejects
    /// `reading_interval_seconds < 30`; rejects duplicate meter names"
    /// (duplicate-name checking happens at the ConfigStore level, across
    /// the whole meter list).
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("meter name must not be empty".to_string());
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(format!(
                "meter name '{}' must be identifier-safe (alphanumeric, '_', '-')",
                self.name
            ));
        }
        if self.reading_interval_seconds < 30 {
            return Err(format!(
                "reading_interval_seconds must be >= 30 (got {})",
                self.reading_interval_seconds
            ));
        }
        if self.max_change_per_reading <= 0.0 {
            return Err("max_change_per_reading must be positive".to_string());
        }
        self.camera.validate()?;
        if self.meter_kind == MeterKind::DigitalPlusDial {
            let revolution = self.dial_full_revolution_units.ok_or_else(|| {
                "dial_full_revolution_units is required for digital_plus_dial meters".to_string()
            })?;
            if revolution <= 0.0 {
                return Err("dial_full_revolution_units must be positive".to_string());
            }
            if self.dial_orientation.is_none() {
                return Err(
                    "dial_orientation is required for digital_plus_dial meters".to_string(),
                );
            }
        }
        Ok(())
    }
}
