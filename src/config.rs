use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::Deserialize;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::models::Meter;

/// Mirrors spec.md §4.1's `ConfigInvalid{field, reason}` / `IOError`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field}: {reason}")]
    Invalid { field: String, reason: String },
    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ConfigEvent {
    ReloadSucceeded,
    ReloadFailed { reason: String },
}

#[derive(Debug, Deserialize)]
struct MetersFile {
    meters: Vec<Meter>,
}

/// The whole, validated, immutable view of meters + pricing handed out to
/// every other component. Swapped atomically by [`ConfigStore::reload`]
/// (spec.md §4.1, §9 "global mutable config ... replaced by an immutable
/// snapshot").
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub meters: Vec<Meter>,
    /// Opaque pass-through pricing/household tables (spec.md §6); the core
    /// stores and serves this without interpreting it.
    pub pricing: serde_yaml::Value,
}

impl LoadedConfig {
    pub fn meter(&self, name: &str) -> Option<&Meter> {
        self.meters.iter().find(|meter| meter.name == name)
    }

    pub fn enabled_meters(&self) -> impl Iterator<Item = &Meter> {
        self.meters.iter().filter(|meter| meter.enabled)
    }
}

/// Loads, validates, and hot-reloads the meter/pricing config files
/// (spec.md §4.1). Readers get a lock-free-ish clone of an `Arc` snapshot;
/// a failed reload keeps serving the previous snapshot and broadcasts the
/// error on an event channel rather than ever serving a partially-loaded
/// config.
pub struct ConfigStore {
    meters_path: PathBuf,
    pricing_path: PathBuf,
    current: RwLock<Arc<LoadedConfig>>,
    events: broadcast::Sender<ConfigEvent>,
}

impl ConfigStore {
    pub fn load(meters_path: PathBuf, pricing_path: PathBuf) -> Result<Self, ConfigError> {
        let config = load_from_disk(&meters_path, &pricing_path)?;
        let (events, _rx) = broadcast::channel(16);
        Ok(Self {
            meters_path,
            pricing_path,
            current: RwLock::new(Arc::new(config)),
            events,
        })
    }

    pub fn current(&self) -> Arc<LoadedConfig> {
        self.current.read().expect("config lock poisoned").clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfigEvent> {
        self.events.subscribe()
    }

    /// Re-parses both files from disk. On success, swaps the snapshot
    /// atomically and returns it; on failure, the previous snapshot keeps
    /// serving and the error is both returned to the caller and broadcast
    /// on the event channel (spec.md §4.1).
    pub fn reload(&self) -> Result<Arc<LoadedConfig>, ConfigError> {
        match load_from_disk(&self.meters_path, &self.pricing_path) {
            Ok(config) => {
                let config = Arc::new(config);
                *self.current.write().expect("config lock poisoned") = config.clone();
                let _ = self.events.send(ConfigEvent::ReloadSucceeded);
                Ok(config)
            }
            Err(err) => {
                let _ = self.events.send(ConfigEvent::ReloadFailed {
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }
}

fn load_from_disk(meters_path: &Path, pricing_path: &Path) -> Result<LoadedConfig, ConfigError> {
    let meters_raw = read_file(meters_path)?;
    let meters_raw = interpolate_env(&meters_raw)?;
    let meters_file: MetersFile = serde_yaml::from_str(&meters_raw)
        .map_err(|err| ConfigError::invalid("meters", err.to_string()))?;

    let mut seen_names = HashSet::new();
    for meter in &meters_file.meters {
        meter
            .validate()
            .map_err(|reason| ConfigError::invalid(meter.name.clone(), reason))?;
        if !seen_names.insert(meter.name.clone()) {
            return Err(ConfigError::invalid(
                meter.name.clone(),
                "duplicate meter name",
            ));
        }
    }

    let pricing_raw = read_file(pricing_path)?;
    let pricing_raw = interpolate_env(&pricing_raw)?;
    let pricing: serde_yaml::Value = serde_yaml::from_str(&pricing_raw)
        .map_err(|err| ConfigError::invalid("pricing", err.to_string()))?;

    Ok(LoadedConfig {
        meters: meters_file.meters,
        pricing,
    })
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Substitutes `${VAR}` occurrences with the named environment variable,
/// failing the load if any referenced variable is unset (spec.md §4.1,
/// §6 "unresolved required-secret vars fail load").
fn interpolate_env(text: &str) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| {
            ConfigError::invalid("<config>", "unterminated ${...} interpolation")
        })?;
        let var_name = &after[..end];
        let value = std::env::var(var_name).map_err(|_| {
            ConfigError::invalid(
                var_name.to_string(),
                "referenced environment variable is not set",
            )
        })?;
        out.push_str(&value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Ambient runtime settings, env-var driven exactly like the teacher's
/// `CoreConfig::from_env`: storage paths, the time-series connection, the
/// HTTP listen address, log level, and per-provider vision API keys
/// (spec.md §6).
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub storage_root: PathBuf,
    pub database_url: String,
    /// Accepted per spec.md §6 for forward compatibility with a
    /// token-authenticated time-series backend; the current sqlx/Postgres
    /// backend does not consume it.
    pub timeseries_token: Option<String>,
    pub http_listen_addr: String,
    pub log_level: String,
    pub gemini_api_key: Option<String>,
    pub claude_api_key: Option<String>,
    pub snapshot_max_age_days: Option<i64>,
    pub snapshot_max_count: Option<usize>,
    pub snapshot_prune_interval_seconds: u64,
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let storage_root = env_path("STORAGE_ROOT", "./storage")?;
        let database_url = env_optional_string("TIMESERIES_URL")
            .unwrap_or_else(|| "postgresql://postgres@localhost/meter_monitor".to_string());
        let timeseries_token = env_optional_string("TIMESERIES_TOKEN");
        let http_listen_addr = normalize_listen_addr(
            &env_optional_string("HTTP_LISTEN_ADDR").unwrap_or_else(|| ":2500".to_string()),
        );
        let log_level = env_optional_string("LOG_LEVEL").unwrap_or_else(|| "info".to_string());
        let gemini_api_key = env_optional_string("GEMINI_API_KEY");
        let claude_api_key = env_optional_string("CLAUDE_API_KEY");
        let snapshot_max_age_days = std::env::var("SNAPSHOT_MAX_AGE_DAYS")
            .ok()
            .and_then(|value| value.trim().parse::<i64>().ok());
        let snapshot_max_count = std::env::var("SNAPSHOT_MAX_COUNT")
            .ok()
            .and_then(|value| value.trim().parse::<usize>().ok());
        let snapshot_prune_interval_seconds =
            env_u64("SNAPSHOT_PRUNE_INTERVAL_SECONDS", 3600);

        let storage_root = validate_and_canonicalize_path(storage_root, None, "STORAGE_ROOT")?;

        Ok(Self {
            storage_root,
            database_url,
            timeseries_token,
            http_listen_addr,
            log_level,
            gemini_api_key,
            claude_api_key,
            snapshot_max_age_days,
            snapshot_max_count,
            snapshot_prune_interval_seconds,
        })
    }
}

fn normalize_listen_addr(raw: &str) -> String {
    if let Some(port) = raw.strip_prefix(':') {
        format!("0.0.0.0:{port}")
    } else {
        raw.to_string()
    }
}

fn env_optional_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_path(key: &str, default: &str) -> Result<PathBuf, ConfigError> {
    let value = env_optional_string(key).unwrap_or_else(|| default.to_string());
    if value.is_empty() {
        return Err(ConfigError::invalid(key, "resolved to an empty path"));
    }
    Ok(PathBuf::from(value))
}

/// Ported from the teacher's `config.rs::validate_and_canonicalize_path`:
/// rejects relative/parent-escaping paths and (when a base is given)
/// requires the canonical path to stay under it, following symlinks.
fn validate_and_canonicalize_path(
    path: PathBuf,
    base: Option<&Path>,
    label: &str,
) -> Result<PathBuf, ConfigError> {
    std::fs::create_dir_all(&path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    for component in path.components() {
        if matches!(component, Component::ParentDir) {
            return Err(ConfigError::invalid(
                label,
                "must not contain '..' segments",
            ));
        }
    }
    let canonical = path.canonicalize().map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    if let Some(base) = base {
        let base = base.canonicalize().map_err(|source| ConfigError::Io {
            path: base.display().to_string(),
            source,
        })?;
        if !canonical.starts_with(&base) {
            return Err(ConfigError::invalid(
                label,
                format!("must reside under {}", base.display()),
            ));
        }
    }
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    const METERS_YAML: &str = r#"
meters:
  - name: water_main
    type: water
    unit: "m3"
    enabled: true
    reading_interval_seconds: 600
    max_change_per_reading: 10.0
    camera:
      endpoint_url: "http://${TEST_CAM_HOST}/mjpeg"
      endpoint_kind: mjpeg
      auth: {kind: basic, user: "${TEST_CAM_USER}", pass: "${TEST_CAM_PASS}"}
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

    #[test]
    fn loads_and_interpolates_env_vars() {
        std::env::set_var("TEST_CAM_HOST", "192.168.1.50");
        std::env::set_var("TEST_CAM_USER", "admin");
        std::env::set_var("TEST_CAM_PASS", "secret");

        let dir = tempfile::tempdir().unwrap();
        let meters_path = write_tmp(dir.path(), "meters.yaml", METERS_YAML);
        let pricing_path = write_tmp(dir.path(), "pricing.yaml", PRICING_YAML);

        let store = ConfigStore::load(meters_path, pricing_path).expect("load");
        let config = store.current();
        assert_eq!(config.meters.len(), 1);
        assert_eq!(
            config.meters[0].camera.endpoint_url,
            "http://192.168.1.50/mjpeg"
        );
    }

    #[test]
    fn fails_load_when_required_env_var_is_unset() {
        std::env::remove_var("TEST_CAM_HOST_MISSING");
        let dir = tempfile::tempdir().unwrap();
        let meters_path = write_tmp(
            dir.path(),
            "meters.yaml",
            &METERS_YAML.replace("TEST_CAM_HOST", "TEST_CAM_HOST_MISSING"),
        );
        let pricing_path = write_tmp(dir.path(), "pricing.yaml", PRICING_YAML);

        let err = ConfigStore::load(meters_path, pricing_path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn rejects_duplicate_meter_names() {
        std::env::set_var("TEST_CAM_HOST", "192.168.1.50");
        std::env::set_var("TEST_CAM_USER", "admin");
        std::env::set_var("TEST_CAM_PASS", "secret");

        let dir = tempfile::tempdir().unwrap();
        let duplicated = format!("{METERS_YAML}\n{}", METERS_YAML.replace("meters:\n", ""));
        let meters_path = write_tmp(dir.path(), "meters.yaml", &duplicated);
        let pricing_path = write_tmp(dir.path(), "pricing.yaml", PRICING_YAML);

        let err = ConfigStore::load(meters_path, pricing_path).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn reload_keeps_previous_snapshot_on_parse_failure() {
        std::env::set_var("TEST_CAM_HOST", "192.168.1.50");
        std::env::set_var("TEST_CAM_USER", "admin");
        std::env::set_var("TEST_CAM_PASS", "secret");

        let dir = tempfile::tempdir().unwrap();
        let meters_path = write_tmp(dir.path(), "meters.yaml", METERS_YAML);
        let pricing_path = write_tmp(dir.path(), "pricing.yaml", PRICING_YAML);
        let store = ConfigStore::load(meters_path.clone(), pricing_path).expect("load");

        write_tmp(dir.path(), "meters.yaml", "not: [valid, meters");
        let result = store.reload();
        assert!(result.is_err());
        assert_eq!(store.current().meters.len(), 1);
    }

    #[test]
    fn normalizes_colon_prefixed_listen_addr() {
        assert_eq!(normalize_listen_addr(":2500"), "0.0.0.0:2500");
        assert_eq!(normalize_listen_addr("127.0.0.1:9000"), "127.0.0.1:9000");
    }
}
