use std::collections::VecDeque;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tokio::sync::Mutex;
use tokio::task;
use tokio_util::sync::CancellationToken;

use crate::models::{Confidence, Reading, ReadingComponents, ReadingFormat};

const RETRY_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub enum WriteOutcome {
    Written,
    QueuedForRetry,
}

/// Primary Postgres store + always-on JSONL audit log + in-memory retry
/// queue for primary writes that failed (spec.md §4.7). Grounded on
/// `db.rs`'s lazy `PgPool` and
/// `services/analysis/replication.rs::AnalysisReplicationService`'s
/// `start(self, cancel)` background-loop shape.
pub struct TimeSeriesWriter {
    pool: PgPool,
    audit_log_dir: PathBuf,
    retry_queue: Mutex<VecDeque<Reading>>,
}

impl TimeSeriesWriter {
    pub fn new(pool: PgPool, audit_log_dir: PathBuf) -> Self {
        Self {
            pool,
            audit_log_dir,
            retry_queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Writes a reading. The primary store is attempted first so the audit
    /// record can carry an accurate `ts_write_failed` flag (spec.md §4.7);
    /// the JSONL audit log is still appended unconditionally regardless of
    /// the primary outcome — it never drops the reading.
    pub async fn write(&self, reading: &Reading) -> WriteOutcome {
        let (outcome, audited) = match self.insert_primary(reading).await {
            Ok(()) => (WriteOutcome::Written, reading.clone()),
            Err(err) => {
                tracing::warn!(error = %err, meter = %reading.meter_name, "primary time-series write failed, queuing retry");
                let mut failed = reading.clone();
                failed.ts_write_failed = true;
                self.retry_queue.lock().await.push_back(failed.clone());
                (WriteOutcome::QueuedForRetry, failed)
            }
        };

        if let Err(err) = self.append_audit_log(&audited).await {
            tracing::error!(error = %err, meter = %reading.meter_name, "failed to append time-series audit log");
        }

        outcome
    }

    async fn insert_primary(&self, reading: &Reading) -> Result<(), sqlx::Error> {
        let components = reading.components.unwrap_or_default();
        sqlx::query(
            "INSERT INTO meter_readings \
             (meter_name, ts, total, digital_int, dial_fraction, dial_angle_deg, \
              confidence, confidence_numeric, vision_provider, vision_model, \
              prompt_profile, notes, warnings, snapshot_ref, raw_response_ref, \
              reprocessed_from, format, schema_version) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18) \
             ON CONFLICT (meter_name, ts) DO NOTHING",
        )
        .bind(&reading.meter_name)
        .bind(reading.timestamp)
        .bind(reading.total)
        .bind(components.digital_int)
        .bind(components.dial_fraction)
        .bind(components.dial_angle_deg)
        .bind(confidence_to_str(reading.confidence))
        .bind(reading.confidence_numeric)
        .bind(&reading.vision_provider)
        .bind(&reading.vision_model)
        .bind(&reading.prompt_profile)
        .bind(&reading.notes)
        .bind(serde_json::to_value(&reading.warnings).unwrap_or(serde_json::Value::Null))
        .bind(&reading.snapshot_ref)
        .bind(&reading.raw_response_ref)
        .bind(reading.reprocessed_from)
        .bind(format_to_str(reading.format))
        .bind(reading.schema_version as i32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_audit_log(&self, reading: &Reading) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.audit_log_dir)?;
        let path = self
            .audit_log_dir
            .join(format!("{}_readings.jsonl", reading.meter_name));
        let mut line = serde_json::to_string(reading)
            .map_err(std::io::Error::other)?;
        line.push('\n');

        task::spawn_blocking(move || -> std::io::Result<()> {
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            file.write_all(line.as_bytes())?;
            file.sync_data()
        })
        .await
        .map_err(std::io::Error::other)?
    }

    /// Spawns the background loop that replays queued writes against the
    /// primary store until it succeeds.
    pub fn start_retry_loop(self: Arc<Self>, cancel: CancellationToken) {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(RETRY_INTERVAL) => {}
                }
                self.drain_retry_queue().await;
            }
        });
    }

    async fn drain_retry_queue(&self) {
        let pending: Vec<Reading> = {
            let mut queue = self.retry_queue.lock().await;
            queue.drain(..).collect()
        };
        if pending.is_empty() {
            return;
        }
        tracing::info!(count = pending.len(), "retrying queued time-series writes");
        for reading in pending {
            if let Err(err) = self.insert_primary(&reading).await {
                tracing::warn!(error = %err, meter = %reading.meter_name, "retry write failed, re-queuing");
                self.retry_queue.lock().await.push_back(reading);
            }
        }
    }

    pub async fn query_latest(&self, meter_name: &str) -> Result<Option<Reading>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT * FROM meter_readings WHERE meter_name = $1 ORDER BY ts DESC LIMIT 1",
        )
        .bind(meter_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| row_to_reading(&row)))
    }

    pub async fn query_range(
        &self,
        meter_name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Reading>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT * FROM meter_readings WHERE meter_name = $1 AND ts >= $2 AND ts < $3 \
             ORDER BY ts ASC",
        )
        .bind(meter_name)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_reading).collect())
    }
}

fn confidence_to_str(confidence: Confidence) -> &'static str {
    match confidence {
        Confidence::Low => "low",
        Confidence::Medium => "medium",
        Confidence::High => "high",
    }
}

fn format_to_str(format: ReadingFormat) -> &'static str {
    match format {
        ReadingFormat::Detailed => "detailed",
        ReadingFormat::Simple => "simple",
    }
}

fn row_to_reading(row: &sqlx::postgres::PgRow) -> Reading {
    let digital_int: Option<i64> = row.try_get("digital_int").ok();
    let dial_fraction: Option<f64> = row.try_get("dial_fraction").ok();
    let dial_angle_deg: Option<f64> = row.try_get("dial_angle_deg").ok();
    let components = if digital_int.is_some() || dial_fraction.is_some() || dial_angle_deg.is_some() {
        Some(ReadingComponents {
            digital_int,
            dial_fraction,
            dial_angle_deg,
        })
    } else {
        None
    };

    let confidence_str: String = row.try_get("confidence").unwrap_or_default();
    let confidence = match confidence_str.as_str() {
        "high" => Confidence::High,
        "medium" => Confidence::Medium,
        _ => Confidence::Low,
    };

    let format_str: String = row.try_get("format").unwrap_or_default();
    let format = match format_str.as_str() {
        "simple" => ReadingFormat::Simple,
        _ => ReadingFormat::Detailed,
    };

    let warnings: serde_json::Value = row.try_get("warnings").unwrap_or(serde_json::Value::Null);
    let warnings: Vec<String> = serde_json::from_value(warnings).unwrap_or_default();

    Reading {
        meter_name: row.try_get("meter_name").unwrap_or_default(),
        timestamp: row.try_get("ts").unwrap_or_else(|_| Utc::now()),
        total: row.try_get("total").unwrap_or_default(),
        components,
        confidence,
        confidence_numeric: row.try_get("confidence_numeric").ok(),
        vision_model: row.try_get("vision_model").unwrap_or_default(),
        vision_provider: row.try_get("vision_provider").unwrap_or_default(),
        prompt_profile: row.try_get("prompt_profile").unwrap_or_default(),
        notes: row.try_get("notes").unwrap_or_default(),
        warnings,
        snapshot_ref: row.try_get("snapshot_ref").unwrap_or_default(),
        raw_response_ref: row.try_get("raw_response_ref").ok(),
        reprocessed_from: row.try_get("reprocessed_from").ok(),
        format,
        schema_version: row
            .try_get::<i32, _>("schema_version")
            .map(|value| value as u32)
            .unwrap_or(1),
        ts_write_failed: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_roundtrips_through_its_string_encoding() {
        for confidence in [Confidence::Low, Confidence::Medium, Confidence::High] {
            let encoded = confidence_to_str(confidence);
            let decoded = match encoded {
                "high" => Confidence::High,
                "medium" => Confidence::Medium,
                _ => Confidence::Low,
            };
            assert_eq!(decoded, confidence);
        }
    }

    #[test]
    fn format_roundtrips_through_its_string_encoding() {
        assert_eq!(format_to_str(ReadingFormat::Detailed), "detailed");
        assert_eq!(format_to_str(ReadingFormat::Simple), "simple");
    }
}
