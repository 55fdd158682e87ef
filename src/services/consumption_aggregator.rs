use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::models::ConsumptionBucket;
use crate::services::timeseries_writer::TimeSeriesWriter;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    meter_name: String,
    t0_ms: i64,
    t1_ms: i64,
    interval_seconds: u64,
}

struct CacheEntry {
    buckets: Vec<ConsumptionBucket>,
    expires_at: std::time::Instant,
}

/// On-demand bucketing of readings into per-interval usage deltas
/// (spec.md §4.11), grounded on the teacher's
/// `services/analysis/bucket_reader.rs` bucketing style. Readings are a
/// rolling counter (cumulative total), so a bucket's consumption is
/// `max(total) - min(total)` within it, clamped to >= 0 and defaulting to
/// 0 for buckets with no readings. Results are cached briefly per meter to
/// cap repeated browser-refresh cost.
pub struct ConsumptionAggregator {
    writer: Arc<TimeSeriesWriter>,
    cache: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl ConsumptionAggregator {
    pub fn new(writer: Arc<TimeSeriesWriter>) -> Self {
        Self {
            writer,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn buckets(
        &self,
        meter_name: &str,
        t0: DateTime<Utc>,
        t1: DateTime<Utc>,
        interval: Duration,
    ) -> Result<Vec<ConsumptionBucket>, sqlx::Error> {
        let interval_seconds = interval.as_secs().max(1);
        let key = CacheKey {
            meter_name: meter_name.to_string(),
            t0_ms: t0.timestamp_millis(),
            t1_ms: t1.timestamp_millis(),
            interval_seconds,
        };

        {
            let cache = self.cache.lock().await;
            if let Some(entry) = cache.get(&key) {
                if entry.expires_at > std::time::Instant::now() {
                    return Ok(entry.buckets.clone());
                }
            }
        }

        let readings = self.writer.query_range(meter_name, t0, t1).await?;
        let buckets = bucketize(meter_name, t0, t1, interval_seconds, &readings);

        let ttl = Duration::from_secs(interval_seconds / 4).min(Duration::from_secs(300));
        let mut cache = self.cache.lock().await;
        cache.insert(
            key,
            CacheEntry {
                buckets: buckets.clone(),
                expires_at: std::time::Instant::now() + ttl.max(Duration::from_secs(1)),
            },
        );
        Ok(buckets)
    }
}

fn bucketize(
    meter_name: &str,
    t0: DateTime<Utc>,
    t1: DateTime<Utc>,
    interval_seconds: u64,
    readings: &[crate::models::Reading],
) -> Vec<ConsumptionBucket> {
    let interval = chrono::Duration::seconds(interval_seconds as i64);
    let mut buckets = Vec::new();
    let mut cursor = t0;
    while cursor < t1 {
        let bucket_end = (cursor + interval).min(t1);
        let totals: Vec<f64> = readings
            .iter()
            .filter(|reading| reading.timestamp >= cursor && reading.timestamp < bucket_end)
            .map(|reading| reading.total)
            .collect();

        let delta_units = if totals.is_empty() {
            0.0
        } else {
            let max = totals.iter().cloned().fold(f64::MIN, f64::max);
            let min = totals.iter().cloned().fold(f64::MAX, f64::min);
            (max - min).max(0.0)
        };

        buckets.push(ConsumptionBucket {
            meter_name: meter_name.to_string(),
            bucket_start: cursor,
            bucket_end,
            delta_units,
        });
        cursor = bucket_end;
    }
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Confidence, Reading, ReadingFormat};
    use chrono::TimeZone;

    fn reading_at(ts: DateTime<Utc>, total: f64) -> Reading {
        Reading {
            meter_name: "water_main".to_string(),
            timestamp: ts,
            total,
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
    fn buckets_compute_max_minus_min_per_window() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2026, 1, 1, 2, 0, 0).unwrap();
        let readings = vec![
            reading_at(t0 + chrono::Duration::minutes(5), 100.0),
            reading_at(t0 + chrono::Duration::minutes(30), 100.5),
            reading_at(t0 + chrono::Duration::minutes(90), 101.2),
        ];

        let buckets = bucketize("water_main", t0, t1, 3600, &readings);
        assert_eq!(buckets.len(), 2);
        assert!((buckets[0].delta_units - 0.5).abs() < 1e-9);
        assert_eq!(buckets[1].delta_units, 0.0);
    }

    #[test]
    fn empty_bucket_defaults_to_zero() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2026, 1, 1, 1, 0, 0).unwrap();
        let buckets = bucketize("water_main", t0, t1, 1800, &[]);
        assert_eq!(buckets.len(), 2);
        assert!(buckets.iter().all(|b| b.delta_units == 0.0));
    }
}
