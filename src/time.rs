use chrono::{DateTime, Utc};
use std::time::Duration;

/// Computes the delay until the next cycle boundary so that repeating
/// captures land on `epoch + n * interval` instead of drifting by the
/// wall-clock cost of each cycle (spec.md §4.8: "aligned to wall-clock-second
/// boundaries, avoid drift by anchoring to a start epoch").
pub(crate) fn delay_until_next_boundary(
    epoch: DateTime<Utc>,
    interval: Duration,
    now: DateTime<Utc>,
) -> Duration {
    let interval_ms = interval.as_millis().max(1) as i64;
    let elapsed_ms = (now - epoch).num_milliseconds().max(0);
    let remainder_ms = elapsed_ms % interval_ms;
    if remainder_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis((interval_ms - remainder_ms) as u64)
}

/// Exponential backoff with a cap, per spec.md §4.8 (`base=5s, cap=300s`).
pub(crate) fn backoff_duration(consecutive_failures: u32, base: Duration, cap: Duration) -> Duration {
    if consecutive_failures == 0 {
        return Duration::ZERO;
    }
    let shift = consecutive_failures.min(20) - 1;
    let scaled = base.as_millis().saturating_mul(1u128 << shift);
    let capped = scaled.min(cap.as_millis());
    Duration::from_millis(capped as u64)
}

/// `YYYYMMDDTHHMMSSZ`, UTC, basic ISO with no punctuation (spec.md §6).
pub(crate) fn format_snapshot_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y%m%dT%H%M%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn no_delay_exactly_on_boundary() {
        let epoch = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let now = epoch + chrono::Duration::seconds(120);
        let delay = delay_until_next_boundary(epoch, Duration::from_secs(60), now);
        assert_eq!(delay, Duration::ZERO);
    }

    #[test]
    fn delays_to_next_boundary_when_cycle_overruns() {
        let epoch = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let now = epoch + chrono::Duration::seconds(65);
        let delay = delay_until_next_boundary(epoch, Duration::from_secs(60), now);
        assert_eq!(delay, Duration::from_secs(55));
    }

    #[test]
    fn backoff_caps_at_configured_ceiling() {
        let base = Duration::from_secs(5);
        let cap = Duration::from_secs(300);
        assert_eq!(backoff_duration(0, base, cap), Duration::ZERO);
        assert_eq!(backoff_duration(1, base, cap), Duration::from_secs(5));
        assert_eq!(backoff_duration(3, base, cap), Duration::from_secs(20));
        assert_eq!(backoff_duration(10, base, cap), cap);
    }

    #[test]
    fn snapshot_timestamp_is_basic_iso_utc() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 5, 14, 7, 9).unwrap();
        assert_eq!(format_snapshot_timestamp(ts), "20260305T140709Z");
    }
}
