use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::time::format_snapshot_timestamp;

/// `{meter_name}_{YYYYMMDDTHHMMSSZ}` (spec.md §3 Snapshot, §6 Snapshot filenames).
/// Collision-free by construction because a meter is capped to one capture per
/// second by its `reading_interval_seconds` floor of 30s.
pub(crate) fn snapshot_id(meter_name: &str, ts: DateTime<Utc>) -> String {
    format!("{meter_name}_{}", format_snapshot_timestamp(ts))
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("{digest:x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn snapshot_id_matches_spec_format() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 5, 14, 7, 9).unwrap();
        assert_eq!(snapshot_id("water_main", ts), "water_main_20260305T140709Z");
    }

    #[test]
    fn sha256_hex_is_stable() {
        assert_eq!(
            sha256_hex(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
