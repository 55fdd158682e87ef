use std::time::Duration as StdDuration;

use axum::extract::{Path, Query};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{Duration, Utc};
use serde::Deserialize;

use crate::error::{map_db_error, AppError, AppResult};
use crate::models::ConsumptionBucket;
use crate::state::AppState;

/// Accepts both named keywords (`hour`, `day`, `minute`) and a
/// `<number><unit>` shorthand (`15m`, `6h`, `2d`), matching spec.md §4.10's
/// `interval=hour` example while staying permissive about finer
/// granularities dashboards may request.
fn parse_duration(raw: &str) -> Option<StdDuration> {
    match raw {
        "minute" => return Some(StdDuration::from_secs(60)),
        "hour" => return Some(StdDuration::from_secs(3600)),
        "day" => return Some(StdDuration::from_secs(86_400)),
        _ => {}
    }
    let trimmed = raw.trim();
    let (digits, unit) = trimmed.split_at(trimmed.len().checked_sub(1)?);
    let amount: u64 = digits.parse().ok()?;
    let seconds = match unit {
        "m" => amount.checked_mul(60)?,
        "h" => amount.checked_mul(3600)?,
        "d" => amount.checked_mul(86_400)?,
        _ => return None,
    };
    Some(StdDuration::from_secs(seconds))
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub(crate) struct ConsumptionQuery {
    /// Lookback window ending now, e.g. `24h`, `7d`. Defaults to `24h`.
    period: Option<String>,
    /// Bucket width, e.g. `hour`, `day`, `15m`. Defaults to `hour`.
    interval: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/consumption/{meter}",
    tag = "consumption",
    params(("meter" = String, Path, description = "Meter name"), ConsumptionQuery),
    responses(
        (status = 200, description = "Consumption buckets", body = [ConsumptionBucket]),
        (status = 404, description = "Unknown meter")
    )
)]
pub(crate) async fn consumption(
    axum::extract::State(state): axum::extract::State<AppState>,
    Path(meter): Path<String>,
    Query(query): Query<ConsumptionQuery>,
) -> AppResult<Json<Vec<ConsumptionBucket>>> {
    if state.config.current().meter(&meter).is_none() {
        return Err(AppError::not_found(format!("unknown meter '{meter}'")));
    }

    let period = query
        .period
        .as_deref()
        .and_then(parse_duration)
        .map(|duration| Duration::from_std(duration).unwrap_or_else(|_| Duration::hours(24)))
        .unwrap_or_else(|| Duration::hours(24));
    let interval = query
        .interval
        .as_deref()
        .and_then(parse_duration)
        .unwrap_or(StdDuration::from_secs(3600));

    let now = Utc::now();
    let buckets = state
        .consumption
        .buckets(&meter, now - period, now, interval)
        .await
        .map_err(map_db_error)?;
    Ok(Json(buckets))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/consumption/{meter}", get(consumption))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_named_keywords() {
        assert_eq!(parse_duration("hour"), Some(StdDuration::from_secs(3600)));
        assert_eq!(parse_duration("day"), Some(StdDuration::from_secs(86_400)));
    }

    #[test]
    fn parses_shorthand_numeric_units() {
        assert_eq!(parse_duration("15m"), Some(StdDuration::from_secs(900)));
        assert_eq!(parse_duration("2d"), Some(StdDuration::from_secs(172_800)));
    }

    #[test]
    fn rejects_unknown_unit() {
        assert_eq!(parse_duration("15x"), None);
    }
}
