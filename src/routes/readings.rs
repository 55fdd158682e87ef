use axum::extract::{Path, Query};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::error::{map_db_error, AppError, AppResult};
use crate::models::Reading;
use crate::state::AppState;

fn require_known_meter(state: &AppState, meter: &str) -> AppResult<()> {
    if state.config.current().meter(meter).is_none() {
        return Err(AppError::not_found(format!("unknown meter '{meter}'")));
    }
    Ok(())
}

#[utoipa::path(
    get,
    path = "/api/latest/{meter}",
    tag = "readings",
    params(("meter" = String, Path, description = "Meter name")),
    responses(
        (status = 200, description = "Latest reading", body = Reading),
        (status = 404, description = "Unknown meter, or no reading yet")
    )
)]
pub(crate) async fn latest_reading(
    axum::extract::State(state): axum::extract::State<AppState>,
    Path(meter): Path<String>,
) -> AppResult<Json<Reading>> {
    require_known_meter(&state, &meter)?;
    let reading = state
        .writer
        .query_latest(&meter)
        .await
        .map_err(map_db_error)?
        .ok_or_else(|| AppError::not_found(format!("no reading yet for '{meter}'")))?;
    Ok(Json(reading))
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub(crate) struct HistoryQuery {
    /// Lookback window, e.g. `-7d`, `-24h`, `-30m`. Defaults to `-7d`.
    range: Option<String>,
    /// Caps the number of readings returned (newest kept on truncation).
    limit: Option<usize>,
}

/// Parses spec.md §4.10's `range=-7d` query convention into a lookback
/// `chrono::Duration`. Accepts a leading `-` (optional) followed by an
/// integer and one of `m` (minutes), `h` (hours), or `d` (days).
pub(crate) fn parse_range(raw: &str) -> Option<Duration> {
    let trimmed = raw.trim().trim_start_matches('-');
    let (digits, unit) = trimmed.split_at(trimmed.len().checked_sub(1)?);
    let amount: i64 = digits.parse().ok()?;
    match unit {
        "m" => Some(Duration::minutes(amount)),
        "h" => Some(Duration::hours(amount)),
        "d" => Some(Duration::days(amount)),
        _ => None,
    }
}

#[utoipa::path(
    get,
    path = "/api/history/{meter}",
    tag = "readings",
    params(("meter" = String, Path, description = "Meter name"), HistoryQuery),
    responses(
        (status = 200, description = "Readings in range, oldest first", body = [Reading]),
        (status = 404, description = "Unknown meter")
    )
)]
pub(crate) async fn history(
    axum::extract::State(state): axum::extract::State<AppState>,
    Path(meter): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<Vec<Reading>>> {
    require_known_meter(&state, &meter)?;
    let window = query
        .range
        .as_deref()
        .and_then(parse_range)
        .unwrap_or_else(|| Duration::days(7));

    let now: DateTime<Utc> = Utc::now();
    let from = now - window.abs();
    let mut readings = state
        .writer
        .query_range(&meter, from, now)
        .await
        .map_err(map_db_error)?;

    if let Some(limit) = query.limit {
        if readings.len() > limit {
            let drop = readings.len() - limit;
            readings.drain(0..drop);
        }
    }

    Ok(Json(readings))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/latest/{meter}", get(latest_reading))
        .route("/history/{meter}", get(history))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_day_hour_minute_suffixes() {
        assert_eq!(parse_range("-7d"), Some(Duration::days(7)));
        assert_eq!(parse_range("-24h"), Some(Duration::hours(24)));
        assert_eq!(parse_range("-30m"), Some(Duration::minutes(30)));
    }

    #[test]
    fn rejects_unknown_unit() {
        assert_eq!(parse_range("-7x"), None);
    }
}
