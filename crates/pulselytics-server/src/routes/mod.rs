use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;

use pulselytics_core::TimeRange;

use crate::error::AppError;

pub mod breakdowns;
pub mod events;
pub mod export;
pub mod health;
pub mod overview;
pub mod pageviews;
pub mod realtime;
pub mod referrers;
pub mod sessions;
pub mod sites;
pub mod track;
pub mod visitors;

/// Time-window selection shared by every analytics endpoint: either a
/// relative `period` token (`7d`, `4w`, `3m`, `1y`) or an explicit
/// `start_date`/`end_date` pair, which wins when both bounds are present.
///
/// Endpoints with extra parameters (`limit`, `format`) declare their own
/// query struct with these three fields repeated; `serde(flatten)` breaks
/// number parsing under axum's query deserializer.
#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub period: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl RangeQuery {
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<TimeRange, AppError> {
        resolve_range(
            self.period.as_deref(),
            self.start_date.as_deref(),
            self.end_date.as_deref(),
            now,
        )
    }
}

/// Resolve period / explicit-bound query parameters into a concrete
/// [`TimeRange`] anchored at `now`.
pub fn resolve_range(
    period: Option<&str>,
    start_date: Option<&str>,
    end_date: Option<&str>,
    now: DateTime<Utc>,
) -> Result<TimeRange, AppError> {
    let start = start_date.map(|raw| parse_bound(raw, false)).transpose()?;
    let end = end_date.map(|raw| parse_bound(raw, true)).transpose()?;
    Ok(TimeRange::resolve(period, start, end, now)?)
}

/// Parse one explicit bound. Accepts RFC 3339 timestamps verbatim, or a bare
/// `YYYY-MM-DD` date which expands to the start (or end) of that UTC day.
fn parse_bound(raw: &str, end_of_day: bool) -> Result<DateTime<Utc>, AppError> {
    if let Ok(ts) = raw.parse::<DateTime<Utc>>() {
        return Ok(ts);
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        AppError::BadRequest(format!(
            "invalid date {raw:?}, expected YYYY-MM-DD or RFC 3339"
        ))
    })?;
    let time = if end_of_day {
        NaiveTime::from_hms_milli_opt(23, 59, 59, 999)
            .ok_or_else(|| AppError::BadRequest("invalid date bound".to_string()))?
    } else {
        NaiveTime::MIN
    };
    Ok(date.and_time(time).and_utc())
}
