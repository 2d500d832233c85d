use chrono::{DateTime, Duration, Months, NaiveTime, Utc};
use serde::Serialize;

use crate::error::EngineError;

/// Resolved query window, inclusive on both ends (`start <= ts <= end`).
/// Derived once per request and shared by every reducer in that request.
/// All resolution and bucketing is UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Parse a period token (`"7d"`, `"4w"`, `"3m"`, `"1y"`) relative to
    /// `now`. The window ends at `now`'s end of day (23:59:59.999) and
    /// starts at start of day `span` before it, matching how the rest of
    /// the system does date-only comparisons.
    pub fn from_period(period: &str, now: DateTime<Utc>) -> Result<Self, EngineError> {
        let invalid = || EngineError::InvalidPeriod(period.to_string());

        let unit = period.chars().last().ok_or_else(invalid)?;
        let digits = &period[..period.len() - unit.len_utf8()];
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let count: u32 = digits.parse().map_err(|_| invalid())?;

        // Month/year arithmetic is calendar-aware (end-of-month clamped).
        let anchor = match unit {
            'd' => now.checked_sub_signed(Duration::days(i64::from(count))),
            'w' => now.checked_sub_signed(Duration::weeks(i64::from(count))),
            'm' => now.checked_sub_months(Months::new(count)),
            'y' => count
                .checked_mul(12)
                .and_then(|months| now.checked_sub_months(Months::new(months))),
            _ => return Err(invalid()),
        }
        .ok_or_else(invalid)?;

        Ok(Self {
            start: day_start(anchor),
            end: day_end(now),
        })
    }

    /// Explicit start/end from a date picker. Used verbatim (no snapping to
    /// day boundaries), but a reversed pair is rejected.
    pub fn explicit(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, EngineError> {
        if start > end {
            return Err(EngineError::InvalidTimeRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Request-level resolution: an explicit start+end pair wins over the
    /// period token; the period defaults to `7d` when absent. A one-sided
    /// explicit bound is ignored.
    pub fn resolve(
        period: Option<&str>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Self, EngineError> {
        match (start, end) {
            (Some(start), Some(end)) => Self::explicit(start, end),
            _ => Self::from_period(period.unwrap_or("7d"), now),
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts <= self.end
    }

    /// Number of calendar days touched by the range, minimum 1.
    pub fn span_days(&self) -> i64 {
        (self.end.date_naive() - self.start.date_naive()).num_days() + 1
    }
}

fn day_start(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.date_naive().and_time(NaiveTime::MIN).and_utc()
}

fn day_end(ts: DateTime<Utc>) -> DateTime<Utc> {
    day_start(ts) + Duration::days(1) - Duration::milliseconds(1)
}
