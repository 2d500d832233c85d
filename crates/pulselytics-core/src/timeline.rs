//! Time-bucketed pageview rollups with gap filling.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Datelike, Days, Duration, Months, NaiveTime, Timelike, Utc};
use serde::Serialize;

use crate::event::Event;
use crate::timerange::TimeRange;

/// Bucket width, chosen from the calendar-day span of the resolved range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Hour,
    Day,
    Week,
    Month,
}

impl Granularity {
    /// One rule for every caller: hour within a day, day up to a month,
    /// week up to a quarter, month beyond.
    pub fn for_span_days(days: i64) -> Self {
        if days <= 1 {
            Granularity::Hour
        } else if days <= 31 {
            Granularity::Day
        } else if days <= 90 {
            Granularity::Week
        } else {
            Granularity::Month
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Hour => "hour",
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
        }
    }

    /// Truncate to the containing bucket's start. Weeks start on Monday;
    /// everything is UTC.
    fn truncate(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let day = ts.date_naive().and_time(NaiveTime::MIN).and_utc();
        match self {
            Granularity::Hour => day + Duration::hours(i64::from(ts.hour())),
            Granularity::Day => day,
            Granularity::Week => {
                day - Duration::days(i64::from(ts.weekday().num_days_from_monday()))
            }
            Granularity::Month => (ts.date_naive() - Days::new(u64::from(ts.day0())))
                .and_time(NaiveTime::MIN)
                .and_utc(),
        }
    }

    /// Start of the next bucket. Saturates at the far future instead of
    /// overflowing; the walk loop stops on non-advancing keys.
    fn advance(&self, bucket_start: DateTime<Utc>) -> DateTime<Utc> {
        let stepped = match self {
            Granularity::Hour => bucket_start.checked_add_signed(Duration::hours(1)),
            Granularity::Day => bucket_start.checked_add_signed(Duration::days(1)),
            Granularity::Week => bucket_start.checked_add_signed(Duration::weeks(1)),
            Granularity::Month => bucket_start.checked_add_months(Months::new(1)),
        };
        stepped.unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn label(&self, bucket_start: DateTime<Utc>) -> String {
        match self {
            Granularity::Hour => bucket_start.format("%Y-%m-%dT%H:00:00Z").to_string(),
            Granularity::Day | Granularity::Week => {
                bucket_start.format("%Y-%m-%d").to_string()
            }
            Granularity::Month => bucket_start.format("%Y-%m").to_string(),
        }
    }
}

/// One timeline slot. `new`/`returning` count pageviews by the client's
/// `isNewVisitor` flag; events without the flag land in neither, so the two
/// may sum to less than `total`.
#[derive(Debug, Clone, Serialize)]
pub struct TimelineEntry {
    pub date: String,
    pub total: i64,
    #[serde(rename = "new")]
    pub new_visitors: i64,
    pub returning: i64,
    pub unique: i64,
}

#[derive(Default)]
struct BucketAcc<'a> {
    total: i64,
    new_visitors: i64,
    returning: i64,
    visitors: HashSet<&'a str>,
}

/// Bucket the range's pageviews at the granularity implied by the span.
pub fn bucket(events: &[Event], range: &TimeRange) -> Vec<TimelineEntry> {
    bucket_with(events, range, Granularity::for_span_days(range.span_days()))
}

/// Bucket at an explicit granularity. The walk emits one entry per bucket
/// from `truncate(start)` through `end` with zero entries for empty slots,
/// so charts never see missing x-axis points. Events outside the range are
/// ignored, which keeps `sum(total)` equal to the in-range pageview count.
pub fn bucket_with(
    events: &[Event],
    range: &TimeRange,
    granularity: Granularity,
) -> Vec<TimelineEntry> {
    let mut buckets: HashMap<DateTime<Utc>, BucketAcc> = HashMap::new();

    for event in events {
        if !range.contains(event.timestamp) {
            continue;
        }
        let Some(pageview) = event.pageview() else {
            continue;
        };
        let acc = buckets
            .entry(granularity.truncate(event.timestamp))
            .or_default();
        acc.total += 1;
        acc.visitors.insert(event.visitor_id.as_str());
        match pageview.is_new_visitor {
            Some(true) => acc.new_visitors += 1,
            Some(false) => acc.returning += 1,
            None => {}
        }
    }

    let mut timeline = Vec::new();
    let mut key = granularity.truncate(range.start);
    while key <= range.end {
        let entry = match buckets.get(&key) {
            Some(acc) => TimelineEntry {
                date: granularity.label(key),
                total: acc.total,
                new_visitors: acc.new_visitors,
                returning: acc.returning,
                unique: acc.visitors.len() as i64,
            },
            None => TimelineEntry {
                date: granularity.label(key),
                total: 0,
                new_visitors: 0,
                returning: 0,
                unique: 0,
            },
        };
        timeline.push(entry);

        let next = granularity.advance(key);
        if next <= key {
            break;
        }
        key = next;
    }
    timeline
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, PageviewData};

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn pageview(visitor: &str, ts: &str, is_new: Option<bool>) -> Event {
        Event {
            site_id: "site_abc".to_string(),
            visitor_id: visitor.to_string(),
            session_id: format!("session-{visitor}"),
            timestamp: at(ts),
            kind: EventKind::Pageview(PageviewData {
                url: "https://example.com/".to_string(),
                path: "/".to_string(),
                title: None,
                referrer: None,
                time_on_page: None,
                is_new_visitor: is_new,
            }),
            device_type: None,
            device_os: None,
            device_browser: None,
            country: None,
            region: None,
            city: None,
        }
    }

    fn day_range(start: &str, end: &str) -> TimeRange {
        TimeRange::explicit(at(start), at(end)).unwrap()
    }

    #[test]
    fn granularity_thresholds() {
        assert_eq!(Granularity::for_span_days(1), Granularity::Hour);
        assert_eq!(Granularity::for_span_days(2), Granularity::Day);
        assert_eq!(Granularity::for_span_days(31), Granularity::Day);
        assert_eq!(Granularity::for_span_days(32), Granularity::Week);
        assert_eq!(Granularity::for_span_days(90), Granularity::Week);
        assert_eq!(Granularity::for_span_days(91), Granularity::Month);
    }

    #[test]
    fn seven_whole_days_yield_seven_entries_even_when_empty() {
        let range = day_range("2025-06-01T00:00:00Z", "2025-06-07T23:59:59.999Z");
        let timeline = bucket(&[], &range);
        assert_eq!(timeline.len(), 7);
        assert_eq!(timeline[0].date, "2025-06-01");
        assert_eq!(timeline[6].date, "2025-06-07");
        assert!(timeline.iter().all(|e| e.total == 0 && e.unique == 0));
    }

    #[test]
    fn gaps_between_active_days_are_zero_filled() {
        let range = day_range("2025-06-01T00:00:00Z", "2025-06-03T23:59:59.999Z");
        let events = vec![
            pageview("v1", "2025-06-01T09:00:00Z", None),
            pageview("v1", "2025-06-03T09:00:00Z", None),
            pageview("v2", "2025-06-03T10:00:00Z", None),
        ];
        let timeline = bucket(&events, &range);
        assert_eq!(timeline.len(), 3);
        assert_eq!(timeline[0].total, 1);
        assert_eq!(timeline[1].total, 0);
        assert_eq!(timeline[2].total, 2);
        assert_eq!(timeline[2].unique, 2);
    }

    #[test]
    fn single_day_range_buckets_by_hour() {
        let range = day_range("2025-06-01T00:00:00Z", "2025-06-01T23:59:59.999Z");
        let events = vec![
            pageview("v1", "2025-06-01T09:15:00Z", None),
            pageview("v2", "2025-06-01T09:45:00Z", None),
        ];
        let timeline = bucket(&events, &range);
        assert_eq!(timeline.len(), 24);
        assert_eq!(timeline[9].date, "2025-06-01T09:00:00Z");
        assert_eq!(timeline[9].total, 2);
        assert_eq!(timeline[10].total, 0);
    }

    #[test]
    fn week_buckets_start_on_monday() {
        // 2025-06-01 is a Sunday; its week bucket starts Monday 2025-05-26.
        let range = day_range("2025-06-01T00:00:00Z", "2025-08-15T23:59:59.999Z");
        let timeline = bucket(&[pageview("v1", "2025-06-01T12:00:00Z", None)], &range);
        assert_eq!(timeline[0].date, "2025-05-26");
        assert_eq!(timeline[0].total, 1);
        assert_eq!(timeline[1].date, "2025-06-02");
    }

    #[test]
    fn month_buckets_cross_year_boundaries() {
        let range = day_range("2025-11-01T00:00:00Z", "2026-02-28T23:59:59.999Z");
        let timeline = bucket(&[pageview("v1", "2026-01-15T12:00:00Z", None)], &range);
        let labels: Vec<&str> = timeline.iter().map(|e| e.date.as_str()).collect();
        assert_eq!(labels, vec!["2025-11", "2025-12", "2026-01", "2026-02"]);
        assert_eq!(timeline[2].total, 1);
    }

    #[test]
    fn totals_are_conserved_for_in_range_pageviews() {
        let range = day_range("2025-06-01T00:00:00Z", "2025-06-07T23:59:59.999Z");
        let events = vec![
            pageview("v1", "2025-06-01T00:00:00Z", None),
            pageview("v1", "2025-06-04T12:30:00Z", None),
            pageview("v2", "2025-06-07T23:59:59Z", None),
            pageview("v3", "2025-05-31T23:59:59Z", None),
            pageview("v3", "2025-06-08T00:00:00Z", None),
        ];
        let timeline = bucket(&events, &range);
        let total: i64 = timeline.iter().map(|e| e.total).sum();
        assert_eq!(total, 3, "out-of-range events must not leak into buckets");
    }

    #[test]
    fn new_and_returning_split_by_client_flag() {
        let range = day_range("2025-06-01T00:00:00Z", "2025-06-02T23:59:59.999Z");
        let events = vec![
            pageview("v1", "2025-06-01T09:00:00Z", Some(true)),
            pageview("v2", "2025-06-01T10:00:00Z", Some(false)),
            pageview("v3", "2025-06-01T11:00:00Z", None),
        ];
        let timeline = bucket(&events, &range);
        assert_eq!(timeline[0].total, 3);
        assert_eq!(timeline[0].new_visitors, 1);
        assert_eq!(timeline[0].returning, 1);
        assert_eq!(timeline[0].unique, 3);
    }

    #[test]
    fn non_pageview_events_do_not_contribute() {
        let range = day_range("2025-06-01T00:00:00Z", "2025-06-02T23:59:59.999Z");
        let mut error_event = pageview("v1", "2025-06-01T09:00:00Z", None);
        error_event.kind = EventKind::Error(crate::event::ErrorData {
            message: "boom".to_string(),
            stack: None,
            source: None,
        });
        let timeline = bucket(&[error_event], &range);
        assert_eq!(timeline[0].total, 0);
        assert_eq!(timeline[0].unique, 0);
    }
}
