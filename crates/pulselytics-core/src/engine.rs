//! Aggregation engine: one fetch per request, reducer fan-out over the
//! batch, response assembly.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::EngineError;
use crate::event::{Event, EventType};
use crate::reducers::{
    self, ActivePage, EventStat, PageStat, ReferrerStat,
};
use crate::store::EventStore;
use crate::timeline::{self, Granularity, TimelineEntry};
use crate::timerange::TimeRange;

/// Minutes of history shown by the realtime view.
const REALTIME_WINDOW_MINUTES: i64 = 5;
/// Visitors listed by the realtime view before truncation.
const REALTIME_PAGE_LIMIT: usize = 50;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Budget for the single event-store fetch; expiry surfaces as
    /// [`EngineError::QueryTimeout`].
    pub query_timeout: Duration,
    pub top_pages_limit: usize,
    pub referrers_limit: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(10),
            top_pages_limit: 10,
            referrers_limit: 20,
        }
    }
}

/// Stateless per-process service: holds the store handle and limits, shares
/// nothing mutable between requests. Every operation is fetch-once followed
/// by pure reducers over the locally owned batch.
#[derive(Clone)]
pub struct AggregationEngine {
    store: Arc<dyn EventStore>,
    options: EngineOptions,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteReport {
    pub time_range: TimeRange,
    pub overview: Overview,
    pub top_pages: Vec<PageStat>,
    pub referrers: Vec<ReferrerStat>,
    pub devices: BTreeMap<String, i64>,
    pub countries: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub pageviews: i64,
    pub visitors: i64,
    pub sessions: i64,
    pub bounce_rate: i64,
    pub avg_session_duration: i64,
    pub pageviews_over_time: Vec<TimePoint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimePoint {
    pub date: String,
    pub views: i64,
    pub visitors: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceReport {
    pub devices: BTreeMap<String, i64>,
    pub operating_systems: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BrowserReport {
    pub browsers: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LocationReport {
    pub countries: BTreeMap<String, i64>,
    pub regions: BTreeMap<String, i64>,
    pub cities: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VisitorReport {
    pub total: i64,
    #[serde(rename = "new")]
    pub new_visitors: i64,
    pub returning: i64,
    pub granularity: String,
    pub timeline: Vec<TimelineEntry>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub sessions: i64,
    pub bounce_rate: i64,
    pub avg_session_duration: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeSnapshot {
    pub active_visitors: i64,
    pub pageviews: i64,
    pub current_pages: Vec<ActivePage>,
}

impl AggregationEngine {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self::with_options(store, EngineOptions::default())
    }

    pub fn with_options(store: Arc<dyn EventStore>, options: EngineOptions) -> Self {
        Self { store, options }
    }

    /// The single I/O step. A store error fails every reducer of the
    /// request together; zero returned events is a normal, valid batch.
    async fn fetch(
        &self,
        site_id: &str,
        range: &TimeRange,
        event_type: Option<EventType>,
    ) -> Result<Vec<Event>, EngineError> {
        let fetch = self.store.fetch_events(site_id, range, event_type);
        match tokio::time::timeout(self.options.query_timeout, fetch).await {
            Ok(Ok(events)) => Ok(events),
            Ok(Err(err)) => Err(EngineError::QueryFailure(err)),
            Err(_) => Err(EngineError::QueryTimeout(self.options.query_timeout)),
        }
    }

    /// The dashboard overview document: counts, rates, timeline, top pages,
    /// referrer and device/country breakdowns, all from one fetch.
    pub async fn site_report(
        &self,
        site_id: &str,
        range: TimeRange,
    ) -> Result<SiteReport, EngineError> {
        let events = self.fetch(site_id, &range, None).await?;

        let counts = reducers::overview_counts(&events);
        let buckets = timeline::bucket(&events, &range);
        let pageviews_over_time = buckets
            .into_iter()
            .map(|entry| TimePoint {
                date: entry.date,
                views: entry.total,
                visitors: entry.unique,
            })
            .collect();

        Ok(SiteReport {
            time_range: range,
            overview: Overview {
                pageviews: counts.pageviews,
                visitors: counts.visitors,
                sessions: counts.sessions,
                bounce_rate: reducers::bounce_rate(&events),
                avg_session_duration: reducers::avg_session_duration(&events),
                pageviews_over_time,
            },
            top_pages: reducers::top_pages(&events, self.options.top_pages_limit),
            referrers: reducers::referrer_breakdown(&events, self.options.referrers_limit),
            devices: reducers::device_breakdown(&events),
            countries: reducers::country_breakdown(&events),
        })
    }

    pub async fn top_pages(
        &self,
        site_id: &str,
        range: &TimeRange,
        limit: usize,
    ) -> Result<Vec<PageStat>, EngineError> {
        let events = self
            .fetch(site_id, range, Some(EventType::Pageview))
            .await?;
        Ok(reducers::top_pages(&events, limit))
    }

    pub async fn referrers(
        &self,
        site_id: &str,
        range: &TimeRange,
        limit: usize,
    ) -> Result<Vec<ReferrerStat>, EngineError> {
        let events = self
            .fetch(site_id, range, Some(EventType::Pageview))
            .await?;
        Ok(reducers::referrer_breakdown(&events, limit))
    }

    pub async fn custom_events(
        &self,
        site_id: &str,
        range: &TimeRange,
        limit: usize,
    ) -> Result<Vec<EventStat>, EngineError> {
        let events = self.fetch(site_id, range, Some(EventType::Custom)).await?;
        Ok(reducers::event_breakdown(&events, limit))
    }

    pub async fn devices(
        &self,
        site_id: &str,
        range: &TimeRange,
    ) -> Result<DeviceReport, EngineError> {
        let events = self
            .fetch(site_id, range, Some(EventType::Pageview))
            .await?;
        Ok(DeviceReport {
            devices: reducers::device_breakdown(&events),
            operating_systems: reducers::os_breakdown(&events),
        })
    }

    pub async fn browsers(
        &self,
        site_id: &str,
        range: &TimeRange,
    ) -> Result<BrowserReport, EngineError> {
        let events = self
            .fetch(site_id, range, Some(EventType::Pageview))
            .await?;
        Ok(BrowserReport {
            browsers: reducers::browser_breakdown(&events),
        })
    }

    pub async fn locations(
        &self,
        site_id: &str,
        range: &TimeRange,
    ) -> Result<LocationReport, EngineError> {
        let events = self
            .fetch(site_id, range, Some(EventType::Pageview))
            .await?;
        Ok(LocationReport {
            countries: reducers::country_breakdown(&events),
            regions: reducers::region_breakdown(&events),
            cities: reducers::city_breakdown(&events),
        })
    }

    pub async fn visitor_report(
        &self,
        site_id: &str,
        range: TimeRange,
    ) -> Result<VisitorReport, EngineError> {
        let events = self
            .fetch(site_id, &range, Some(EventType::Pageview))
            .await?;
        let summary = reducers::visitor_summary(&events);
        let granularity = Granularity::for_span_days(range.span_days());
        Ok(VisitorReport {
            total: summary.total,
            new_visitors: summary.new_visitors,
            returning: summary.returning,
            granularity: granularity.as_str().to_string(),
            timeline: timeline::bucket_with(&events, &range, granularity),
        })
    }

    pub async fn session_report(
        &self,
        site_id: &str,
        range: &TimeRange,
    ) -> Result<SessionReport, EngineError> {
        let events = self.fetch(site_id, range, None).await?;
        let counts = reducers::overview_counts(&events);
        Ok(SessionReport {
            sessions: counts.sessions,
            bounce_rate: reducers::bounce_rate(&events),
            avg_session_duration: reducers::avg_session_duration(&events),
        })
    }

    /// Activity in the trailing five-minute window ending at `now`.
    pub async fn realtime(
        &self,
        site_id: &str,
        now: DateTime<Utc>,
    ) -> Result<RealtimeSnapshot, EngineError> {
        let window = TimeRange {
            start: now - chrono::Duration::minutes(REALTIME_WINDOW_MINUTES),
            end: now,
        };
        let events = self.fetch(site_id, &window, None).await?;
        let counts = reducers::overview_counts(&events);
        Ok(RealtimeSnapshot {
            active_visitors: counts.visitors,
            pageviews: counts.pageviews,
            current_pages: reducers::current_pages(&events, REALTIME_PAGE_LIMIT),
        })
    }

    /// Raw matching events for the export surface; serialization to CSV or
    /// JSON is the caller's concern.
    pub async fn export(
        &self,
        site_id: &str,
        range: &TimeRange,
        event_type: Option<EventType>,
    ) -> Result<Vec<Event>, EngineError> {
        self.fetch(site_id, range, event_type).await
    }
}
