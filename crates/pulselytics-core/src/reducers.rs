//! Pure reducers over one fetched event batch.
//!
//! Every reducer consumes the full matching event set for a request and
//! produces one metric family. All are independent and order-insensitive;
//! given the same input set they always produce the same output.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::event::Event;
use crate::referrer::{classify, ReferrerClass};

#[derive(Debug, Clone, Serialize)]
pub struct OverviewCounts {
    pub pageviews: i64,
    pub visitors: i64,
    pub sessions: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageStat {
    pub path: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub views: i64,
    pub visitors: i64,
    pub avg_time_on_page: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReferrerStat {
    pub source: String,
    pub views: i64,
    pub visitors: i64,
    #[serde(rename = "type")]
    pub class: ReferrerClass,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventStat {
    pub category: String,
    pub action: String,
    pub count: i64,
    pub visitors: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct VisitorSummary {
    pub total: i64,
    #[serde(rename = "new")]
    pub new_visitors: i64,
    pub returning: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivePage {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub visitor_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Pageview count, distinct visitors and distinct sessions across the whole
/// fetched set (visitors/sessions span all event types).
pub fn overview_counts(events: &[Event]) -> OverviewCounts {
    let mut visitors: HashSet<&str> = HashSet::new();
    let mut sessions: HashSet<&str> = HashSet::new();
    let mut pageviews = 0i64;
    for event in events {
        visitors.insert(event.visitor_id.as_str());
        sessions.insert(event.session_id.as_str());
        if event.is_pageview() {
            pageviews += 1;
        }
    }
    OverviewCounts {
        pageviews,
        visitors: visitors.len() as i64,
        sessions: sessions.len() as i64,
    }
}

/// Share of sessions with exactly one pageview, 0-100, rounded. Sessions
/// without any pageview do not enter the denominator; zero sessions means 0.
pub fn bounce_rate(events: &[Event]) -> i64 {
    let mut pageviews_per_session: HashMap<&str, i64> = HashMap::new();
    for event in events {
        if event.is_pageview() {
            *pageviews_per_session
                .entry(event.session_id.as_str())
                .or_insert(0) += 1;
        }
    }
    let total = pageviews_per_session.len();
    if total == 0 {
        return 0;
    }
    let bounced = pageviews_per_session.values().filter(|&&c| c == 1).count();
    (100.0 * bounced as f64 / total as f64).round() as i64
}

/// Mean session duration in whole seconds. A session's duration is the gap
/// between its first and last event of ANY type; only sessions with a
/// positive gap count (a single touchpoint has no measurable duration).
pub fn avg_session_duration(events: &[Event]) -> i64 {
    let mut spans: HashMap<&str, (DateTime<Utc>, DateTime<Utc>)> = HashMap::new();
    for event in events {
        spans
            .entry(event.session_id.as_str())
            .and_modify(|(first, last)| {
                if event.timestamp < *first {
                    *first = event.timestamp;
                }
                if event.timestamp > *last {
                    *last = event.timestamp;
                }
            })
            .or_insert((event.timestamp, event.timestamp));
    }

    let durations: Vec<f64> = spans
        .values()
        .map(|(first, last)| (*last - *first).num_milliseconds() as f64 / 1000.0)
        .filter(|secs| *secs > 0.0)
        .collect();
    if durations.is_empty() {
        return 0;
    }
    (durations.iter().sum::<f64>() / durations.len() as f64).round() as i64
}

#[derive(Default)]
struct PageAcc<'a> {
    url: String,
    title: Option<String>,
    views: i64,
    visitors: HashSet<&'a str>,
    total_time: f64,
}

/// Pageviews grouped by path, most viewed first. The url and title come from
/// the first event seen for the path; `avg_time_on_page` divides the summed
/// `timeOnPage` by ALL views, so views without the field pull the mean
/// toward zero rather than being skipped.
pub fn top_pages(events: &[Event], limit: usize) -> Vec<PageStat> {
    let mut groups: HashMap<&str, PageAcc> = HashMap::new();
    for event in events {
        let Some(pageview) = event.pageview() else {
            continue;
        };
        let acc = groups
            .entry(pageview.path.as_str())
            .or_insert_with(|| PageAcc {
                url: pageview.url.clone(),
                title: pageview.title.clone(),
                ..PageAcc::default()
            });
        acc.views += 1;
        acc.visitors.insert(event.visitor_id.as_str());
        acc.total_time += pageview.time_on_page.unwrap_or(0.0);
    }

    let mut pages: Vec<PageStat> = groups
        .into_iter()
        .map(|(path, acc)| PageStat {
            path: path.to_string(),
            url: acc.url,
            title: acc.title,
            views: acc.views,
            visitors: acc.visitors.len() as i64,
            avg_time_on_page: if acc.views > 0 {
                acc.total_time / acc.views as f64
            } else {
                0.0
            },
        })
        .collect();
    pages.sort_by(|a, b| b.views.cmp(&a.views).then_with(|| a.path.cmp(&b.path)));
    pages.truncate(limit);
    pages
}

#[derive(Default)]
struct ReferrerAcc<'a> {
    views: i64,
    visitors: HashSet<&'a str>,
}

/// Pageviews with a non-empty referrer grouped by the raw referrer string,
/// classified into traffic-source categories, most viewed first.
pub fn referrer_breakdown(events: &[Event], limit: usize) -> Vec<ReferrerStat> {
    let mut groups: HashMap<&str, ReferrerAcc> = HashMap::new();
    for event in events {
        let Some(pageview) = event.pageview() else {
            continue;
        };
        let Some(referrer) = pageview.referrer.as_deref() else {
            continue;
        };
        if referrer.is_empty() {
            continue;
        }
        let acc = groups.entry(referrer).or_default();
        acc.views += 1;
        acc.visitors.insert(event.visitor_id.as_str());
    }

    let mut referrers: Vec<ReferrerStat> = groups
        .into_iter()
        .map(|(source, acc)| ReferrerStat {
            class: classify(Some(source)),
            source: source.to_string(),
            views: acc.views,
            visitors: acc.visitors.len() as i64,
        })
        .collect();
    referrers.sort_by(|a, b| b.views.cmp(&a.views).then_with(|| a.source.cmp(&b.source)));
    referrers.truncate(limit);
    referrers
}

#[derive(Default)]
struct EventAcc<'a> {
    count: i64,
    visitors: HashSet<&'a str>,
}

/// Custom events grouped by category/action pair, most frequent first.
/// Missing fields bucket under `"unknown"`, same as the visitor breakdowns.
pub fn event_breakdown(events: &[Event], limit: usize) -> Vec<EventStat> {
    let mut groups: HashMap<(&str, &str), EventAcc> = HashMap::new();
    for event in events {
        let Some(custom) = event.custom() else {
            continue;
        };
        let category = custom
            .category
            .as_deref()
            .filter(|v| !v.is_empty())
            .unwrap_or("unknown");
        let action = custom
            .action
            .as_deref()
            .filter(|v| !v.is_empty())
            .unwrap_or("unknown");
        let acc = groups.entry((category, action)).or_default();
        acc.count += 1;
        acc.visitors.insert(event.visitor_id.as_str());
    }

    let mut stats: Vec<EventStat> = groups
        .into_iter()
        .map(|((category, action), acc)| EventStat {
            category: category.to_string(),
            action: action.to_string(),
            count: acc.count,
            visitors: acc.visitors.len() as i64,
        })
        .collect();
    stats.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.category.cmp(&b.category))
            .then_with(|| a.action.cmp(&b.action))
    });
    stats.truncate(limit);
    stats
}

/// Distinct visitors per bucket label over pageviews. One visitor browsing
/// forty pages on one phone still counts once under `mobile`.
fn distinct_visitors_by<F>(events: &[Event], field: F) -> BTreeMap<String, i64>
where
    F: Fn(&Event) -> Option<&str>,
{
    let mut buckets: BTreeMap<String, HashSet<&str>> = BTreeMap::new();
    for event in events {
        if !event.is_pageview() {
            continue;
        }
        let label = field(event).filter(|v| !v.is_empty()).unwrap_or("unknown");
        buckets
            .entry(label.to_string())
            .or_default()
            .insert(event.visitor_id.as_str());
    }
    buckets
        .into_iter()
        .map(|(label, visitors)| (label, visitors.len() as i64))
        .collect()
}

pub fn device_breakdown(events: &[Event]) -> BTreeMap<String, i64> {
    distinct_visitors_by(events, |e| e.device_type.as_deref())
}

pub fn os_breakdown(events: &[Event]) -> BTreeMap<String, i64> {
    distinct_visitors_by(events, |e| e.device_os.as_deref())
}

pub fn browser_breakdown(events: &[Event]) -> BTreeMap<String, i64> {
    distinct_visitors_by(events, |e| e.device_browser.as_deref())
}

pub fn country_breakdown(events: &[Event]) -> BTreeMap<String, i64> {
    distinct_visitors_by(events, |e| e.country.as_deref())
}

pub fn region_breakdown(events: &[Event]) -> BTreeMap<String, i64> {
    distinct_visitors_by(events, |e| e.region.as_deref())
}

pub fn city_breakdown(events: &[Event]) -> BTreeMap<String, i64> {
    distinct_visitors_by(events, |e| e.city.as_deref())
}

/// Distinct pageview visitors with a new/returning split from the client's
/// `isNewVisitor` flag. Best-effort: the flag is self-reported and resets
/// when the visitor clears browser storage.
pub fn visitor_summary(events: &[Event]) -> VisitorSummary {
    let mut all: HashSet<&str> = HashSet::new();
    let mut new: HashSet<&str> = HashSet::new();
    for event in events {
        let Some(pageview) = event.pageview() else {
            continue;
        };
        all.insert(event.visitor_id.as_str());
        if pageview.is_new_visitor == Some(true) {
            new.insert(event.visitor_id.as_str());
        }
    }
    let total = all.len() as i64;
    let new_visitors = new.len() as i64;
    VisitorSummary {
        total,
        new_visitors,
        returning: total - new_visitors,
    }
}

/// Latest pageview per visitor, newest first, for the realtime view.
pub fn current_pages(events: &[Event], limit: usize) -> Vec<ActivePage> {
    let mut latest: HashMap<&str, &Event> = HashMap::new();
    for event in events {
        if !event.is_pageview() {
            continue;
        }
        latest
            .entry(event.visitor_id.as_str())
            .and_modify(|held| {
                if event.timestamp > held.timestamp {
                    *held = event;
                }
            })
            .or_insert(event);
    }

    let mut pages: Vec<ActivePage> = latest
        .into_values()
        .filter_map(|event| {
            event.pageview().map(|pv| ActivePage {
                path: pv.path.clone(),
                title: pv.title.clone(),
                visitor_id: event.visitor_id.clone(),
                timestamp: event.timestamp,
            })
        })
        .collect();
    pages.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| a.visitor_id.cmp(&b.visitor_id))
    });
    pages.truncate(limit);
    pages
}
