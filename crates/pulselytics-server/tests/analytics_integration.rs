use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use pulselytics_core::config::Config;
use pulselytics_core::event::{CustomData, Event, EventKind, PageviewData};
use pulselytics_duckdb::DuckDbBackend;
use pulselytics_server::app::build_app;
use pulselytics_server::state::AppState;

fn test_config() -> Config {
    Config {
        port: 0,
        data_dir: "/tmp/pulselytics-test".to_string(),
        geoip_path: "/nonexistent/GeoLite2-City.mmdb".to_string(),
        cors_origins: vec![],
        duckdb_memory_limit: "1GB".to_string(),
        query_timeout_ms: 10_000,
        buffer_flush_interval_ms: 1000,
        buffer_max_size: 100,
        rate_limit_disabled: true,
        seed_site_id: None,
    }
}

async fn setup() -> (Arc<AppState>, axum::Router) {
    let db = DuckDbBackend::open_in_memory().expect("in-memory DuckDB");
    db.seed_site("site_test", "Test", "example.com")
        .await
        .expect("seed site");
    let config = test_config();
    let state = Arc::new(AppState::new(db, config));
    let app = build_app(Arc::clone(&state));
    (state, app)
}

fn at(s: &str) -> DateTime<Utc> {
    s.parse().expect("timestamp literal")
}

fn pageview(visitor: &str, session: &str, path: &str, ts: &str) -> Event {
    Event {
        site_id: "site_test".to_string(),
        visitor_id: visitor.to_string(),
        session_id: session.to_string(),
        timestamp: at(ts),
        kind: EventKind::Pageview(PageviewData {
            url: format!("https://example.com{path}"),
            path: path.to_string(),
            title: None,
            referrer: None,
            time_on_page: None,
            is_new_visitor: None,
        }),
        device_type: Some("desktop".to_string()),
        device_os: Some("Linux".to_string()),
        device_browser: Some("Firefox".to_string()),
        country: Some("US".to_string()),
        region: Some("California".to_string()),
        city: Some("San Francisco".to_string()),
    }
}

fn set_pv(event: &mut Event, f: impl FnOnce(&mut PageviewData)) {
    if let EventKind::Pageview(data) = &mut event.kind {
        f(data);
    }
}

fn custom_event(visitor: &str, session: &str, category: &str, action: &str, ts: &str) -> Event {
    let mut event = pageview(visitor, session, "/", ts);
    event.kind = EventKind::Custom(CustomData {
        category: Some(category.to_string()),
        action: Some(action.to_string()),
        label: None,
        value: None,
    });
    event
}

/// Four pageviews across the first week of June 2025:
///
/// - v1/s1 visits /a, /b, /a over 90 seconds on the 2nd (search referrer,
///   new visitor, desktop, US).
/// - v2/s2 bounces on /landing on the 3rd (facebook referrer, returning,
///   mobile, DE).
///
/// Expected over 2025-06-01..07: 4 pageviews, 2 visitors, 2 sessions,
/// bounce rate 50, average session duration 90.
async fn seed_week_fixture(state: &AppState) {
    let mut e1 = pageview("v1", "s1", "/a", "2025-06-02T10:00:00Z");
    set_pv(&mut e1, |d| {
        d.title = Some("Home".to_string());
        d.referrer = Some("https://www.google.com/search?q=x".to_string());
        d.is_new_visitor = Some(true);
    });

    let mut e2 = pageview("v1", "s1", "/b", "2025-06-02T10:00:30Z");
    set_pv(&mut e2, |d| d.time_on_page = Some(30.0));

    let mut e3 = pageview("v1", "s1", "/a", "2025-06-02T10:01:30Z");
    set_pv(&mut e3, |d| d.time_on_page = Some(60.0));

    let mut e4 = pageview("v2", "s2", "/landing", "2025-06-03T09:00:00Z");
    set_pv(&mut e4, |d| {
        d.referrer = Some("https://m.facebook.com/story".to_string());
        d.is_new_visitor = Some(false);
    });
    e4.device_type = Some("mobile".to_string());
    e4.device_os = Some("Android".to_string());
    e4.device_browser = Some("Chrome".to_string());
    e4.country = Some("DE".to_string());
    e4.region = None;
    e4.city = None;

    state
        .db
        .insert_events(&[e1, e2, e3, e4])
        .await
        .expect("seed events");
}

const WEEK: &str = "start_date=2025-06-01&end_date=2025-06-07";

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build request")
}

async fn json_body(response: axum::http::Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("parse JSON")
}

async fn body_text(response: axum::http::Response<Body>) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("utf8 body")
}

// ============================================================
// Overview report: totals, rates, gap-filled timeline
// ============================================================
#[tokio::test]
async fn test_overview_totals_and_timeline() {
    let (state, app) = setup().await;
    seed_week_fixture(&state).await;

    let response = app
        .oneshot(get(&format!("/api/analytics/overview/site_test?{WEEK}")))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;

    assert_eq!(json["overview"]["pageviews"], 4);
    assert_eq!(json["overview"]["visitors"], 2);
    assert_eq!(json["overview"]["sessions"], 2);
    assert_eq!(json["overview"]["bounceRate"], 50);
    assert_eq!(json["overview"]["avgSessionDuration"], 90);

    let timeline = json["overview"]["pageviewsOverTime"]
        .as_array()
        .expect("timeline array");
    assert_eq!(timeline.len(), 7, "one entry per day, empty days included");
    assert_eq!(timeline[0]["date"], "2025-06-01");
    assert_eq!(timeline[1]["date"], "2025-06-02");
    assert_eq!(timeline[1]["views"], 3);
    assert_eq!(timeline[1]["visitors"], 1);
    assert_eq!(timeline[2]["views"], 1);
    let total: i64 = timeline.iter().map(|p| p["views"].as_i64().unwrap()).sum();
    assert_eq!(total, 4, "timeline conserves the pageview count");

    assert!(json["timeRange"]["start"]
        .as_str()
        .expect("start string")
        .starts_with("2025-06-01T00:00:00"));
}

// ============================================================
// Overview: top pages, referrers, breakdowns
// ============================================================
#[tokio::test]
async fn test_overview_top_pages_and_referrers() {
    let (state, app) = setup().await;
    seed_week_fixture(&state).await;

    let response = app
        .oneshot(get(&format!("/api/analytics/overview/site_test?{WEEK}")))
        .await
        .expect("request");
    let json = json_body(response).await;

    let pages = json["topPages"].as_array().expect("pages array");
    assert_eq!(pages.len(), 3);
    assert_eq!(pages[0]["path"], "/a");
    assert_eq!(pages[0]["url"], "https://example.com/a");
    assert_eq!(pages[0]["views"], 2);
    assert_eq!(pages[0]["visitors"], 1);
    assert_eq!(pages[0]["title"], "Home");
    assert_eq!(pages[0]["avgTimeOnPage"], 30.0);
    // Tie on views resolves by path.
    assert_eq!(pages[1]["path"], "/b");
    assert_eq!(pages[2]["path"], "/landing");

    let referrers = json["referrers"].as_array().expect("referrers array");
    assert_eq!(referrers.len(), 2);
    let types: Vec<&str> = referrers
        .iter()
        .filter_map(|r| r["type"].as_str())
        .collect();
    assert!(types.contains(&"search"));
    assert!(types.contains(&"social"));

    assert_eq!(json["devices"]["desktop"], 1);
    assert_eq!(json["devices"]["mobile"], 1);
    assert_eq!(json["countries"]["US"], 1);
    assert_eq!(json["countries"]["DE"], 1);
}

// ============================================================
// Single-day window buckets by hour
// ============================================================
#[tokio::test]
async fn test_overview_single_day_is_hourly() {
    let (state, app) = setup().await;
    seed_week_fixture(&state).await;

    let response = app
        .oneshot(get(
            "/api/analytics/overview/site_test?start_date=2025-06-02&end_date=2025-06-02",
        ))
        .await
        .expect("request");
    let json = json_body(response).await;

    let timeline = json["overview"]["pageviewsOverTime"]
        .as_array()
        .expect("timeline array");
    assert_eq!(timeline.len(), 24);
    assert_eq!(timeline[10]["date"], "2025-06-02T10:00:00Z");
    assert_eq!(timeline[10]["views"], 3);
}

// ============================================================
// Pageviews endpoint: sorting and limit
// ============================================================
#[tokio::test]
async fn test_pageviews_sorting_and_limit() {
    let (state, app) = setup().await;
    seed_week_fixture(&state).await;

    let response = app
        .clone()
        .oneshot(get(&format!("/api/analytics/pageviews/site_test?{WEEK}")))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["pages"].as_array().expect("pages").len(), 3);

    let response = app
        .oneshot(get(&format!(
            "/api/analytics/pageviews/site_test?{WEEK}&limit=1"
        )))
        .await
        .expect("request");
    let json = json_body(response).await;
    let pages = json["pages"].as_array().expect("pages");
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0]["path"], "/a");
}

// ============================================================
// Referrers endpoint: classification, direct excluded
// ============================================================
#[tokio::test]
async fn test_referrers_classification() {
    let (state, app) = setup().await;
    seed_week_fixture(&state).await;

    let response = app
        .oneshot(get(&format!("/api/analytics/referrers/site_test?{WEEK}")))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;

    let referrers = json["referrers"].as_array().expect("referrers");
    // e2/e3 have no referrer (direct) and must not appear.
    assert_eq!(referrers.len(), 2);
    for r in referrers {
        assert!(r["views"].as_i64().expect("views") >= 1);
        assert!(r["source"].as_str().expect("source").starts_with("https://"));
    }
    let search = referrers
        .iter()
        .find(|r| r["type"] == "search")
        .expect("search referrer");
    assert_eq!(search["source"], "https://www.google.com/search?q=x");
}

// ============================================================
// Custom events endpoint: category/action grouping
// ============================================================
#[tokio::test]
async fn test_custom_events_report() {
    let (state, app) = setup().await;
    seed_week_fixture(&state).await;
    state
        .db
        .insert_events(&[
            custom_event("v1", "s1", "cta", "click", "2025-06-02T10:02:00Z"),
            custom_event("v2", "s2", "cta", "click", "2025-06-03T09:01:00Z"),
            custom_event("v2", "s2", "video", "play", "2025-06-03T09:02:00Z"),
        ])
        .await
        .expect("seed custom events");

    let response = app
        .oneshot(get(&format!("/api/analytics/events/site_test?{WEEK}")))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;

    let events = json["events"].as_array().expect("events array");
    // The four fixture pageviews must not leak into the custom-event rows.
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["category"], "cta");
    assert_eq!(events[0]["action"], "click");
    assert_eq!(events[0]["count"], 2);
    assert_eq!(events[0]["visitors"], 2);
    assert_eq!(events[1]["category"], "video");
    assert_eq!(events[1]["action"], "play");
    assert_eq!(events[1]["count"], 1);
}

// ============================================================
// Device / browser / location breakdowns
// ============================================================
#[tokio::test]
async fn test_device_browser_location_breakdowns() {
    let (state, app) = setup().await;
    seed_week_fixture(&state).await;

    let response = app
        .clone()
        .oneshot(get(&format!("/api/analytics/devices/site_test?{WEEK}")))
        .await
        .expect("request");
    let json = json_body(response).await;
    assert_eq!(json["devices"]["desktop"], 1);
    assert_eq!(json["devices"]["mobile"], 1);
    assert_eq!(json["operatingSystems"]["Linux"], 1);
    assert_eq!(json["operatingSystems"]["Android"], 1);

    let response = app
        .clone()
        .oneshot(get(&format!("/api/analytics/browsers/site_test?{WEEK}")))
        .await
        .expect("request");
    let json = json_body(response).await;
    assert_eq!(json["browsers"]["Firefox"], 1);
    assert_eq!(json["browsers"]["Chrome"], 1);

    let response = app
        .oneshot(get(&format!("/api/analytics/locations/site_test?{WEEK}")))
        .await
        .expect("request");
    let json = json_body(response).await;
    assert_eq!(json["countries"]["US"], 1);
    assert_eq!(json["countries"]["DE"], 1);
    assert_eq!(json["regions"]["California"], 1);
    // v2 has no region/city; it lands in the unknown bucket.
    assert_eq!(json["regions"]["unknown"], 1);
    assert_eq!(json["cities"]["San Francisco"], 1);
    assert_eq!(json["cities"]["unknown"], 1);
}

// ============================================================
// Visitors endpoint: totals, new/returning, timeline
// ============================================================
#[tokio::test]
async fn test_visitors_report() {
    let (state, app) = setup().await;
    seed_week_fixture(&state).await;

    let response = app
        .oneshot(get(&format!("/api/analytics/visitors/site_test?{WEEK}")))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;

    assert_eq!(json["total"], 2);
    assert_eq!(json["new"], 1);
    assert_eq!(json["returning"], 1);
    assert_eq!(json["granularity"], "day");
    assert_eq!(json["timeline"].as_array().expect("timeline").len(), 7);
}

// ============================================================
// Sessions endpoint
// ============================================================
#[tokio::test]
async fn test_sessions_report() {
    let (state, app) = setup().await;
    seed_week_fixture(&state).await;

    let response = app
        .oneshot(get(&format!("/api/analytics/sessions/site_test?{WEEK}")))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;

    assert_eq!(json["sessions"], 2);
    assert_eq!(json["bounceRate"], 50);
    assert_eq!(json["avgSessionDuration"], 90);
}

// ============================================================
// Realtime: trailing five-minute window only
// ============================================================
#[tokio::test]
async fn test_realtime_window() {
    let (state, app) = setup().await;

    let now = Utc::now();
    let mut live = pageview("v9", "s9", "/live", "2025-06-01T00:00:00Z");
    live.timestamp = now - chrono::Duration::seconds(30);
    let mut stale = pageview("v8", "s8", "/stale", "2025-06-01T00:00:00Z");
    stale.timestamp = now - chrono::Duration::minutes(10);
    state
        .db
        .insert_events(&[live, stale])
        .await
        .expect("seed events");

    let response = app
        .oneshot(get("/api/analytics/realtime/site_test"))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;

    assert_eq!(json["activeVisitors"], 1);
    assert_eq!(json["pageviews"], 1);
    let pages = json["currentPages"].as_array().expect("pages");
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0]["path"], "/live");
    assert_eq!(pages[0]["visitorId"], "v9");
}

// ============================================================
// Export: CSV headers, sanitization, disposition
// ============================================================
#[tokio::test]
async fn test_export_csv() {
    let (state, app) = setup().await;
    seed_week_fixture(&state).await;
    let mut hostile = pageview("v3", "s3", "=SUM(A1)", "2025-06-04T12:00:00Z");
    set_pv(&mut hostile, |d| d.title = Some("+plus".to_string()));
    state
        .db
        .insert_events(&[hostile])
        .await
        .expect("seed hostile event");

    let response = app
        .oneshot(get(&format!(
            "/api/analytics/export/site_test?{WEEK}&format=csv"
        )))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        Some("text/csv; charset=utf-8")
    );
    let disposition = response
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .expect("disposition header")
        .to_string();
    assert!(disposition.starts_with("attachment; filename=\"events-site_test-"));

    let body = body_text(response).await;
    let mut lines = body.lines();
    let header_line = lines.next().expect("header row");
    assert!(header_line.starts_with("site_id,visitor_id,session_id,type,timestamp"));
    assert_eq!(lines.count(), 5, "one row per event");
    assert!(
        body.contains("'=SUM(A1)"),
        "formula-prefixed path must be quoted"
    );
    assert!(
        body.contains("'+plus"),
        "formula-prefixed title must be quoted"
    );
}

// ============================================================
// Export: JSON passthrough
// ============================================================
#[tokio::test]
async fn test_export_json() {
    let (state, app) = setup().await;
    seed_week_fixture(&state).await;

    let response = app
        .oneshot(get(&format!(
            "/api/analytics/export/site_test?{WEEK}&format=json&type=pageview"
        )))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;

    assert_eq!(json["count"], 4);
    let events = json["events"].as_array().expect("events");
    assert_eq!(events.len(), 4);
    assert!(events.iter().all(|e| e["type"] == "pageview"));
    assert!(events.iter().all(|e| e["siteId"] == "site_test"));
}

// ============================================================
// Export: JSON is the default format
// ============================================================
#[tokio::test]
async fn test_export_defaults_to_json() {
    let (state, app) = setup().await;
    seed_week_fixture(&state).await;

    let response = app
        .oneshot(get(&format!("/api/analytics/export/site_test?{WEEK}")))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .expect("content type")
        .starts_with("application/json"));
    let json = json_body(response).await;
    assert_eq!(json["count"], 4);
}

// ============================================================
// Export: empty CSV is a 404 no_data
// ============================================================
#[tokio::test]
async fn test_export_empty_csv_is_no_data() {
    let (_state, app) = setup().await;

    let response = app
        .oneshot(get(
            "/api/analytics/export/site_test?start_date=2024-01-01&end_date=2024-01-07&format=csv",
        ))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "no_data");
}

// ============================================================
// Export: 90-day range cap
// ============================================================
#[tokio::test]
async fn test_export_range_cap() {
    let (_state, app) = setup().await;

    let response = app
        .oneshot(get(
            "/api/analytics/export/site_test?start_date=2025-01-01&end_date=2025-06-30",
        ))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "validation_error");
}

// ============================================================
// Error mapping: invalid period, reversed range, unknown site
// ============================================================
#[tokio::test]
async fn test_invalid_period_is_rejected() {
    let (_state, app) = setup().await;

    let response = app
        .oneshot(get("/api/analytics/overview/site_test?period=14x"))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "invalid_period");
}

#[tokio::test]
async fn test_reversed_range_is_rejected() {
    let (_state, app) = setup().await;

    let response = app
        .oneshot(get(
            "/api/analytics/overview/site_test?start_date=2025-06-07&end_date=2025-06-01",
        ))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "invalid_time_range");
}

#[tokio::test]
async fn test_unknown_site_is_404() {
    let (_state, app) = setup().await;

    let response = app
        .oneshot(get("/api/analytics/overview/site_missing?period=7d"))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "not_found");
}

// ============================================================
// Empty site still renders a complete, zeroed report
// ============================================================
#[tokio::test]
async fn test_empty_site_reports_zeros() {
    let (_state, app) = setup().await;

    let response = app
        .oneshot(get(&format!("/api/analytics/overview/site_test?{WEEK}")))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;

    assert_eq!(json["overview"]["pageviews"], 0);
    assert_eq!(json["overview"]["bounceRate"], 0);
    assert_eq!(
        json["overview"]["pageviewsOverTime"]
            .as_array()
            .expect("timeline")
            .len(),
        7,
        "timeline is gap-filled even with no events"
    );
    assert_eq!(json["topPages"].as_array().expect("pages").len(), 0);
}
