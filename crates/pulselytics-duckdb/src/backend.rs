use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use duckdb::Connection;
use tokio::sync::Mutex;
use tracing::{debug, info};

use pulselytics_core::event::{
    CustomData, ErrorData, Event, EventKind, EventType, ExitData, PageviewData,
};
use pulselytics_core::store::EventStore;
use pulselytics_core::timerange::TimeRange;

use crate::schema::init_sql;

/// Naive-UTC timestamp wire format, microsecond precision. The read path
/// asks DuckDB for the same shape via `strftime`, so stored instants
/// round-trip exactly.
const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.format(TS_FORMAT).to_string()
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    Ok(NaiveDateTime::parse_from_str(raw, TS_FORMAT)?.and_utc())
}

/// A DuckDB event store.
///
/// DuckDB is single-writer: concurrent reads are fine, but concurrent
/// writes contend. The connection sits behind `Arc<Mutex<_>>` so the async
/// runtime serialises writes through the buffer-flush task while the struct
/// stays cheap to clone into Axum handlers.
///
/// Memory and thread limits are applied by [`init_sql`] at open time.
pub struct DuckDbBackend {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl DuckDbBackend {
    /// Open (or create) a DuckDB database file at `path`.
    ///
    /// `memory_limit` is a DuckDB size string such as `"512MB"`, read from
    /// `Config.duckdb_memory_limit` at the call site.
    pub fn open(path: &str, memory_limit: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(&init_sql(memory_limit))?;
        info!(path, memory_limit, "DuckDB opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database. Intended for tests; data is discarded
    /// when the handle drops.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(&init_sql("1GB"))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// `SELECT 1` liveness probe for the health endpoint.
    pub async fn ping(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute_batch("SELECT 1")?;
        Ok(())
    }

    /// Acquire the connection lock for direct queries. Intended for
    /// integration tests that verify stored rows; production code goes
    /// through the typed methods.
    pub async fn conn_for_test(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.conn.lock().await
    }

    /// Whether a site row exists. Checked at track time so events for
    /// unknown sites are rejected before they enter the buffer.
    pub async fn site_exists(&self, site_id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT COUNT(*) FROM sites WHERE id = ?1")?;
        let count: i64 = stmt.query_row(duckdb::params![site_id], |row| row.get(0))?;
        Ok(count > 0)
    }

    /// Insert a batch of enriched events in a single transaction (one fsync
    /// instead of N). No-op for an empty batch.
    pub async fn insert_events(&self, events: &[Event]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        for event in events {
            let cols = VariantColumns::from_kind(&event.kind)?;
            tx.execute(
                r#"INSERT INTO events (
                    id, site_id, visitor_id, session_id, event_type, timestamp,
                    url, path, title, referrer, time_on_page, is_new_visitor,
                    category, action, label, value,
                    message, stack, source,
                    device_type, device_os, device_browser, country, region, city
                ) VALUES (
                    ?1,  ?2,  ?3,  ?4,  ?5,  ?6,
                    ?7,  ?8,  ?9,  ?10, ?11, ?12,
                    ?13, ?14, ?15, ?16,
                    ?17, ?18, ?19,
                    ?20, ?21, ?22, ?23, ?24, ?25
                )"#,
                duckdb::params![
                    uuid::Uuid::new_v4().to_string(),
                    event.site_id,
                    event.visitor_id,
                    event.session_id,
                    event.event_type().as_str(),
                    format_ts(event.timestamp),
                    cols.url,
                    cols.path,
                    cols.title,
                    cols.referrer,
                    cols.time_on_page,
                    cols.is_new_visitor,
                    cols.category,
                    cols.action,
                    cols.label,
                    cols.value,
                    cols.message,
                    cols.stack,
                    cols.source,
                    event.device_type,
                    event.device_os,
                    event.device_browser,
                    event.country,
                    event.region,
                    event.city,
                ],
            )?;
        }
        tx.commit()?;
        debug!(count = events.len(), "inserted events");
        Ok(())
    }

    /// All events for a site within the inclusive range, optionally
    /// filtered by type, in timestamp order. Reducers are order-insensitive
    /// but export files and first-seen tie-breaks read chronologically.
    pub async fn fetch_events(
        &self,
        site_id: &str,
        range: &TimeRange,
        event_type: Option<EventType>,
    ) -> Result<Vec<Event>> {
        const BASE_SQL: &str = r#"SELECT
            site_id, visitor_id, session_id,
            strftime(timestamp, '%Y-%m-%d %H:%M:%S.%f'),
            event_type,
            url, path, title, referrer, time_on_page, is_new_visitor,
            category, action, label, value,
            message, stack, source,
            device_type, device_os, device_browser, country, region, city
        FROM events
        WHERE site_id = ?1
          AND timestamp BETWEEN CAST(?2 AS TIMESTAMP) AND CAST(?3 AS TIMESTAMP)"#;

        let conn = self.conn.lock().await;

        let (sql, params): (String, Vec<Box<dyn duckdb::types::ToSql>>) = match event_type {
            Some(event_type) => (
                format!("{BASE_SQL} AND event_type = ?4 ORDER BY timestamp"),
                vec![
                    Box::new(site_id.to_string()) as Box<dyn duckdb::types::ToSql>,
                    Box::new(format_ts(range.start)),
                    Box::new(format_ts(range.end)),
                    Box::new(event_type.as_str().to_string()),
                ],
            ),
            None => (
                format!("{BASE_SQL} ORDER BY timestamp"),
                vec![
                    Box::new(site_id.to_string()) as Box<dyn duckdb::types::ToSql>,
                    Box::new(format_ts(range.start)),
                    Box::new(format_ts(range.end)),
                ],
            ),
        };

        let param_refs: Vec<&dyn duckdb::types::ToSql> =
            params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            Ok(EventRow {
                site_id: row.get(0)?,
                visitor_id: row.get(1)?,
                session_id: row.get(2)?,
                timestamp: row.get(3)?,
                event_type: row.get(4)?,
                url: row.get(5)?,
                path: row.get(6)?,
                title: row.get(7)?,
                referrer: row.get(8)?,
                time_on_page: row.get(9)?,
                is_new_visitor: row.get(10)?,
                category: row.get(11)?,
                action: row.get(12)?,
                label: row.get(13)?,
                value: row.get(14)?,
                message: row.get(15)?,
                stack: row.get(16)?,
                source: row.get(17)?,
                device_type: row.get(18)?,
                device_os: row.get(19)?,
                device_browser: row.get(20)?,
                country: row.get(21)?,
                region: row.get(22)?,
                city: row.get(23)?,
            })
        })?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row?.into_event()?);
        }
        Ok(events)
    }
}

#[async_trait]
impl EventStore for DuckDbBackend {
    async fn insert_events(&self, events: &[Event]) -> Result<()> {
        DuckDbBackend::insert_events(self, events).await
    }

    async fn fetch_events(
        &self,
        site_id: &str,
        range: &TimeRange,
        event_type: Option<EventType>,
    ) -> Result<Vec<Event>> {
        DuckDbBackend::fetch_events(self, site_id, range, event_type).await
    }
}

/// Per-variant column values for one INSERT. Everything outside the
/// variant that owns a column stays NULL.
#[derive(Default)]
struct VariantColumns<'a> {
    url: Option<&'a str>,
    path: Option<&'a str>,
    title: Option<&'a str>,
    referrer: Option<&'a str>,
    time_on_page: Option<f64>,
    is_new_visitor: Option<bool>,
    category: Option<&'a str>,
    action: Option<&'a str>,
    label: Option<&'a str>,
    value: Option<String>,
    message: Option<&'a str>,
    stack: Option<&'a str>,
    source: Option<&'a str>,
}

impl<'a> VariantColumns<'a> {
    fn from_kind(kind: &'a EventKind) -> Result<Self> {
        let mut cols = Self::default();
        match kind {
            EventKind::Pageview(data) => {
                cols.url = Some(&data.url);
                cols.path = Some(&data.path);
                cols.title = data.title.as_deref();
                cols.referrer = data.referrer.as_deref();
                cols.time_on_page = data.time_on_page;
                cols.is_new_visitor = data.is_new_visitor;
            }
            EventKind::Custom(data) => {
                cols.category = data.category.as_deref();
                cols.action = data.action.as_deref();
                cols.label = data.label.as_deref();
                cols.value = data
                    .value
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?;
            }
            EventKind::Error(data) => {
                cols.message = Some(&data.message);
                cols.stack = data.stack.as_deref();
                cols.source = data.source.as_deref();
            }
            EventKind::Exit(data) => {
                cols.path = data.path.as_deref();
                cols.time_on_page = data.time_on_page;
            }
        }
        Ok(cols)
    }
}

/// Raw row as DuckDB hands it back; converted to the typed [`Event`]
/// outside the row closure so parse errors surface as `anyhow`.
struct EventRow {
    site_id: String,
    visitor_id: String,
    session_id: String,
    timestamp: String,
    event_type: String,
    url: Option<String>,
    path: Option<String>,
    title: Option<String>,
    referrer: Option<String>,
    time_on_page: Option<f64>,
    is_new_visitor: Option<bool>,
    category: Option<String>,
    action: Option<String>,
    label: Option<String>,
    value: Option<String>,
    message: Option<String>,
    stack: Option<String>,
    source: Option<String>,
    device_type: Option<String>,
    device_os: Option<String>,
    device_browser: Option<String>,
    country: Option<String>,
    region: Option<String>,
    city: Option<String>,
}

impl EventRow {
    fn into_event(self) -> Result<Event> {
        let timestamp = parse_ts(&self.timestamp)?;
        let kind = match self.event_type.as_str() {
            "pageview" => EventKind::Pageview(PageviewData {
                url: self.url.unwrap_or_default(),
                path: self.path.unwrap_or_default(),
                title: self.title,
                referrer: self.referrer,
                time_on_page: self.time_on_page,
                is_new_visitor: self.is_new_visitor,
            }),
            "event" => EventKind::Custom(CustomData {
                category: self.category,
                action: self.action,
                label: self.label,
                value: self
                    .value
                    .as_deref()
                    .map(serde_json::from_str)
                    .transpose()?,
            }),
            "error" => EventKind::Error(ErrorData {
                message: self.message.unwrap_or_default(),
                stack: self.stack,
                source: self.source,
            }),
            "exit" => EventKind::Exit(ExitData {
                path: self.path,
                time_on_page: self.time_on_page,
            }),
            other => anyhow::bail!("unknown event type in store: {other}"),
        };
        Ok(Event {
            site_id: self.site_id,
            visitor_id: self.visitor_id,
            session_id: self.session_id,
            timestamp,
            kind,
            device_type: self.device_type,
            device_os: self.device_os,
            device_browser: self.device_browser,
            country: self.country,
            region: self.region,
            city: self.city,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn pageview(site: &str, visitor: &str, path: &str, ts: &str) -> Event {
        Event {
            site_id: site.to_string(),
            visitor_id: visitor.to_string(),
            session_id: format!("session-{visitor}"),
            timestamp: at(ts),
            kind: EventKind::Pageview(PageviewData {
                url: format!("https://example.com{path}"),
                path: path.to_string(),
                title: Some("Example".to_string()),
                referrer: Some("https://www.google.com/".to_string()),
                time_on_page: Some(12.5),
                is_new_visitor: Some(true),
            }),
            device_type: Some("desktop".to_string()),
            device_os: Some("Linux".to_string()),
            device_browser: Some("Firefox".to_string()),
            country: Some("DE".to_string()),
            region: Some("Berlin".to_string()),
            city: Some("Berlin".to_string()),
        }
    }

    async fn setup() -> DuckDbBackend {
        let backend = DuckDbBackend::open_in_memory().unwrap();
        backend
            .seed_site("site_test", "Test", "example.com")
            .await
            .unwrap();
        backend
    }

    fn full_range() -> TimeRange {
        TimeRange::explicit(at("2025-06-01T00:00:00Z"), at("2025-06-30T23:59:59.999Z"))
            .unwrap()
    }

    #[tokio::test]
    async fn round_trip_preserves_every_variant() {
        let backend = setup().await;
        let mut custom = pageview("site_test", "v1", "/", "2025-06-01T10:00:00.123456Z");
        custom.kind = EventKind::Custom(CustomData {
            category: Some("video".to_string()),
            action: Some("play".to_string()),
            label: None,
            value: Some(json!({"position": 3, "muted": false})),
        });
        let mut error = pageview("site_test", "v1", "/", "2025-06-01T10:01:00Z");
        error.kind = EventKind::Error(ErrorData {
            message: "TypeError: x is undefined".to_string(),
            stack: Some("at main.js:10".to_string()),
            source: Some("main.js".to_string()),
        });
        let mut exit = pageview("site_test", "v1", "/", "2025-06-01T10:02:00Z");
        exit.kind = EventKind::Exit(ExitData {
            path: Some("/checkout".to_string()),
            time_on_page: Some(45.0),
        });
        let events = vec![
            pageview("site_test", "v1", "/pricing", "2025-06-01T09:59:00Z"),
            custom,
            error,
            exit,
        ];

        backend.insert_events(&events).await.unwrap();
        let mut fetched = backend
            .fetch_events("site_test", &full_range(), None)
            .await
            .unwrap();
        fetched.sort_by_key(|e| e.timestamp);

        assert_eq!(fetched.len(), 4);
        let pv = fetched[0].pageview().unwrap();
        assert_eq!(pv.path, "/pricing");
        assert_eq!(pv.time_on_page, Some(12.5));
        assert_eq!(pv.is_new_visitor, Some(true));
        assert_eq!(fetched[0].country.as_deref(), Some("DE"));

        match &fetched[1].kind {
            EventKind::Custom(data) => {
                assert_eq!(data.category.as_deref(), Some("video"));
                assert_eq!(data.value, Some(json!({"position": 3, "muted": false})));
            }
            other => panic!("expected custom, got {other:?}"),
        }
        assert_eq!(
            fetched[1].timestamp,
            at("2025-06-01T10:00:00.123456Z"),
            "microsecond precision must survive the round trip"
        );

        match &fetched[2].kind {
            EventKind::Error(data) => {
                assert_eq!(data.message, "TypeError: x is undefined");
                assert_eq!(data.stack.as_deref(), Some("at main.js:10"));
            }
            other => panic!("expected error, got {other:?}"),
        }

        match &fetched[3].kind {
            EventKind::Exit(data) => {
                assert_eq!(data.path.as_deref(), Some("/checkout"));
                assert_eq!(data.time_on_page, Some(45.0));
            }
            other => panic!("expected exit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fetch_bounds_are_inclusive_at_both_ends() {
        let backend = setup().await;
        let range = TimeRange::explicit(
            at("2025-06-10T00:00:00Z"),
            at("2025-06-10T23:59:59.999Z"),
        )
        .unwrap();
        backend
            .insert_events(&[
                pageview("site_test", "v1", "/start", "2025-06-10T00:00:00Z"),
                pageview("site_test", "v2", "/end", "2025-06-10T23:59:59.999Z"),
                pageview("site_test", "v3", "/before", "2025-06-09T23:59:59.999Z"),
                pageview("site_test", "v4", "/after", "2025-06-11T00:00:00Z"),
            ])
            .await
            .unwrap();

        let mut fetched = backend
            .fetch_events("site_test", &range, None)
            .await
            .unwrap();
        fetched.sort_by_key(|e| e.timestamp);
        let paths: Vec<_> = fetched
            .iter()
            .filter_map(|e| e.pageview().map(|pv| pv.path.clone()))
            .collect();
        assert_eq!(paths, vec!["/start", "/end"]);
    }

    #[tokio::test]
    async fn type_filter_matches_exactly() {
        let backend = setup().await;
        let mut custom = pageview("site_test", "v1", "/", "2025-06-01T10:00:00Z");
        custom.kind = EventKind::Custom(CustomData {
            category: None,
            action: None,
            label: None,
            value: None,
        });
        backend
            .insert_events(&[
                pageview("site_test", "v1", "/a", "2025-06-01T09:00:00Z"),
                custom,
            ])
            .await
            .unwrap();

        let pageviews = backend
            .fetch_events("site_test", &full_range(), Some(EventType::Pageview))
            .await
            .unwrap();
        assert_eq!(pageviews.len(), 1);
        assert!(pageviews[0].is_pageview());

        let customs = backend
            .fetch_events("site_test", &full_range(), Some(EventType::Custom))
            .await
            .unwrap();
        assert_eq!(customs.len(), 1);
        assert_eq!(customs[0].event_type(), EventType::Custom);

        let errors = backend
            .fetch_events("site_test", &full_range(), Some(EventType::Error))
            .await
            .unwrap();
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn sites_are_isolated() {
        let backend = setup().await;
        backend
            .seed_site("site_other", "Other", "other.example")
            .await
            .unwrap();
        backend
            .insert_events(&[pageview("site_other", "v1", "/", "2025-06-01T10:00:00Z")])
            .await
            .unwrap();

        let fetched = backend
            .fetch_events("site_test", &full_range(), None)
            .await
            .unwrap();
        assert!(fetched.is_empty());
    }

    #[tokio::test]
    async fn empty_batch_is_a_noop() {
        let backend = setup().await;
        backend.insert_events(&[]).await.unwrap();
        let conn = backend.conn_for_test().await;
        let count: i64 = conn
            .prepare("SELECT COUNT(*) FROM events")
            .unwrap()
            .query_row([], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn ping_succeeds_on_open_database() {
        let backend = setup().await;
        backend.ping().await.unwrap();
    }

    #[tokio::test]
    async fn site_exists_reflects_seeded_rows() {
        let backend = setup().await;
        assert!(backend.site_exists("site_test").await.unwrap());
        assert!(!backend.site_exists("site_missing").await.unwrap());
    }
}
