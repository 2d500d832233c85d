/// DuckDB initialization SQL.
///
/// Executed once at database open time via `Connection::execute_batch`.
/// All statements use `IF NOT EXISTS` so they are safe to re-run on every
/// startup.
///
/// `memory_limit` is a DuckDB size string ("512MB", "1GB", ...) taken from
/// `Config.duckdb_memory_limit`. An explicit limit is always set: DuckDB's
/// default of 80% of system RAM is not acceptable for a server process.
/// `threads = 2` bounds the background pool for single-writer embedded use.
///
/// Timestamps are stored as naive UTC. The write path formats
/// `%Y-%m-%d %H:%M:%S%.6f` strings and the read path asks DuckDB for the
/// same shape via `strftime`, so values round-trip at microsecond precision
/// without any time-zone involvement.
pub fn init_sql(memory_limit: &str) -> String {
    format!(
        r#"SET memory_limit = '{memory_limit}';
SET threads = 2;

-- ===========================================
-- SITES
-- ===========================================
CREATE TABLE IF NOT EXISTS sites (
    id              VARCHAR PRIMARY KEY,           -- 'site_' + 10 random alphanumerics
    name            VARCHAR NOT NULL,
    domain          VARCHAR NOT NULL,
    created_at      TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at      TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

-- ===========================================
-- EVENTS (append-only fact table)
-- ===========================================
-- One row per tracking event. The envelope columns are always populated;
-- the per-variant columns are NULL outside the variant that owns them
-- (url/path/title/referrer/timeOnPage/isNewVisitor for pageviews,
-- category/action/label/value for custom events, message/stack/source for
-- errors, path/timeOnPage again for exits).
CREATE TABLE IF NOT EXISTS events (
    -- Identity
    id              VARCHAR NOT NULL,              -- UUID v4, assigned at insert
    site_id         VARCHAR NOT NULL,
    visitor_id      VARCHAR NOT NULL,              -- client-generated, stable across sessions
    session_id      VARCHAR NOT NULL,              -- client-generated, rotates after inactivity
    event_type      VARCHAR NOT NULL,              -- 'pageview' | 'event' | 'error' | 'exit'
    timestamp       TIMESTAMP NOT NULL,            -- naive UTC

    -- Pageview / exit
    url             VARCHAR,
    path            VARCHAR,
    title           VARCHAR,
    referrer        VARCHAR,
    time_on_page    DOUBLE,
    is_new_visitor  BOOLEAN,

    -- Custom event
    category        VARCHAR,
    action          VARCHAR,
    label           VARCHAR,
    value           VARCHAR,                       -- JSON string

    -- Error
    message         VARCHAR,
    stack           VARCHAR,
    source          VARCHAR,

    -- Enrichment (derived once at ingest, never recomputed)
    device_type     VARCHAR,                       -- 'desktop' | 'mobile' | 'tablet'
    device_os       VARCHAR,
    device_browser  VARCHAR,
    country         VARCHAR(2),                    -- ISO 3166-1 alpha-2
    region          VARCHAR,
    city            VARCHAR
);

-- Primary query pattern: site + date range
CREATE INDEX IF NOT EXISTS idx_events_site_time
    ON events(site_id, timestamp DESC);

-- Accelerates type-filtered range fetches (pageview-only endpoints)
CREATE INDEX IF NOT EXISTS idx_events_site_type_time
    ON events(site_id, event_type, timestamp);

-- Accelerates session-level groupings
CREATE INDEX IF NOT EXISTS idx_events_site_session_time
    ON events(site_id, session_id, timestamp);

-- Breakdown dimensions
CREATE INDEX IF NOT EXISTS idx_events_site_country_time
    ON events(site_id, country, timestamp);
CREATE INDEX IF NOT EXISTS idx_events_site_device_time
    ON events(site_id, device_type, timestamp);
"#
    )
}
