use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, response::IntoResponse, Json};
use chrono::Utc;
use serde_json::json;

use pulselytics_core::event::{TrackPayload, TrackRequest};
use pulselytics_core::Event;

use crate::{error::AppError, state::AppState};

/// Hard cap on events per request, single or bulk.
const MAX_BATCH: usize = 50;

/// `POST /api/track` — ingest a single event or a batch of up to 50 events.
///
/// No auth; events for unknown `site_id` values are rejected with 404.
/// Rate limited to 60 req/min per client IP (429 beyond that).
///
/// Enrichment applied before buffering:
/// - `device_type` / `device_os` / `device_browser` from the `User-Agent`
///   header via `woothee`.
/// - `country` / `region` / `city` via `maxminddb` GeoIP on the client IP
///   (non-fatal when the .mmdb file is absent; fields stay NULL).
/// - Missing client timestamps are stamped with the server's `Utc::now()`.
///
/// Responds `202 Accepted` with `{ "ok": true }`; writes land in the ingest
/// buffer and reach DuckDB on the next flush.
#[tracing::instrument(skip(state, headers, payload))]
pub async fn track(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<TrackRequest>,
) -> Result<impl IntoResponse, AppError> {
    let payloads = match payload {
        TrackRequest::Single(p) => vec![*p],
        TrackRequest::Batch(v) => v,
    };
    ingest(&state, &headers, payloads).await
}

/// `POST /api/track/bulk` — batch-only variant of [`track`], same rules.
#[tracing::instrument(skip(state, headers, payloads))]
pub async fn track_bulk(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payloads): Json<Vec<TrackPayload>>,
) -> Result<impl IntoResponse, AppError> {
    ingest(&state, &headers, payloads).await
}

async fn ingest(
    state: &AppState,
    headers: &HeaderMap,
    payloads: Vec<TrackPayload>,
) -> Result<impl IntoResponse, AppError> {
    let client_ip = extract_client_ip(headers);

    if !state.check_rate_limit(&client_ip).await {
        return Err(AppError::RateLimited);
    }

    if payloads.len() > MAX_BATCH {
        return Err(AppError::BatchTooLarge(payloads.len()));
    }

    if payloads.is_empty() {
        return Err(AppError::BadRequest("empty batch".to_string()));
    }

    for p in &payloads {
        if p.site_id.is_empty() || p.visitor_id.is_empty() || p.session_id.is_empty() {
            return Err(AppError::BadRequest(
                "siteId, visitorId and sessionId must be non-empty".to_string(),
            ));
        }
    }

    for p in &payloads {
        if !state.is_valid_site(&p.site_id).await {
            return Err(AppError::NotFound(format!("Unknown siteId: {}", p.site_id)));
        }
    }

    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    // One GeoIP + UA parse per request; a batch comes from one browser.
    let geo = lookup_geo(&state.config.geoip_path, &client_ip);
    let ua_info = parse_user_agent(&user_agent);

    let events: Vec<Event> = payloads
        .into_iter()
        .map(|p| Event {
            site_id: p.site_id,
            visitor_id: p.visitor_id,
            session_id: p.session_id,
            timestamp: p.timestamp.unwrap_or_else(Utc::now),
            kind: p.kind,
            device_type: ua_info.as_ref().map(|u| u.device_type.clone()),
            device_os: ua_info.as_ref().map(|u| u.os.clone()),
            device_browser: ua_info.as_ref().map(|u| u.browser.clone()),
            country: geo.as_ref().and_then(|g| g.country.clone()),
            region: geo.as_ref().and_then(|g| g.region.clone()),
            city: geo.as_ref().and_then(|g| g.city.clone()),
        })
        .collect();

    state.push_events(events).await;

    Ok((
        axum::http::StatusCode::ACCEPTED,
        Json(json!({ "ok": true })),
    ))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Extract the real client IP from `X-Forwarded-For` (first entry).
///
/// Falls back to `"unknown"` when the header is absent; the rate limiter
/// then treats all such clients as one bucket.
fn extract_client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// GeoIP result from a MaxMind lookup.
struct GeoInfo {
    country: Option<String>,
    region: Option<String>,
    city: Option<String>,
}

/// Attempt a GeoIP lookup for `ip` using the MaxMind database at `path`.
///
/// Returns `None` if the database file is missing or the IP cannot be
/// parsed; events are stored with NULL geo fields rather than rejected.
fn lookup_geo(path: &str, ip: &str) -> Option<GeoInfo> {
    use std::net::IpAddr;
    use std::str::FromStr;

    if !std::path::Path::new(path).exists() {
        // Database absent. Warning already logged at startup.
        return None;
    }

    let reader = maxminddb::Reader::open_readfile(path).ok()?;
    let ip_addr = IpAddr::from_str(ip).ok()?;

    let record: maxminddb::geoip2::City = reader.lookup(ip_addr).ok()?;

    let country = record
        .country
        .as_ref()
        .and_then(|c| c.iso_code)
        .map(|s| s.to_string());

    let region = record
        .subdivisions
        .as_ref()
        .and_then(|subs| subs.first())
        .and_then(|sub| sub.names.as_ref())
        .and_then(|names| names.get("en"))
        .map(|s| s.to_string());

    let city = record
        .city
        .as_ref()
        .and_then(|c| c.names.as_ref())
        .and_then(|names| names.get("en"))
        .map(|s| s.to_string());

    Some(GeoInfo {
        country,
        region,
        city,
    })
}

/// Parsed User-Agent fields.
struct UaInfo {
    browser: String,
    os: String,
    device_type: String,
}

/// Parse a `User-Agent` string via the `woothee` crate.
///
/// Returns `None` if the UA string is empty or `woothee` cannot classify it.
fn parse_user_agent(user_agent: &str) -> Option<UaInfo> {
    if user_agent.is_empty() {
        return None;
    }

    let result = woothee::parser::Parser::new().parse(user_agent)?;

    // woothee categories map onto the three-bucket device convention:
    //   "smartphone" / "mobilephone" → "mobile"
    //   "tablet"                     → "tablet"
    //   everything else              → "desktop"
    let device_type = match result.category {
        "smartphone" | "mobilephone" => "mobile",
        "tablet" => "tablet",
        _ => "desktop",
    }
    .to_string();

    Some(UaInfo {
        browser: result.name.to_string(),
        os: result.os.to_string(),
        device_type,
    })
}
