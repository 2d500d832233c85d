use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use pulselytics_core::event::EventKind;
use pulselytics_core::{Event, EventType};

use crate::{error::AppError, routes::resolve_range, state::AppState};

/// Maximum date range allowed for export (90 days).
const MAX_EXPORT_DAYS: i64 = 90;

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub period: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    /// `json` (default) or `csv`.
    pub format: Option<String>,
    /// Optional event-type filter: `pageview`, `event`, `error` or `exit`.
    #[serde(rename = "type")]
    pub event_type: Option<String>,
}

/// `GET /api/analytics/export/{site_id}` — download raw events.
///
/// JSON (the default) returns the event array unchanged. CSV streams back
/// with `Content-Disposition: attachment` and spreadsheet formula-injection
/// sanitization; an empty CSV export is a 404 `no_data`. Ranges longer than
/// 90 days are rejected.
#[tracing::instrument(skip(state))]
pub async fn export_events(
    State(state): State<Arc<AppState>>,
    Path(site_id): Path<String>,
    Query(q): Query<ExportQuery>,
) -> Result<Response, AppError> {
    if !state.is_valid_site(&site_id).await {
        return Err(AppError::NotFound("Site not found".to_string()));
    }

    let range = resolve_range(
        q.period.as_deref(),
        q.start_date.as_deref(),
        q.end_date.as_deref(),
        Utc::now(),
    )?;

    if range.span_days() > MAX_EXPORT_DAYS {
        return Err(AppError::BadRequest(format!(
            "date range too large: {} days (max {MAX_EXPORT_DAYS})",
            range.span_days()
        )));
    }

    let event_type = match q.event_type.as_deref() {
        None => None,
        Some(raw) => Some(EventType::parse(raw).ok_or_else(|| {
            AppError::BadRequest(format!(
                "unsupported type: {raw}; expected pageview, event, error or exit"
            ))
        })?),
    };

    let format = q.format.as_deref().unwrap_or("json");
    if format != "csv" && format != "json" {
        return Err(AppError::BadRequest(format!(
            "unsupported format: {format}; expected csv or json"
        )));
    }

    let events = state.engine.export(&site_id, &range, event_type).await?;

    if format == "json" {
        return Ok(Json(json!({
            "timeRange": range,
            "count": events.len(),
            "events": events,
        }))
        .into_response());
    }

    if events.is_empty() {
        return Err(AppError::NoData);
    }

    let filename = format!(
        "events-{}-{}-{}.csv",
        site_id,
        range.start.format("%Y-%m-%d"),
        range.end.format("%Y-%m-%d")
    );
    let csv_bytes = Bytes::from(build_csv(&events)?);
    build_csv_response(&filename, csv_bytes)
}

/// Sanitize a CSV field value against formula injection.
///
/// Spreadsheet apps (Excel, Google Sheets, LibreOffice) interpret values
/// that begin with `=`, `+`, `-`, `@`, TAB, or CR as formula expressions.
/// Prepending a single quote (`'`) makes them treat the value as a literal.
fn sanitize_csv_field(val: &str) -> std::borrow::Cow<'_, str> {
    if val.starts_with(['=', '+', '-', '@', '\t', '\r']) {
        std::borrow::Cow::Owned(format!("'{val}"))
    } else {
        std::borrow::Cow::Borrowed(val)
    }
}

const CSV_HEADERS: [&str; 22] = [
    "site_id",
    "visitor_id",
    "session_id",
    "type",
    "timestamp",
    "url",
    "path",
    "title",
    "referrer",
    "time_on_page",
    "category",
    "action",
    "label",
    "value",
    "message",
    "source",
    "device_type",
    "device_os",
    "device_browser",
    "country",
    "region",
    "city",
];

/// One flat CSV row per event; per-variant columns are blank where the
/// variant does not carry them.
fn csv_row(event: &Event) -> Vec<String> {
    let mut url = String::new();
    let mut path = String::new();
    let mut title = String::new();
    let mut referrer = String::new();
    let mut time_on_page = String::new();
    let mut category = String::new();
    let mut action = String::new();
    let mut label = String::new();
    let mut value = String::new();
    let mut message = String::new();
    let mut source = String::new();

    match &event.kind {
        EventKind::Pageview(data) => {
            url = data.url.clone();
            path = data.path.clone();
            title = data.title.clone().unwrap_or_default();
            referrer = data.referrer.clone().unwrap_or_default();
            time_on_page = data.time_on_page.map(|t| t.to_string()).unwrap_or_default();
        }
        EventKind::Custom(data) => {
            category = data.category.clone().unwrap_or_default();
            action = data.action.clone().unwrap_or_default();
            label = data.label.clone().unwrap_or_default();
            value = data.value.as_ref().map(|v| v.to_string()).unwrap_or_default();
        }
        EventKind::Error(data) => {
            message = data.message.clone();
            source = data.source.clone().unwrap_or_default();
        }
        EventKind::Exit(data) => {
            path = data.path.clone().unwrap_or_default();
            time_on_page = data.time_on_page.map(|t| t.to_string()).unwrap_or_default();
        }
    }

    vec![
        event.site_id.clone(),
        event.visitor_id.clone(),
        event.session_id.clone(),
        event.event_type().as_str().to_string(),
        event.timestamp.to_rfc3339(),
        url,
        path,
        title,
        referrer,
        time_on_page,
        category,
        action,
        label,
        value,
        message,
        source,
        event.device_type.clone().unwrap_or_default(),
        event.device_os.clone().unwrap_or_default(),
        event.device_browser.clone().unwrap_or_default(),
        event.country.clone().unwrap_or_default(),
        event.region.clone().unwrap_or_default(),
        event.city.clone().unwrap_or_default(),
    ]
}

fn build_csv(events: &[Event]) -> anyhow::Result<Vec<u8>> {
    let mut wtr = csv::Writer::from_writer(Vec::with_capacity(events.len().saturating_mul(256)));

    wtr.write_record(CSV_HEADERS)
        .map_err(|e| anyhow::anyhow!("csv write_record failed: {e}"))?;

    for event in events {
        let row = csv_row(event);
        wtr.write_record(row.iter().map(|field| sanitize_csv_field(field).into_owned()))
            .map_err(|e| anyhow::anyhow!("csv write_record failed: {e}"))?;
    }

    wtr.into_inner()
        .map_err(|e| anyhow::anyhow!("csv flush failed: {e}"))
}

fn build_csv_response(filename: &str, csv_bytes: Bytes) -> Result<Response, AppError> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/csv; charset=utf-8")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        )
        .body(axum::body::Body::from(csv_bytes))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("response build failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formula_prefixes_are_quoted() {
        assert_eq!(sanitize_csv_field("=cmd()"), "'=cmd()");
        assert_eq!(sanitize_csv_field("+1"), "'+1");
        assert_eq!(sanitize_csv_field("-1"), "'-1");
        assert_eq!(sanitize_csv_field("@A1"), "'@A1");
        assert_eq!(sanitize_csv_field("\tx"), "'\tx");
    }

    #[test]
    fn plain_values_pass_through() {
        assert_eq!(sanitize_csv_field("/pricing"), "/pricing");
        assert_eq!(sanitize_csv_field(""), "");
    }
}
