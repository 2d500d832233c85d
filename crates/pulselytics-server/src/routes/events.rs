use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::{error::AppError, routes::resolve_range, state::AppState};

const DEFAULT_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub period: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub limit: Option<usize>,
}

/// `GET /api/analytics/events/{site_id}` — custom-event totals grouped by
/// category/action pair, most frequent first. Pageviews, errors and exits
/// never appear here. `limit` defaults to 50.
#[tracing::instrument(skip(state))]
pub async fn get_events(
    State(state): State<Arc<AppState>>,
    Path(site_id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Result<impl IntoResponse, AppError> {
    if !state.is_valid_site(&site_id).await {
        return Err(AppError::NotFound("Site not found".to_string()));
    }

    let range = resolve_range(
        query.period.as_deref(),
        query.start_date.as_deref(),
        query.end_date.as_deref(),
        Utc::now(),
    )?;
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    let events = state.engine.custom_events(&site_id, &range, limit).await?;
    Ok(Json(json!({ "timeRange": range, "events": events })))
}
