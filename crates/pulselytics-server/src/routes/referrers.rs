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

const DEFAULT_LIMIT: usize = 20;

#[derive(Debug, Deserialize)]
pub struct ReferrersQuery {
    pub period: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub limit: Option<usize>,
}

/// `GET /api/analytics/referrers/{site_id}` — traffic sources grouped by
/// raw referrer string, classified (search/social/email/other), sorted by
/// views descending. Direct visits (no referrer) are excluded from the
/// list. `limit` defaults to 20.
#[tracing::instrument(skip(state))]
pub async fn get_referrers(
    State(state): State<Arc<AppState>>,
    Path(site_id): Path<String>,
    Query(query): Query<ReferrersQuery>,
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
    let referrers = state.engine.referrers(&site_id, &range, limit).await?;
    Ok(Json(json!({ "timeRange": range, "referrers": referrers })))
}
