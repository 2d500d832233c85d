use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::Utc;

use crate::{error::AppError, routes::RangeQuery, state::AppState};

/// `GET /api/analytics/overview/{site_id}` — the full dashboard document:
/// overview counts and rates, the gap-filled pageview timeline, top pages,
/// referrers, and the device/country breakdowns.
#[tracing::instrument(skip(state))]
pub async fn get_overview(
    State(state): State<Arc<AppState>>,
    Path(site_id): Path<String>,
    Query(query): Query<RangeQuery>,
) -> Result<impl IntoResponse, AppError> {
    if !state.is_valid_site(&site_id).await {
        return Err(AppError::NotFound("Site not found".to_string()));
    }

    let range = query.resolve(Utc::now())?;
    let report = state.engine.site_report(&site_id, range).await?;
    Ok(Json(report))
}
