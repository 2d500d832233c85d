use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::Utc;

use crate::{error::AppError, routes::RangeQuery, state::AppState};

/// `GET /api/analytics/visitors/{site_id}` — visitor totals with the
/// new/returning split (client-reported first-visit flag) and the full
/// gap-filled timeline at the range's granularity.
#[tracing::instrument(skip(state))]
pub async fn get_visitors(
    State(state): State<Arc<AppState>>,
    Path(site_id): Path<String>,
    Query(query): Query<RangeQuery>,
) -> Result<impl IntoResponse, AppError> {
    if !state.is_valid_site(&site_id).await {
        return Err(AppError::NotFound("Site not found".to_string()));
    }

    let range = query.resolve(Utc::now())?;
    let report = state.engine.visitor_report(&site_id, range).await?;
    Ok(Json(report))
}
