use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use chrono::Utc;

use crate::{error::AppError, state::AppState};

/// `GET /api/analytics/realtime/{site_id}` — activity in the trailing
/// five-minute window: active visitors, pageview count, and the page each
/// visitor is currently on (newest first, capped at 50).
#[tracing::instrument(skip(state))]
pub async fn get_realtime(
    State(state): State<Arc<AppState>>,
    Path(site_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    if !state.is_valid_site(&site_id).await {
        return Err(AppError::NotFound("Site not found".to_string()));
    }

    let snapshot = state.engine.realtime(&site_id, Utc::now()).await?;
    Ok(Json(snapshot))
}
