use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::Utc;

use crate::{error::AppError, routes::RangeQuery, state::AppState};

/// `GET /api/analytics/devices/{site_id}` — distinct visitors per device
/// type and per operating system.
#[tracing::instrument(skip(state))]
pub async fn get_devices(
    State(state): State<Arc<AppState>>,
    Path(site_id): Path<String>,
    Query(query): Query<RangeQuery>,
) -> Result<impl IntoResponse, AppError> {
    if !state.is_valid_site(&site_id).await {
        return Err(AppError::NotFound("Site not found".to_string()));
    }

    let range = query.resolve(Utc::now())?;
    let report = state.engine.devices(&site_id, &range).await?;
    Ok(Json(report))
}

/// `GET /api/analytics/browsers/{site_id}` — distinct visitors per browser.
#[tracing::instrument(skip(state))]
pub async fn get_browsers(
    State(state): State<Arc<AppState>>,
    Path(site_id): Path<String>,
    Query(query): Query<RangeQuery>,
) -> Result<impl IntoResponse, AppError> {
    if !state.is_valid_site(&site_id).await {
        return Err(AppError::NotFound("Site not found".to_string()));
    }

    let range = query.resolve(Utc::now())?;
    let report = state.engine.browsers(&site_id, &range).await?;
    Ok(Json(report))
}

/// `GET /api/analytics/locations/{site_id}` — distinct visitors per
/// country, region and city.
#[tracing::instrument(skip(state))]
pub async fn get_locations(
    State(state): State<Arc<AppState>>,
    Path(site_id): Path<String>,
    Query(query): Query<RangeQuery>,
) -> Result<impl IntoResponse, AppError> {
    if !state.is_valid_site(&site_id).await {
        return Err(AppError::NotFound("Site not found".to_string()));
    }

    let range = query.resolve(Utc::now())?;
    let report = state.engine.locations(&site_id, &range).await?;
    Ok(Json(report))
}
