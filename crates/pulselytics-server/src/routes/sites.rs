use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use pulselytics_duckdb::CreateSiteParams;

use crate::{error::AppError, state::AppState};

/// `POST /api/sites` — register a site and mint its tracking id.
///
/// Returns `201 Created` with the stored row, including the generated
/// `site_`-prefixed id the snippet embeds.
#[tracing::instrument(skip(state, params))]
pub async fn create_site(
    State(state): State<Arc<AppState>>,
    Json(params): Json<CreateSiteParams>,
) -> Result<impl IntoResponse, AppError> {
    if params.name.trim().is_empty() || params.domain.trim().is_empty() {
        return Err(AppError::BadRequest(
            "name and domain must be non-empty".to_string(),
        ));
    }

    let site = state.db.create_site(&params).await?;
    // Track requests for the new site should not pay the DB-lookup miss.
    state.site_cache.write().await.insert(site.id.clone());
    Ok((StatusCode::CREATED, Json(site)))
}

/// `GET /api/sites` — all registered sites, oldest first.
#[tracing::instrument(skip(state))]
pub async fn list_sites(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let sites = state.db.list_sites().await?;
    Ok(Json(sites))
}
