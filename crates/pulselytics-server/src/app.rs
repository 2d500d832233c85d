use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{routes, state::AppState};

/// Construct the Axum [`Router`] with all routes and middleware attached.
///
/// Middleware is applied in outer-to-inner order (outermost runs first on
/// request, last on response):
///
/// 1. `TraceLayer` — structured request/response logging via `tracing`.
/// 2. `CorsLayer` — permissive CORS for the track endpoints (the snippet is
///    embedded on third-party sites; browsers need CORS headers).
///
/// Rate limiting (60 req/min per IP on the track endpoints) is enforced
/// inside the handlers via [`AppState::check_rate_limit`].
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health::health))
        .route("/api/track", post(routes::track::track))
        .route("/api/track/bulk", post(routes::track::track_bulk))
        .route(
            "/api/sites",
            post(routes::sites::create_site).get(routes::sites::list_sites),
        )
        .route(
            "/api/analytics/overview/{site_id}",
            get(routes::overview::get_overview),
        )
        .route(
            "/api/analytics/pageviews/{site_id}",
            get(routes::pageviews::get_pageviews),
        )
        .route(
            "/api/analytics/referrers/{site_id}",
            get(routes::referrers::get_referrers),
        )
        .route(
            "/api/analytics/events/{site_id}",
            get(routes::events::get_events),
        )
        .route(
            "/api/analytics/devices/{site_id}",
            get(routes::breakdowns::get_devices),
        )
        .route(
            "/api/analytics/browsers/{site_id}",
            get(routes::breakdowns::get_browsers),
        )
        .route(
            "/api/analytics/locations/{site_id}",
            get(routes::breakdowns::get_locations),
        )
        .route(
            "/api/analytics/visitors/{site_id}",
            get(routes::visitors::get_visitors),
        )
        .route(
            "/api/analytics/sessions/{site_id}",
            get(routes::sessions::get_sessions),
        )
        .route(
            "/api/analytics/realtime/{site_id}",
            get(routes::realtime::get_realtime),
        )
        .route(
            "/api/analytics/export/{site_id}",
            get(routes::export::export_events),
        )
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
