// Router wiring
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    get_dashboard, get_sun_times, get_trend, health_check, stream_live,
};
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

// Compression is done by the response builders, so there is no
// CompressionLayer here.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/dashboards/:device", get(get_dashboard))
        .route("/dashboards/:device/trend/:key", get(get_trend))
        .route("/dashboards/:device/sun-times", get(get_sun_times))
        .route("/dashboards/:device/live", get(stream_live))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
