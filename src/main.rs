// Main entry point - Dependency injection and server setup
use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use weather_telemetry::application::dashboard_service::DashboardService;
use weather_telemetry::infrastructure::config::{load_app_config, load_dashboard_config};
use weather_telemetry::infrastructure::thingsboard_client::{ThingsboardClient, ThingsboardSource};
use weather_telemetry::infrastructure::visual_crossing::VisualCrossingClient;
use weather_telemetry::presentation::app_state::AppState;
use weather_telemetry::presentation::routes::router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let app_config = load_app_config().context("loading config/app")?;
    let dashboard_config = load_dashboard_config().context("loading config/dashboard")?;
    let data_points = dashboard_config.data_point_configs()?;
    tracing::info!(data_points = data_points.len(), "Dashboard configuration loaded");

    // Create telemetry and weather sources (infrastructure layer)
    let client = ThingsboardClient::new(app_config.thingsboard.url.clone());
    let session = client
        .authenticate(&app_config.thingsboard.credentials()?)
        .await
        .context("authenticating against ThingsBoard")?;
    let source = Arc::new(ThingsboardSource::new(
        client,
        session,
        app_config.subscription.retry_policy(),
    ));
    let sun_times = Arc::new(VisualCrossingClient::new(
        app_config.weather.url.clone(),
        app_config.weather.api_key.clone(),
    ));

    // Create services (application layer)
    let dashboard_service = DashboardService::new(
        source,
        sun_times,
        data_points,
        app_config.weather.location(),
        app_config.thingsboard.max_items,
    );

    let state = Arc::new(AppState {
        dashboard_service,
        default_time_range: dashboard_config.default_time_range,
    });

    // Start server
    let addr: SocketAddr = app_config
        .server
        .listen
        .parse()
        .with_context(|| format!("invalid listen address '{}'", app_config.server.listen))?;
    tracing::info!(%addr, "Starting weather-telemetry service");

    axum::serve(tokio::net::TcpListener::bind(addr).await?, router(state)).await?;

    Ok(())
}
