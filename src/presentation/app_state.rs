// Application state for HTTP handlers
use crate::application::dashboard_service::DashboardService;
use crate::domain::telemetry::TimeRange;

#[derive(Clone)]
pub struct AppState {
    pub dashboard_service: DashboardService,
    /// Used when a request carries no `range` parameter.
    pub default_time_range: TimeRange,
}
