// Application layer - aggregation core, collaborator traits and use cases
pub mod aggregation;
pub mod dashboard_service;
pub mod dashboard_session;
pub mod stream_merger;
pub mod telemetry_source;
pub mod trend;
