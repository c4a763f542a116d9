// Crate error type and its HTTP mapping
use crate::domain::expression::ExpressionError;
use crate::domain::telemetry::UnknownTimeRange;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("request to telemetry API failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upstream responded with status {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    #[error("failed to decode upstream payload: {0}")]
    Decode(String),

    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to load settings: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("invalid transform for '{key}': {source}")]
    Transform {
        key: String,
        #[source]
        source: ExpressionError,
    },

    #[error(transparent)]
    TimeRange(#[from] UnknownTimeRange),

    #[error("unknown data key '{0}'")]
    UnknownKey(String),
}

impl TelemetryError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            TelemetryError::Authentication(_) => StatusCode::UNAUTHORIZED,
            TelemetryError::Transport(_)
            | TelemetryError::UpstreamStatus { .. }
            | TelemetryError::Decode(_)
            | TelemetryError::Json(_)
            | TelemetryError::WebSocket(_) => StatusCode::BAD_GATEWAY,
            TelemetryError::Config(_)
            | TelemetryError::Settings(_)
            | TelemetryError::Transform { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            TelemetryError::TimeRange(_) => StatusCode::BAD_REQUEST,
            TelemetryError::UnknownKey(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for TelemetryError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, TelemetryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let err: TelemetryError = "weekly".parse::<crate::domain::telemetry::TimeRange>()
            .unwrap_err()
            .into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            TelemetryError::UpstreamStatus { status: 500, body: String::new() }.status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            TelemetryError::UnknownKey("lux".into()).into_response().status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_wrapped_errors_keep_their_source() {
        use std::error::Error as _;

        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = TelemetryError::from(json_err);
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert!(err.source().is_some_and(|source| source.is::<serde_json::Error>()));

        let ws_err = TelemetryError::from(tokio_tungstenite::tungstenite::Error::ConnectionClosed);
        assert!(matches!(ws_err, TelemetryError::WebSocket(_)));
        assert!(ws_err.source().is_some());
    }
}
