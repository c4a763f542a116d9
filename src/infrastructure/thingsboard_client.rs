// ThingsBoard REST client and TelemetrySource implementation
use crate::application::telemetry_source::{SubscriptionEvent, TelemetrySource};
use crate::domain::telemetry::{RawSeriesByKey, TimeRange};
use crate::error::{Result, TelemetryError};
use crate::infrastructure::config::Credentials;
use crate::infrastructure::thingsboard_ws::{spawn_subscription, websocket_url, RetryPolicy};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Bearer credential returned by a login. Owned by whoever created it and
/// passed explicitly to every fetch and subscription.
#[derive(Clone)]
pub struct AuthSession {
    token: String,
}

impl AuthSession {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession").field("token", &"<redacted>").finish()
    }
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PublicLoginRequest<'a> {
    public_id: &'a str,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Clone)]
pub struct ThingsboardClient {
    base_url: String,
    http: reqwest::Client,
}

impl ThingsboardClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn authenticate(&self, credentials: &Credentials) -> Result<AuthSession> {
        match credentials {
            Credentials::Public { public_id } => self.login_public(public_id).await,
            Credentials::User { username, password } => self.login(username, password).await,
        }
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<AuthSession> {
        self.post_login("/api/auth/login", &LoginRequest { username, password })
            .await
    }

    pub async fn login_public(&self, public_id: &str) -> Result<AuthSession> {
        self.post_login("/api/auth/login/public", &PublicLoginRequest { public_id })
            .await
    }

    async fn post_login<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<AuthSession> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TelemetryError::Authentication(format!(
                "login failed with status {}",
                response.status()
            )));
        }

        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| TelemetryError::Decode(e.to_string()))?;
        tracing::info!(path, "Authenticated against telemetry API");
        Ok(AuthSession::new(login.token))
    }

    /// Readings for `keys` in `end_ts - range .. end_ts`, ascending.
    pub async fn fetch_timeseries(
        &self,
        session: &AuthSession,
        device_id: &str,
        max_items: usize,
        time_range: TimeRange,
        keys: &[String],
        end_ts: i64,
    ) -> Result<RawSeriesByKey> {
        let start_ts = end_ts - time_range.duration_ms();
        let url = format!(
            "{}/api/plugins/telemetry/DEVICE/{}/values/timeseries",
            self.base_url,
            urlencoding::encode(device_id)
        );

        tracing::debug!(device = %device_id, range = %time_range, keys = keys.len(), "Fetching timeseries");

        let response = self
            .http
            .get(&url)
            .bearer_auth(session.token())
            .query(&[
                ("keys", keys.join(",")),
                ("startTs", start_ts.to_string()),
                ("endTs", end_ts.to_string()),
                ("limit", max_items.to_string()),
                ("orderBy", "ASC".to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TelemetryError::UpstreamStatus {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<RawSeriesByKey>()
            .await
            .map_err(|e| TelemetryError::Decode(e.to_string()))
    }
}

/// Authenticated ThingsBoard access for one dashboard backend.
#[derive(Debug, Clone)]
pub struct ThingsboardSource {
    client: ThingsboardClient,
    session: AuthSession,
    retry: RetryPolicy,
}

impl ThingsboardSource {
    pub fn new(client: ThingsboardClient, session: AuthSession, retry: RetryPolicy) -> Self {
        Self {
            client,
            session,
            retry,
        }
    }
}

#[async_trait]
impl TelemetrySource for ThingsboardSource {
    async fn fetch(
        &self,
        device_id: &str,
        max_items: usize,
        time_range: TimeRange,
        keys: &[String],
    ) -> Result<RawSeriesByKey> {
        let now = chrono::Utc::now().timestamp_millis();
        self.client
            .fetch_timeseries(&self.session, device_id, max_items, time_range, keys, now)
            .await
    }

    fn subscribe(
        &self,
        device_id: &str,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<SubscriptionEvent> {
        let url = websocket_url(self.client.base_url(), self.session.token());
        spawn_subscription(url, device_id.to_string(), self.retry, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::telemetry::RawPoint;
    use axum::{
        extract::{Path, Query},
        http::{HeaderMap, StatusCode},
        routing::{get, post},
        Json, Router,
    };
    use serde_json::{json, Value};
    use std::collections::HashMap;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn mock_api() -> Router {
        Router::new()
            .route(
                "/api/auth/login/public",
                post(|Json(body): Json<Value>| async move {
                    if body["publicId"] == "public-1" {
                        Ok(Json(json!({ "token": "jwt-public" })))
                    } else {
                        Err(StatusCode::UNAUTHORIZED)
                    }
                }),
            )
            .route(
                "/api/auth/login",
                post(|| async { StatusCode::UNAUTHORIZED }),
            )
            .route(
                "/api/plugins/telemetry/DEVICE/:id/values/timeseries",
                get(
                    |Path(id): Path<String>,
                     Query(params): Query<HashMap<String, String>>,
                     headers: HeaderMap| async move {
                        let auth = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or_default();
                        if auth != "Bearer jwt-public" {
                            return Err(StatusCode::UNAUTHORIZED);
                        }
                        assert_eq!(id, "device-1");
                        assert_eq!(params["keys"], "temperature,humidity");
                        assert_eq!(params["orderBy"], "ASC");
                        assert_eq!(params["limit"], "500");
                        assert_eq!(params["endTs"], "1000000000");
                        assert_eq!(params["startTs"], (1_000_000_000i64 - 86_400_000).to_string());
                        Ok(Json(json!({
                            "temperature": [{ "ts": 999_000_000, "value": "21.5" }],
                            "humidity": [{ "ts": 999_000_000, "value": 40 }]
                        })))
                    },
                ),
            )
    }

    #[tokio::test]
    async fn test_public_login_and_fetch() {
        let client = ThingsboardClient::new(serve(mock_api()).await);
        let session = client
            .authenticate(&Credentials::Public {
                public_id: "public-1".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(session.token(), "jwt-public");

        let keys = vec!["temperature".to_string(), "humidity".to_string()];
        let series = client
            .fetch_timeseries(&session, "device-1", 500, TimeRange::OneDay, &keys, 1_000_000_000)
            .await
            .unwrap();

        assert_eq!(series["temperature"], vec![RawPoint::new(999_000_000, "21.5")]);
        assert_eq!(series["humidity"], vec![RawPoint::new(999_000_000, "40")]);
    }

    #[tokio::test]
    async fn test_rejected_login() {
        let client = ThingsboardClient::new(serve(mock_api()).await);
        let err = client.login("viewer", "wrong").await.unwrap_err();
        assert!(matches!(err, TelemetryError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_upstream_status_is_reported() {
        let client = ThingsboardClient::new(serve(mock_api()).await);
        let err = client
            .fetch_timeseries(
                &AuthSession::new("expired"),
                "device-1",
                500,
                TimeRange::OneDay,
                &[],
                0,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TelemetryError::UpstreamStatus { status: 401, .. }));
    }

    #[test]
    fn test_session_debug_redacts_token() {
        let session = AuthSession::new("secret");
        assert!(!format!("{session:?}").contains("secret"));
    }
}
