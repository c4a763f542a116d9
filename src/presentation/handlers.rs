// HTTP request handlers
use crate::domain::telemetry::TimeRange;
use crate::error::Result;
use crate::infrastructure::chunked_json::stream_response;
use crate::infrastructure::http_response::{accepts_brotli, respond_json};
use crate::presentation::app_state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Response,
};
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use tokio_stream::wrappers::WatchStream;

#[derive(Deserialize)]
pub struct RangeQuery {
    pub range: Option<String>,
}

impl RangeQuery {
    fn time_range(&self, default: TimeRange) -> Result<TimeRange> {
        match self.range.as_deref() {
            Some(range) => Ok(range.parse()?),
            None => Ok(default),
        }
    }
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// Aggregated dashboard for a device
pub async fn get_dashboard(
    Path(device): Path<String>,
    Query(query): Query<RangeQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Result<Response> {
    let time_range = query.time_range(state.default_time_range)?;
    let data = state.dashboard_service.get_dashboard(&device, time_range).await?;
    Ok(respond_json(&data, &headers).await)
}

/// One key's aggregated series with its linear trend
pub async fn get_trend(
    Path((device, key)): Path<(String, String)>,
    Query(query): Query<RangeQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Result<Response> {
    let time_range = query.time_range(state.default_time_range)?;
    let trend = state
        .dashboard_service
        .get_trend(&device, time_range, &key)
        .await?;
    Ok(respond_json(&trend, &headers).await)
}

pub async fn get_sun_times(
    Path(device): Path<String>,
    Query(query): Query<RangeQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Result<Response> {
    let time_range = query.time_range(state.default_time_range)?;
    let days = state
        .dashboard_service
        .get_sun_times(&device, time_range)
        .await?;
    Ok(respond_json(&days, &headers).await)
}

/// Live dashboard: one frame per snapshot change. The session lives as long
/// as the response body, so a client disconnect tears it down.
pub async fn stream_live(
    Path(device): Path<String>,
    Query(query): Query<RangeQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Result<Response> {
    let time_range = query.time_range(state.default_time_range)?;
    let compress = accepts_brotli(&headers);

    let handle = state.dashboard_service.open_session(&device, time_range);
    let mut snapshots = WatchStream::new(handle.watch());

    let stream = async_stream::stream! {
        let _handle = handle;
        while let Some(snapshot) = snapshots.next().await {
            yield snapshot;
        }
        tracing::debug!("Live dashboard stream finished");
    };

    Ok(stream_response(stream, compress))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::dashboard_service::DashboardService;
    use crate::application::telemetry_source::{SubscriptionEvent, SunTimesSource, TelemetrySource};
    use crate::domain::data_point::{AggregationType, DataPointConfig, DataPointConfigs};
    use crate::domain::sun_times::SunTimes;
    use crate::domain::telemetry::{RawPoint, RawSeriesByKey};
    use crate::presentation::routes::router;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use serde_json::Value;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    struct FixedSource;

    #[async_trait]
    impl TelemetrySource for FixedSource {
        async fn fetch(
            &self,
            _device_id: &str,
            _max_items: usize,
            _time_range: TimeRange,
            _keys: &[String],
        ) -> Result<RawSeriesByKey> {
            let mut raw = RawSeriesByKey::new();
            raw.insert(
                "temperature".to_string(),
                vec![RawPoint::new(0, "20"), RawPoint::new(1_000, "22")],
            );
            Ok(raw)
        }

        fn subscribe(&self, _: &str, cancel: CancellationToken) -> mpsc::Receiver<SubscriptionEvent> {
            let (tx, rx) = mpsc::channel(1);
            // keep the channel open until the session goes away
            tokio::spawn(async move {
                cancel.cancelled().await;
                drop(tx);
            });
            rx
        }
    }

    struct NoSunTimes;

    #[async_trait]
    impl SunTimesSource for NoSunTimes {
        async fn sun_times(&self, _: f64, _: f64, _: NaiveDate, _: NaiveDate) -> Result<Vec<SunTimes>> {
            Ok(Vec::new())
        }
    }

    async fn serve() -> String {
        let mut configs = DataPointConfigs::new();
        configs.insert(
            "temperature".to_string(),
            DataPointConfig::new(AggregationType::Average),
        );
        let state = Arc::new(AppState {
            dashboard_service: DashboardService::new(
                Arc::new(FixedSource),
                Arc::new(NoSunTimes),
                configs,
                None,
                100,
            ),
            default_time_range: TimeRange::OneDay,
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router(state)).await.unwrap() });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_dashboard_endpoint() {
        let base = serve().await;
        let body: Value = reqwest::get(format!("{base}/dashboards/dev-1?range=one_week"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(body["timestamps"], serde_json::json!([0]));
        assert_eq!(body["entries"]["temperature"]["values"], serde_json::json!([21.0]));
        assert_eq!(body["entries"]["temperature"]["latestValue"], 22.0);
        assert_eq!(body["latestTimestamp"], 1000);
    }

    #[tokio::test]
    async fn test_unknown_range_is_bad_request() {
        let base = serve().await;
        let response = reqwest::get(format!("{base}/dashboards/dev-1?range=forever"))
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
    }

    #[tokio::test]
    async fn test_trend_for_unconfigured_key_is_not_found() {
        let base = serve().await;
        let response = reqwest::get(format!("{base}/dashboards/dev-1/trend/lux"))
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn test_sun_times_without_location_is_empty() {
        let base = serve().await;
        let body: Value = reqwest::get(format!("{base}/dashboards/dev-1/sun-times"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_live_stream_reaches_ready() {
        let base = serve().await;
        let mut response = reqwest::get(format!("{base}/dashboards/dev-1/live"))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let mut buffer = Vec::new();
        let ready = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                while buffer.len() >= 4 {
                    let len = u32::from_be_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]) as usize;
                    if buffer.len() < 4 + len {
                        break;
                    }
                    let frame: Value = serde_json::from_slice(&buffer[4..4 + len]).unwrap();
                    buffer.drain(..4 + len);
                    if frame["fetch"]["state"] == "ready" && !frame["data"].is_null() {
                        return frame;
                    }
                }
                let chunk = response.chunk().await.unwrap().expect("stream ended early");
                buffer.extend_from_slice(&chunk);
            }
        })
        .await
        .unwrap();

        assert_eq!(ready["deviceId"], "dev-1");
        assert_eq!(ready["timeRange"], "one_day");
        assert_eq!(ready["data"]["entries"]["temperature"]["latestValue"], 22.0);
    }
}
