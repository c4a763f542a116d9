// Visual Crossing timeline client for sunrise/sunset times
use crate::application::telemetry_source::SunTimesSource;
use crate::domain::sun_times::SunTimes;
use crate::error::{Result, TelemetryError};
use async_trait::async_trait;
use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Deserialize;
use std::collections::HashMap;
use tokio::sync::Mutex;

// Entries ending this long before the newest request can no longer be asked
// for by any time range.
const CACHE_RETENTION_DAYS: u64 = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    latitude: u64,
    longitude: u64,
    start: NaiveDate,
    end: NaiveDate,
}

impl CacheKey {
    fn new(latitude: f64, longitude: f64, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            latitude: latitude.to_bits(),
            longitude: longitude.to_bits(),
            start,
            end,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TimelineResponse {
    #[serde(default)]
    tzoffset: f64,
    #[serde(default)]
    days: Vec<TimelineDay>,
}

#[derive(Debug, Deserialize)]
struct TimelineDay {
    datetime: String,
    sunrise: Option<String>,
    sunset: Option<String>,
}

pub struct VisualCrossingClient {
    base_url: String,
    api_key: Option<String>,
    http: reqwest::Client,
    cache: Mutex<HashMap<CacheKey, Vec<SunTimes>>>,
}

impl VisualCrossingClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            http: reqwest::Client::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    async fn request(
        &self,
        api_key: &str,
        latitude: f64,
        longitude: f64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<SunTimes>> {
        let url = format!(
            "{}/VisualCrossingWebServices/rest/services/timeline/{},{}/{}/{}",
            self.base_url, latitude, longitude, start, end
        );

        let response = self
            .http
            .get(&url)
            .query(&[
                ("key", api_key),
                ("include", "days"),
                ("elements", "datetime,sunrise,sunset"),
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

        let timeline: TimelineResponse = response
            .json()
            .await
            .map_err(|e| TelemetryError::Decode(e.to_string()))?;
        parse_timeline(&timeline)
    }
}

fn parse_timeline(timeline: &TimelineResponse) -> Result<Vec<SunTimes>> {
    let offset_ms = (timeline.tzoffset * 3_600_000.0).round() as i64;
    let mut days = Vec::with_capacity(timeline.days.len());

    for day in &timeline.days {
        let (Some(sunrise), Some(sunset)) = (&day.sunrise, &day.sunset) else {
            // polar day or night
            continue;
        };
        let date = NaiveDate::parse_from_str(&day.datetime, "%Y-%m-%d")
            .map_err(|e| TelemetryError::Decode(format!("day '{}': {}", day.datetime, e)))?;
        days.push(SunTimes::new(
            local_to_epoch_ms(date, sunrise, offset_ms)?,
            local_to_epoch_ms(date, sunset, offset_ms)?,
        ));
    }

    Ok(days)
}

fn local_to_epoch_ms(date: NaiveDate, time: &str, offset_ms: i64) -> Result<i64> {
    let time = NaiveTime::parse_from_str(time, "%H:%M:%S")
        .map_err(|e| TelemetryError::Decode(format!("time '{}': {}", time, e)))?;
    Ok(NaiveDateTime::new(date, time).and_utc().timestamp_millis() - offset_ms)
}

/// Drops entries that end more than the longest time range before `newest_start`.
fn prune_cache(cache: &mut HashMap<CacheKey, Vec<SunTimes>>, newest_start: NaiveDate) {
    let Some(cutoff) = newest_start.checked_sub_days(Days::new(CACHE_RETENTION_DAYS)) else {
        return;
    };
    let before = cache.len();
    cache.retain(|key, _| key.end >= cutoff);
    if cache.len() < before {
        tracing::debug!(evicted = before - cache.len(), "Pruned sun times cache");
    }
}

#[async_trait]
impl SunTimesSource for VisualCrossingClient {
    async fn sun_times(
        &self,
        latitude: f64,
        longitude: f64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<SunTimes>> {
        let cache_key = CacheKey::new(latitude, longitude, start, end);
        if let Some(cached) = self.cache.lock().await.get(&cache_key) {
            return Ok(cached.clone());
        }

        let Some(api_key) = &self.api_key else {
            tracing::error!("Visual Crossing API key is not configured");
            return Ok(Vec::new());
        };

        let days = self.request(api_key, latitude, longitude, start, end).await?;
        let mut cache = self.cache.lock().await;
        prune_cache(&mut cache, start);
        cache.insert(cache_key, days.clone());
        Ok(days)
    }
}
