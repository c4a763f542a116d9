// Dashboard service - Use cases behind the HTTP handlers
use crate::application::aggregation::aggregate;
use crate::application::dashboard_session::{DashboardHandle, DashboardSession};
use crate::application::telemetry_source::{SunTimesSource, TelemetrySource};
use crate::application::trend::aligned_trend_line;
use crate::domain::data_point::DataPointConfigs;
use crate::domain::sun_times::SunTimes;
use crate::domain::telemetry::{ProcessedData, TimeRange};
use crate::error::{Result, TelemetryError};
use chrono::{DateTime, NaiveDate};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendSeries {
    pub key: String,
    pub timestamps: Vec<i64>,
    pub values: Vec<Option<f64>>,
    /// One slot per timestamp; `None` when the key has no value at all.
    pub trend: Vec<Option<f64>>,
}

#[derive(Clone)]
pub struct DashboardService {
    source: Arc<dyn TelemetrySource>,
    sun_times: Arc<dyn SunTimesSource>,
    configs: Arc<DataPointConfigs>,
    location: Option<Location>,
    max_items: usize,
}

impl DashboardService {
    pub fn new(
        source: Arc<dyn TelemetrySource>,
        sun_times: Arc<dyn SunTimesSource>,
        configs: DataPointConfigs,
        location: Option<Location>,
        max_items: usize,
    ) -> Self {
        Self {
            source,
            sun_times,
            configs: Arc::new(configs),
            location,
            max_items,
        }
    }

    /// Fetch and aggregate once.
    pub async fn get_dashboard(&self, device_id: &str, time_range: TimeRange) -> Result<ProcessedData> {
        let keys: Vec<String> = self.configs.keys().cloned().collect();
        let raw = self
            .source
            .fetch(device_id, self.max_items, time_range, &keys)
            .await?;
        Ok(aggregate(&raw, time_range, &self.configs))
    }

    pub async fn get_trend(
        &self,
        device_id: &str,
        time_range: TimeRange,
        key: &str,
    ) -> Result<TrendSeries> {
        if !self.configs.contains_key(key) {
            return Err(TelemetryError::UnknownKey(key.to_string()));
        }
        let data = self.get_dashboard(device_id, time_range).await?;
        Ok(trend_for(&data, key))
    }

    /// Sunrise/sunset for each day covered by the dashboard. Failures of the
    /// weather source degrade to an empty list.
    pub async fn get_sun_times(&self, device_id: &str, time_range: TimeRange) -> Result<Vec<SunTimes>> {
        let Some(location) = self.location else {
            tracing::debug!("No location configured; skipping sun times");
            return Ok(Vec::new());
        };
        let data = self.get_dashboard(device_id, time_range).await?;
        let Some((start, end)) = date_span(&data) else {
            return Ok(Vec::new());
        };

        match self
            .sun_times
            .sun_times(location.latitude, location.longitude, start, end)
            .await
        {
            Ok(days) => Ok(days),
            Err(err) => {
                tracing::error!(error = %err, "Error fetching sunrise/sunset data");
                Ok(Vec::new())
            }
        }
    }

    pub fn open_session(&self, device_id: &str, time_range: TimeRange) -> DashboardHandle {
        DashboardSession::open(
            self.source.clone(),
            self.configs.clone(),
            device_id,
            time_range,
            self.max_items,
        )
    }
}

/// Trend overlay for one key. Keys without an entry yield empty series.
pub fn trend_for(data: &ProcessedData, key: &str) -> TrendSeries {
    let values = data
        .entry(key)
        .map(|entry| entry.values.clone())
        .unwrap_or_default();
    let trend = aligned_trend_line(&values);
    TrendSeries {
        key: key.to_string(),
        timestamps: if values.is_empty() {
            Vec::new()
        } else {
            data.timestamps.clone()
        },
        values,
        trend,
    }
}

/// UTC calendar dates of the first and last bucket.
pub fn date_span(data: &ProcessedData) -> Option<(NaiveDate, NaiveDate)> {
    let first = *data.timestamps.first()?;
    let last = *data.timestamps.last()?;
    let start = DateTime::from_timestamp_millis(first)?.date_naive();
    let end = DateTime::from_timestamp_millis(last)?.date_naive();
    Some((start, end))
}
