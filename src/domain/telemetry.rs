// Telemetry data domain models
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const ONE_MINUTE_MS: i64 = 60 * 1000;
const ONE_HOUR_MS: i64 = 60 * ONE_MINUTE_MS;
const ONE_DAY_MS: i64 = 24 * ONE_HOUR_MS;

/// One sensor reading for one key, as received on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPoint {
    #[serde(rename = "ts")]
    pub timestamp: i64,
    #[serde(deserialize_with = "wire_value")]
    pub value: String,
}

impl RawPoint {
    pub fn new(timestamp: i64, value: impl Into<String>) -> Self {
        Self {
            timestamp,
            value: value.into(),
        }
    }

    /// Parses the wire value. Non-numeric text yields `NaN`.
    pub fn numeric_value(&self) -> f64 {
        parse_value(&self.value)
    }
}

pub fn parse_value(value: &str) -> f64 {
    value.trim().parse::<f64>().unwrap_or(f64::NAN)
}

/// Raw readings per key, each sequence in arrival order.
pub type RawSeriesByKey = BTreeMap<String, Vec<RawPoint>>;

/// Incremental push payload: key -> list of `[timestamp, value]` pairs.
pub type PushUpdate = BTreeMap<String, Vec<(i64, String)>>;

// Values come as strings from ThingsBoard but some deployments send numbers.
fn wire_value<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Null => Ok(String::new()),
        other => Ok(other.to_string()),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeRange {
    #[default]
    OneDay,
    ThreeDays,
    OneWeek,
    TwoWeeks,
    OneMonth,
}

impl TimeRange {
    pub const ALL: [TimeRange; 5] = [
        TimeRange::OneDay,
        TimeRange::ThreeDays,
        TimeRange::OneWeek,
        TimeRange::TwoWeeks,
        TimeRange::OneMonth,
    ];

    /// Look-back window used when fetching.
    pub fn duration_ms(self) -> i64 {
        match self {
            TimeRange::OneDay => ONE_DAY_MS,
            TimeRange::ThreeDays => 3 * ONE_DAY_MS,
            TimeRange::OneWeek => 7 * ONE_DAY_MS,
            TimeRange::TwoWeeks => 14 * ONE_DAY_MS,
            TimeRange::OneMonth => 30 * ONE_DAY_MS,
        }
    }

    /// Width of one aggregation bucket.
    pub fn bucket_width_ms(self) -> i64 {
        match self {
            TimeRange::OneDay => 30 * ONE_MINUTE_MS,
            TimeRange::ThreeDays => 3 * ONE_HOUR_MS,
            TimeRange::OneWeek => 6 * ONE_HOUR_MS,
            TimeRange::TwoWeeks => 12 * ONE_HOUR_MS,
            TimeRange::OneMonth => ONE_DAY_MS,
        }
    }

    /// Epoch-aligned start of the bucket containing `timestamp`.
    pub fn bucket_start(self, timestamp: i64) -> i64 {
        let width = self.bucket_width_ms();
        timestamp.div_euclid(width) * width
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TimeRange::OneDay => "one_day",
            TimeRange::ThreeDays => "three_days",
            TimeRange::OneWeek => "one_week",
            TimeRange::TwoWeeks => "two_weeks",
            TimeRange::OneMonth => "one_month",
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown time range '{0}'")]
pub struct UnknownTimeRange(pub String);

impl FromStr for TimeRange {
    type Err = UnknownTimeRange;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        TimeRange::ALL
            .into_iter()
            .find(|range| range.as_str() == normalized)
            .ok_or_else(|| UnknownTimeRange(s.to_string()))
    }
}

/// Chart-ready output of one aggregation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedData {
    pub timestamps: Vec<i64>,
    pub entries: BTreeMap<String, ProcessedEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_timestamp: Option<i64>,
}

impl ProcessedData {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty() && self.entries.is_empty()
    }

    pub fn entry(&self, key: &str) -> Option<&ProcessedEntry> {
        self.entries.get(key)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedEntry {
    /// One slot per bucket, aligned to `ProcessedData::timestamps`.
    /// `None` marks a bucket where the aggregation had no data.
    pub values: Vec<Option<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_value: Option<f64>,
}

impl ProcessedEntry {
    /// Values of the buckets that produced data, in bucket order.
    pub fn present_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().filter_map(|v| *v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_start_is_epoch_aligned() {
        let range = TimeRange::OneDay;
        assert_eq!(range.bucket_start(0), 0);
        assert_eq!(range.bucket_start(1_799_999), 0);
        assert_eq!(range.bucket_start(1_800_000), 1_800_000);
        assert_eq!(range.bucket_start(-1), -1_800_000);
    }

    #[test]
    fn test_bucket_partitions_span() {
        for range in TimeRange::ALL {
            let width = range.bucket_width_ms();
            for ts in [0, 1, width - 1, width, 3 * width + 7, 1_700_000_123_456] {
                let start = range.bucket_start(ts);
                assert!(start <= ts && ts < start + width, "{range}: {ts}");
                assert_eq!(start % width, 0);
            }
        }
    }

    #[test]
    fn test_time_range_parsing() {
        assert_eq!("one_week".parse::<TimeRange>().unwrap(), TimeRange::OneWeek);
        assert_eq!("ONE_MONTH".parse::<TimeRange>().unwrap(), TimeRange::OneMonth);
        let err = "fortnight".parse::<TimeRange>().unwrap_err();
        assert_eq!(err, UnknownTimeRange("fortnight".to_string()));
        assert_eq!(err.to_string(), "unknown time range 'fortnight'");
    }

    #[test]
    fn test_raw_point_accepts_string_and_number_values() {
        let points: Vec<RawPoint> =
            serde_json::from_str(r#"[{"ts": 1, "value": "21.5"}, {"ts": 2, "value": 7}]"#).unwrap();
        assert_eq!(points[0], RawPoint::new(1, "21.5"));
        assert_eq!(points[1], RawPoint::new(2, "7"));
        assert_eq!(points[1].numeric_value(), 7.0);
    }

    #[test]
    fn test_non_numeric_value_is_nan() {
        assert!(RawPoint::new(0, "n/a").numeric_value().is_nan());
    }

    #[test]
    fn test_processed_data_wire_names() {
        let mut data = ProcessedData::empty();
        data.timestamps = vec![0];
        data.latest_timestamp = Some(0);
        data.entries.insert(
            "temperature".to_string(),
            ProcessedEntry {
                values: vec![None],
                latest_value: Some(1.0),
            },
        );
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["latestTimestamp"], 0);
        assert_eq!(json["entries"]["temperature"]["latestValue"], 1.0);
        assert!(json["entries"]["temperature"]["values"][0].is_null());
    }
}
