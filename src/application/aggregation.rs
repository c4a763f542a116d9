// Time-bucket aggregation of raw telemetry into chart-ready series
use crate::domain::data_point::{AggregationType, DataPointConfigs};
use crate::domain::telemetry::{ProcessedData, ProcessedEntry, RawSeriesByKey, TimeRange};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Buckets every configured key of `raw_series` into `time_range` windows and
/// reduces each bucket with the key's aggregation type.
///
/// Keys missing from either side are ignored. When no key overlaps the result
/// is empty and a warning is logged. Every entry's `values` is aligned with
/// `timestamps`; buckets without data for a key hold `None`.
pub fn aggregate(
    raw_series: &RawSeriesByKey,
    time_range: TimeRange,
    configs: &DataPointConfigs,
) -> ProcessedData {
    let valid_keys: Vec<&String> = configs
        .keys()
        .filter(|key| raw_series.contains_key(*key))
        .collect();

    if valid_keys.is_empty() {
        tracing::warn!(
            configured = configs.len(),
            received = raw_series.len(),
            "No valid data keys found in raw series"
        );
        return ProcessedData::empty();
    }

    let mut latest_timestamp: Option<i64> = None;
    let mut parse_failures = 0usize;
    // key -> bucket start -> values in arrival order
    let mut grouped: HashMap<&str, BTreeMap<i64, Vec<f64>>> = HashMap::new();
    let mut bucket_starts = BTreeSet::new();

    for key in &valid_keys {
        let points = &raw_series[key.as_str()];

        if let Some(max_ts) = points.iter().map(|p| p.timestamp).max() {
            latest_timestamp = Some(latest_timestamp.map_or(max_ts, |ts| ts.max(max_ts)));
        }

        let buckets = grouped.entry(key.as_str()).or_default();
        for point in points {
            let value = point.numeric_value();
            if value.is_nan() {
                parse_failures += 1;
            }
            let start = time_range.bucket_start(point.timestamp);
            bucket_starts.insert(start);
            buckets.entry(start).or_default().push(value);
        }
    }

    if parse_failures > 0 {
        tracing::warn!(parse_failures, "Non-numeric raw values aggregated as NaN");
    }

    let timestamps: Vec<i64> = bucket_starts.into_iter().collect();
    let mut entries = BTreeMap::new();

    for key in valid_keys {
        let config = &configs[key.as_str()];
        let buckets = &grouped[key.as_str()];
        let values = timestamps
            .iter()
            .map(|start| {
                let bucket = buckets.get(start).map(Vec::as_slice).unwrap_or(&[]);
                aggregate_values(bucket, config.aggregation_type)
                    .map(|value| config.finish_value(value))
            })
            .collect();

        let latest_value = raw_series[key.as_str()]
            .last()
            .map(|point| config.finish_value(point.numeric_value()));

        entries.insert(
            key.clone(),
            ProcessedEntry {
                values,
                latest_value,
            },
        );
    }

    ProcessedData {
        timestamps,
        entries,
        latest_timestamp,
    }
}

/// Reduces one bucket. `None` means the bucket has no data for this type.
pub fn aggregate_values(values: &[f64], aggregation_type: AggregationType) -> Option<f64> {
    match aggregation_type {
        AggregationType::Median => Some(median(values)),
        AggregationType::Min => min(values),
        AggregationType::Max => max(values),
        AggregationType::Mode => mode(values),
        AggregationType::Average => Some(average(values)),
        AggregationType::Sum => Some(sum(values)),
        AggregationType::Latest => Some(latest(values)),
    }
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let middle = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[middle - 1] + sorted[middle]) / 2.0
    } else {
        sorted[middle]
    }
}

// NaN poisons min/max instead of being skipped by f64::min/f64::max.
pub fn min(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(|acc, v| {
        if acc.is_nan() || v.is_nan() {
            f64::NAN
        } else {
            acc.min(v)
        }
    })
}

pub fn max(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(|acc, v| {
        if acc.is_nan() || v.is_nan() {
            f64::NAN
        } else {
            acc.max(v)
        }
    })
}

/// Most frequent value. On a tie the value that reached the winning count
/// first wins.
pub fn mode(values: &[f64]) -> Option<f64> {
    let mut counts: HashMap<u64, usize> = HashMap::new();
    let mut best: Option<(f64, usize)> = None;

    for value in values {
        let count = counts.entry(normalized_bits(*value)).or_insert(0);
        *count += 1;
        if best.is_none_or(|(_, max_count)| *count > max_count) {
            best = Some((*value, *count));
        }
    }
    best.map(|(value, _)| value)
}

// Treat 0.0 and -0.0 as the same reading.
fn normalized_bits(value: f64) -> u64 {
    if value == 0.0 { 0f64.to_bits() } else { value.to_bits() }
}

pub fn average(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        sum(values) / values.len() as f64
    }
}

pub fn sum(values: &[f64]) -> f64 {
    values.iter().sum()
}

/// Last value in input order.
pub fn latest(values: &[f64]) -> f64 {
    values.last().copied().unwrap_or(0.0)
}
