// Merging of pushed telemetry into the raw series state
use crate::domain::telemetry::{PushUpdate, RawPoint, RawSeriesByKey};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// No prior state existed; the update became the state.
    Adopted(RawSeriesByKey),
    /// New points were appended to existing keys.
    Appended { series: RawSeriesByKey, added: usize },
    /// Every incoming point was already known or belonged to an unknown key.
    Unchanged,
}

impl MergeOutcome {
    pub fn into_series(self) -> Option<RawSeriesByKey> {
        match self {
            MergeOutcome::Adopted(series) | MergeOutcome::Appended { series, .. } => Some(series),
            MergeOutcome::Unchanged => None,
        }
    }
}

/// Merges one push message into `current`.
///
/// Only keys established by `current` are extended. Points whose timestamp is
/// already present for that key are dropped; survivors are appended in
/// arrival order. `current` itself is never modified.
pub fn merge(current: Option<&RawSeriesByKey>, incoming: &PushUpdate) -> MergeOutcome {
    let Some(current) = current else {
        return MergeOutcome::Adopted(to_raw_series(incoming));
    };

    let mut next: Option<RawSeriesByKey> = None;
    let mut added = 0;

    for (key, pairs) in incoming {
        let Some(existing) = current.get(key) else {
            tracing::trace!(key = %key, "Ignoring pushed key absent from initial fetch");
            continue;
        };

        let mut seen: HashSet<i64> = existing.iter().map(|p| p.timestamp).collect();
        let fresh: Vec<RawPoint> = pairs
            .iter()
            .filter(|(ts, _)| seen.insert(*ts))
            .map(|(ts, value)| RawPoint::new(*ts, value.clone()))
            .collect();

        if fresh.is_empty() {
            continue;
        }

        added += fresh.len();
        let state = next.get_or_insert_with(|| current.clone());
        if let Some(points) = state.get_mut(key) {
            points.extend(fresh);
        }
    }

    match next {
        Some(series) => MergeOutcome::Appended { series, added },
        None => MergeOutcome::Unchanged,
    }
}

pub fn to_raw_series(update: &PushUpdate) -> RawSeriesByKey {
    update
        .iter()
        .map(|(key, pairs)| {
            let points = pairs
                .iter()
                .map(|(ts, value)| RawPoint::new(*ts, value.clone()))
                .collect();
            (key.clone(), points)
        })
        .collect()
}
