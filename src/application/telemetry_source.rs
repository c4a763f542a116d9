// Collaborator traits for telemetry and sun-times data access
use crate::domain::sun_times::SunTimes;
use crate::domain::telemetry::{PushUpdate, RawSeriesByKey, TimeRange};
use crate::error::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Lifecycle and data events delivered by a push subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    Connected,
    Update(PushUpdate),
    /// Connection lost; `attempt` is the reconnect about to be tried.
    Reconnecting { attempt: u32 },
    /// Reconnect attempts are exhausted. No further events follow.
    GaveUp,
}

#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Fetch up to `max_items` readings per key for the look-back window of
    /// `time_range`, oldest first.
    async fn fetch(
        &self,
        device_id: &str,
        max_items: usize,
        time_range: TimeRange,
        keys: &[String],
    ) -> Result<RawSeriesByKey>;

    /// Open a push subscription for `device_id`. The subscription runs until
    /// `cancel` fires, the receiver is dropped, or retries are exhausted.
    fn subscribe(
        &self,
        device_id: &str,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<SubscriptionEvent>;
}

#[async_trait]
pub trait SunTimesSource: Send + Sync {
    /// One entry per calendar day in `start..=end`.
    async fn sun_times(
        &self,
        latitude: f64,
        longitude: f64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<SunTimes>>;
}
