// Live dashboard session - one actor task per open dashboard
//
// The actor owns the raw series slot and handles one event at a time: fetch
// completions, push updates and commands from the handle. Every change to the
// raw state or the time range re-runs aggregation and publishes a snapshot.
use crate::application::aggregation::aggregate;
use crate::application::stream_merger::{merge, MergeOutcome};
use crate::application::telemetry_source::{SubscriptionEvent, TelemetrySource};
use crate::domain::data_point::DataPointConfigs;
use crate::domain::telemetry::{ProcessedData, RawSeriesByKey, TimeRange};
use crate::error::Result;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::{CancellationToken, DropGuard};

pub const DEFAULT_MAX_ITEMS: usize = 25_000;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum FetchStatus {
    Loading,
    Ready,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveStatus {
    Connecting,
    Live,
    Reconnecting,
    /// Push updates stopped after the reconnect budget ran out.
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub device_id: String,
    pub time_range: TimeRange,
    pub fetch: FetchStatus,
    pub live: LiveStatus,
    pub data: Option<Arc<ProcessedData>>,
}

#[derive(Debug)]
enum SessionCommand {
    SetTimeRange(TimeRange),
    Refresh,
}

struct FetchCompletion {
    generation: u64,
    result: Result<RawSeriesByKey>,
}

/// Handle to a running session. Dropping it tears the session down.
pub struct DashboardHandle {
    commands: mpsc::Sender<SessionCommand>,
    snapshots: watch::Receiver<DashboardSnapshot>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl DashboardHandle {
    pub fn snapshot(&self) -> DashboardSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<DashboardSnapshot> {
        self.snapshots.clone()
    }

    /// Switch the time range; discards the current state and refetches.
    pub async fn set_time_range(&self, time_range: TimeRange) {
        self.send(SessionCommand::SetTimeRange(time_range)).await;
    }

    /// Manual retry of the one-shot fetch.
    pub async fn refresh(&self) {
        self.send(SessionCommand::Refresh).await;
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    async fn send(&self, command: SessionCommand) {
        if self.commands.send(command).await.is_err() {
            tracing::debug!("Dashboard session already stopped");
        }
    }
}

pub struct DashboardSession;

impl DashboardSession {
    /// Spawn a session: start the initial fetch and the push subscription.
    pub fn open(
        source: Arc<dyn TelemetrySource>,
        configs: Arc<DataPointConfigs>,
        device_id: impl Into<String>,
        time_range: TimeRange,
        max_items: usize,
    ) -> DashboardHandle {
        let device_id = device_id.into();
        let cancel = CancellationToken::new();
        let (command_tx, command_rx) = mpsc::channel(16);
        let (fetch_tx, fetch_rx) = mpsc::channel(4);
        let (snapshot_tx, snapshot_rx) = watch::channel(DashboardSnapshot {
            device_id: device_id.clone(),
            time_range,
            fetch: FetchStatus::Loading,
            live: LiveStatus::Connecting,
            data: None,
        });

        let subscription = source.subscribe(&device_id, cancel.child_token());

        let actor = SessionActor {
            source,
            configs,
            device_id,
            time_range,
            max_items,
            generation: 0,
            raw: None,
            fetch_cancel: cancel.child_token(),
            snapshot_tx,
            fetch_tx,
            cancel: cancel.clone(),
        };
        tokio::spawn(actor.run(command_rx, fetch_rx, subscription));

        DashboardHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
            cancel: cancel.clone(),
            _guard: cancel.drop_guard(),
        }
    }
}

struct SessionActor {
    source: Arc<dyn TelemetrySource>,
    configs: Arc<DataPointConfigs>,
    device_id: String,
    time_range: TimeRange,
    max_items: usize,
    generation: u64,
    raw: Option<RawSeriesByKey>,
    fetch_cancel: CancellationToken,
    snapshot_tx: watch::Sender<DashboardSnapshot>,
    fetch_tx: mpsc::Sender<FetchCompletion>,
    cancel: CancellationToken,
}

impl SessionActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<SessionCommand>,
        mut fetches: mpsc::Receiver<FetchCompletion>,
        mut subscription: mpsc::Receiver<SubscriptionEvent>,
    ) {
        tracing::info!(device = %self.device_id, range = %self.time_range, "Dashboard session started");
        self.start_fetch();
        let mut subscription_open = true;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                Some(command) = commands.recv() => self.handle_command(command),
                Some(completion) = fetches.recv() => self.handle_fetch(completion),
                event = subscription.recv(), if subscription_open => match event {
                    Some(event) => self.handle_subscription(event),
                    None => {
                        subscription_open = false;
                        self.set_live(LiveStatus::Disconnected);
                    }
                },
                else => break,
            }
        }

        self.fetch_cancel.cancel();
        tracing::info!(device = %self.device_id, "Dashboard session stopped");
    }

    fn start_fetch(&mut self) {
        // Older requests may still resolve; the generation check drops them.
        self.fetch_cancel.cancel();
        self.fetch_cancel = self.cancel.child_token();
        self.generation += 1;

        let generation = self.generation;
        let source = self.source.clone();
        let device_id = self.device_id.clone();
        let time_range = self.time_range;
        let max_items = self.max_items;
        let keys: Vec<String> = self.configs.keys().cloned().collect();
        let fetch_tx = self.fetch_tx.clone();
        let cancel = self.fetch_cancel.clone();

        tracing::debug!(device = %device_id, range = %time_range, generation, "Fetching telemetry");

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                result = source.fetch(&device_id, max_items, time_range, &keys) => {
                    let _ = fetch_tx.send(FetchCompletion { generation, result }).await;
                }
            }
        });

        self.snapshot_tx.send_modify(|snapshot| {
            snapshot.time_range = time_range;
            snapshot.fetch = FetchStatus::Loading;
        });
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::SetTimeRange(time_range) => {
                if time_range == self.time_range {
                    return;
                }
                self.time_range = time_range;
                self.raw = None;
                self.publish_data();
                self.start_fetch();
            }
            SessionCommand::Refresh => self.start_fetch(),
        }
    }

    fn handle_fetch(&mut self, completion: FetchCompletion) {
        if completion.generation != self.generation {
            tracing::debug!(
                stale = completion.generation,
                current = self.generation,
                "Discarding stale fetch result"
            );
            return;
        }

        match completion.result {
            Ok(series) => {
                tracing::debug!(device = %self.device_id, keys = series.len(), "Telemetry fetched");
                self.raw = Some(series);
                self.publish_data();
                self.snapshot_tx
                    .send_modify(|snapshot| snapshot.fetch = FetchStatus::Ready);
            }
            Err(err) => {
                tracing::warn!(device = %self.device_id, error = %err, "Failed to fetch telemetry");
                self.snapshot_tx
                    .send_modify(|snapshot| snapshot.fetch = FetchStatus::Failed(err.to_string()));
            }
        }
    }

    fn handle_subscription(&mut self, event: SubscriptionEvent) {
        match event {
            SubscriptionEvent::Connected => self.set_live(LiveStatus::Live),
            SubscriptionEvent::Reconnecting { attempt } => {
                tracing::debug!(device = %self.device_id, attempt, "Push channel reconnecting");
                self.set_live(LiveStatus::Reconnecting);
            }
            SubscriptionEvent::GaveUp => {
                tracing::warn!(device = %self.device_id, "Push channel gave up; live updates stopped");
                self.set_live(LiveStatus::Disconnected);
            }
            SubscriptionEvent::Update(update) => match merge(self.raw.as_ref(), &update) {
                MergeOutcome::Unchanged => {
                    tracing::trace!(device = %self.device_id, "Push update carried no new points");
                }
                outcome => {
                    if let MergeOutcome::Appended { added, .. } = &outcome {
                        tracing::trace!(device = %self.device_id, added, "Merged push update");
                    }
                    self.raw = outcome.into_series();
                    self.publish_data();
                }
            },
        }
    }

    fn publish_data(&self) {
        let data = self
            .raw
            .as_ref()
            .map(|raw| Arc::new(aggregate(raw, self.time_range, &self.configs)));
        self.snapshot_tx.send_modify(|snapshot| snapshot.data = data);
    }

    fn set_live(&self, live: LiveStatus) {
        self.snapshot_tx.send_if_modified(|snapshot| {
            let changed = snapshot.live != live;
            snapshot.live = live;
            changed
        });
    }
}
