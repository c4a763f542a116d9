// ThingsBoard WebSocket push subscription with bounded reconnects
use crate::application::telemetry_source::SubscriptionEvent;
use crate::domain::telemetry::PushUpdate;
use crate::error::TelemetryError;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

pub const SUBSCRIPTION_CMD_ID: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WsMessage {
    subscription_id: Option<i64>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    error_msg: Option<String>,
    #[serde(default)]
    data: BTreeMap<String, Value>,
}

enum StreamEnd {
    Cancelled,
    ReceiverDropped,
    Disconnected,
}

/// `http(s)://host` becomes `ws(s)://host/api/ws/plugins/telemetry?token=...`.
pub fn websocket_url(base_url: &str, token: &str) -> String {
    let ws_base = base_url.trim_end_matches('/').replacen("http", "ws", 1);
    format!(
        "{}/api/ws/plugins/telemetry?token={}",
        ws_base,
        urlencoding::encode(token)
    )
}

pub fn subscription_command(device_id: &str) -> Value {
    json!({
        "tsSubCmds": [{
            "entityType": "DEVICE",
            "entityId": device_id,
            "scope": "LATEST_TELEMETRY",
            "cmdId": SUBSCRIPTION_CMD_ID,
        }],
        "historyCmds": [],
        "attrSubCmds": [],
    })
}

/// Extracts the telemetry payload of a subscription message. Messages for
/// other subscriptions, or that are not JSON, yield `None`.
pub fn parse_push_message(text: &str) -> Option<PushUpdate> {
    let message: WsMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(err) => {
            tracing::warn!(error = %err, "Ignoring malformed websocket message");
            return None;
        }
    };

    if let Some(code) = message.error_code.filter(|code| *code != 0) {
        tracing::warn!(
            code,
            message = message.error_msg.as_deref().unwrap_or_default(),
            "Subscription error reported by server"
        );
    }

    if message.subscription_id != Some(SUBSCRIPTION_CMD_ID) {
        return None;
    }

    let mut update = PushUpdate::new();
    for (key, payload) in message.data {
        match parse_pairs(&payload) {
            Some(pairs) => {
                update.insert(key, pairs);
            }
            None => tracing::warn!(key = %key, "Unsupported format from ws response"),
        }
    }
    Some(update)
}

fn parse_pairs(payload: &Value) -> Option<Vec<(i64, String)>> {
    payload
        .as_array()?
        .iter()
        .map(|entry| {
            let pair = entry.as_array()?;
            let ts = pair.first()?;
            let ts = ts.as_i64().or_else(|| ts.as_f64().map(|f| f as i64))?;
            let value = match pair.get(1)? {
                Value::String(s) => s.clone(),
                Value::Null => return None,
                other => other.to_string(),
            };
            Some((ts, value))
        })
        .collect()
}

/// Runs the subscription on a background task. Events stop after
/// `SubscriptionEvent::GaveUp`, on cancellation, or when the receiver is
/// dropped.
pub fn spawn_subscription(
    url: String,
    device_id: String,
    retry: RetryPolicy,
    cancel: CancellationToken,
) -> mpsc::Receiver<SubscriptionEvent> {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(run_subscription(url, device_id, retry, cancel, tx));
    rx
}

async fn run_subscription(
    url: String,
    device_id: String,
    retry: RetryPolicy,
    cancel: CancellationToken,
    tx: mpsc::Sender<SubscriptionEvent>,
) {
    let mut attempts = 0;

    loop {
        let mut connected = false;
        match stream_once(&url, &device_id, &cancel, &tx, &mut connected).await {
            Ok(StreamEnd::Cancelled) | Ok(StreamEnd::ReceiverDropped) => return,
            Ok(StreamEnd::Disconnected) => {
                tracing::info!(device = %device_id, "WebSocket disconnected");
            }
            Err(err) => {
                tracing::warn!(device = %device_id, error = %err, "WebSocket error");
            }
        }

        // A successful open restores the full retry budget.
        if connected {
            attempts = 0;
        }
        if attempts >= retry.max_attempts {
            tracing::warn!(device = %device_id, attempts, "Giving up on telemetry subscription");
            let _ = tx.send(SubscriptionEvent::GaveUp).await;
            return;
        }
        attempts += 1;
        if tx
            .send(SubscriptionEvent::Reconnecting { attempt: attempts })
            .await
            .is_err()
        {
            return;
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(retry.delay) => {}
        }
    }
}

async fn stream_once(
    url: &str,
    device_id: &str,
    cancel: &CancellationToken,
    tx: &mpsc::Sender<SubscriptionEvent>,
    connected: &mut bool,
) -> Result<StreamEnd, TelemetryError> {
    let (ws_stream, _) = tokio::select! {
        _ = cancel.cancelled() => return Ok(StreamEnd::Cancelled),
        result = connect_async(url) => result?,
    };
    let (mut write, mut read) = ws_stream.split();

    write
        .send(Message::text(subscription_command(device_id).to_string()))
        .await?;
    *connected = true;
    tracing::info!(device = %device_id, "WebSocket connected");
    if tx.send(SubscriptionEvent::Connected).await.is_err() {
        return Ok(StreamEnd::ReceiverDropped);
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(StreamEnd::Cancelled);
            }
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if let Some(update) = parse_push_message(text.as_str()) {
                        if tx.send(SubscriptionEvent::Update(update)).await.is_err() {
                            let _ = write.send(Message::Close(None)).await;
                            return Ok(StreamEnd::ReceiverDropped);
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(?frame, "WebSocket closed by server");
                    return Ok(StreamEnd::Disconnected);
                }
                // ping/pong are answered by tungstenite
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(err.into()),
                None => return Ok(StreamEnd::Disconnected),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    async fn next_event(rx: &mut mpsc::Receiver<SubscriptionEvent>) -> SubscriptionEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for subscription event")
            .expect("subscription ended")
    }

    #[test]
    fn test_websocket_url() {
        assert_eq!(
            websocket_url("https://tb.example.com/", "a b"),
            "wss://tb.example.com/api/ws/plugins/telemetry?token=a%20b"
        );
        assert_eq!(
            websocket_url("http://localhost:8080", "t"),
            "ws://localhost:8080/api/ws/plugins/telemetry?token=t"
        );
    }

    #[test]
    fn test_subscription_command_shape() {
        let command = subscription_command("dev-42");
        assert_eq!(command["tsSubCmds"][0]["entityId"], "dev-42");
        assert_eq!(command["tsSubCmds"][0]["cmdId"], 10);
        assert_eq!(command["tsSubCmds"][0]["scope"], "LATEST_TELEMETRY");
    }

    #[test]
    fn test_parse_push_message() {
        let update = parse_push_message(
            r#"{"subscriptionId":10,"errorCode":0,"data":{
                "temperature":[[1700000000000,"21.5"]],
                "lux":[[1700000000000,300]],
                "broken":{"not":"an array"}}}"#,
        )
        .unwrap();

        assert_eq!(update["temperature"], vec![(1_700_000_000_000, "21.5".to_string())]);
        assert_eq!(update["lux"], vec![(1_700_000_000_000, "300".to_string())]);
        assert!(!update.contains_key("broken"));
    }

    #[test]
    fn test_other_subscriptions_are_ignored() {
        assert_eq!(parse_push_message(r#"{"subscriptionId":3,"data":{}}"#), None);
        assert_eq!(parse_push_message("not json"), None);
    }

    #[tokio::test]
    async fn test_gives_up_after_bounded_retries() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let retry = RetryPolicy {
            max_attempts: 2,
            delay: Duration::from_millis(10),
        };
        let mut rx = spawn_subscription(
            websocket_url(&format!("http://{addr}"), "token"),
            "dev".to_string(),
            retry,
            CancellationToken::new(),
        );

        assert_eq!(next_event(&mut rx).await, SubscriptionEvent::Reconnecting { attempt: 1 });
        assert_eq!(next_event(&mut rx).await, SubscriptionEvent::Reconnecting { attempt: 2 });
        assert_eq!(next_event(&mut rx).await, SubscriptionEvent::GaveUp);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_streams_updates_until_cancelled() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let command = ws.next().await.unwrap().unwrap();
            let command: Value = serde_json::from_str(command.to_text().unwrap()).unwrap();
            assert_eq!(command["tsSubCmds"][0]["entityId"], "dev");
            ws.send(Message::text(
                r#"{"subscriptionId":10,"data":{"humidity":[[5,"55"]]}}"#,
            ))
            .await
            .unwrap();
            // the client closes on cancellation
            while let Some(Ok(message)) = ws.next().await {
                if message.is_close() {
                    break;
                }
            }
        });

        let cancel = CancellationToken::new();
        let mut rx = spawn_subscription(
            websocket_url(&format!("http://{addr}"), "token"),
            "dev".to_string(),
            RetryPolicy::default(),
            cancel.clone(),
        );

        assert_eq!(next_event(&mut rx).await, SubscriptionEvent::Connected);
        let SubscriptionEvent::Update(update) = next_event(&mut rx).await else {
            panic!("expected an update");
        };
        assert_eq!(update["humidity"], vec![(5, "55".to_string())]);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rx.recv().await, None);
    }
}
