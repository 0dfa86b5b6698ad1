//! Ingestion completion listener
//!
//! Ingestion reports finished batches either in-process through an
//! [`IngestionHandle`] or over a Redis pub/sub channel. Each event with new
//! or updated items triggers a non-forced rebuild of the default segment and
//! of every configured segment it names. Other segment names are ignored.
//! A trigger that lands inside the debounce window still rebuilds, once the
//! window closes.

use crate::error::{FeedError, Result};
use crate::models::Segment;
use crate::services::{RebuildCoordinator, TriggerOutcome};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IngestionEvent {
    pub source: Option<String>,
    /// Category segments touched by the batch
    pub segments: Vec<String>,
    pub new_items: u64,
    pub updated_items: u64,
}

impl IngestionEvent {
    pub fn has_changes(&self) -> bool {
        self.new_items > 0 || self.updated_items > 0
    }
}

#[derive(Clone)]
pub struct IngestionHandle {
    tx: mpsc::Sender<IngestionEvent>,
}

impl IngestionHandle {
    pub async fn notify(&self, event: IngestionEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| FeedError::Internal("ingestion listener stopped".to_string()))
    }
}

pub fn ingestion_channel(capacity: usize) -> (IngestionHandle, mpsc::Receiver<IngestionEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (IngestionHandle { tx }, rx)
}

/// Trigger rebuilds for one event; returns the segments a rebuild was
/// scheduled for
pub fn handle_event(
    coordinator: &RebuildCoordinator,
    served: &[Segment],
    event: &IngestionEvent,
) -> Vec<String> {
    if !event.has_changes() {
        debug!(source = ?event.source, "Ingestion event without changes ignored");
        return Vec::new();
    }

    let mut segments = vec![Segment::All];
    for name in &event.segments {
        match Segment::parse(name) {
            Ok(segment) if !served.contains(&segment) => {
                warn!(segment = %name, "Ingestion event names a segment that is not served")
            }
            Ok(segment) if !segments.contains(&segment) => segments.push(segment),
            Ok(_) => {}
            Err(e) => warn!(segment = %name, error = %e, "Ingestion event names an invalid segment"),
        }
    }

    let accepted: Vec<String> = segments
        .iter()
        .filter(|segment| {
            matches!(
                coordinator.trigger_rebuild(segment, false),
                TriggerOutcome::Accepted | TriggerOutcome::Deferred
            )
        })
        .map(|segment| segment.name().to_string())
        .collect();

    info!(
        source = ?event.source,
        new_items = event.new_items,
        updated_items = event.updated_items,
        accepted = ?accepted,
        "Ingestion completion handled"
    );
    accepted
}

pub async fn run_channel_listener(
    coordinator: RebuildCoordinator,
    served: Vec<Segment>,
    mut rx: mpsc::Receiver<IngestionEvent>,
) {
    while let Some(event) = rx.recv().await {
        handle_event(&coordinator, &served, &event);
    }
    info!("Ingestion channel closed");
}

/// Forward pub/sub events into the in-process channel, reconnecting forever
pub async fn run_pubsub_listener(redis_url: String, channel: String, handle: IngestionHandle) {
    loop {
        match subscribe_once(&redis_url, &channel, &handle).await {
            Ok(()) => warn!(channel = %channel, "Ingestion subscription ended"),
            Err(e) => error!(channel = %channel, error = %e, "Ingestion subscription failed"),
        }
        sleep(RECONNECT_DELAY).await;
    }
}

async fn subscribe_once(redis_url: &str, channel: &str, handle: &IngestionHandle) -> Result<()> {
    let client = redis::Client::open(redis_url)
        .map_err(|e| FeedError::Configuration(format!("invalid redis url: {}", e)))?;
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .map_err(|e| FeedError::TransientStore(e.to_string()))?;
    pubsub
        .subscribe(channel)
        .await
        .map_err(|e| FeedError::TransientStore(e.to_string()))?;
    info!(channel = %channel, "Subscribed to ingestion events");

    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        let payload: String = match msg.get_payload() {
            Ok(p) => p,
            Err(e) => {
                error!(error = ?e, "Failed to read ingestion payload");
                continue;
            }
        };
        let event: IngestionEvent = match serde_json::from_str(&payload) {
            Ok(event) => event,
            Err(e) => {
                error!(error = ?e, payload = %payload, "Failed to deserialize ingestion event");
                continue;
            }
        };
        handle.notify(event).await?;
    }
    Ok(())
}
