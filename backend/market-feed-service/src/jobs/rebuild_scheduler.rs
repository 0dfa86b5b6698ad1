//! Safety-net rebuild scheduler
//!
//! Ingestion events drive most rebuilds. This job covers missed events and
//! time-driven score drift by triggering every configured segment on a fixed
//! interval. Triggers are non-forced, so a segment rebuilt recently by an
//! ingestion event is skipped by the debounce.

use crate::models::Segment;
use crate::services::{RebuildCoordinator, TriggerOutcome};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct RebuildSchedulerConfig {
    pub interval: Duration,
    pub segments: Vec<Segment>,
}

/// Runs forever; spawn it
pub async fn start_rebuild_scheduler(coordinator: RebuildCoordinator, config: RebuildSchedulerConfig) {
    info!(
        interval_secs = config.interval.as_secs(),
        segments = config.segments.len(),
        "Starting rebuild scheduler"
    );

    let mut ticker = interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // first tick completes immediately and warms a cold cache
        ticker.tick().await;
        let accepted = run_tick(&coordinator, &config.segments);
        debug!(accepted, "Scheduled rebuild tick");
    }
}

/// Trigger every segment once; returns how many were accepted
pub fn run_tick(coordinator: &RebuildCoordinator, segments: &[Segment]) -> usize {
    segments
        .iter()
        .map(|segment| coordinator.trigger_rebuild(segment, false))
        .filter(|outcome| *outcome == TriggerOutcome::Accepted)
        .count()
}
