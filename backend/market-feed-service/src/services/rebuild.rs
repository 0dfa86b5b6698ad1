//! Rebuild coordination
//!
//! At most one rebuild runs per segment. Inside the process that is enforced
//! by per-segment state; across processes by a store-backed lease that
//! expires on its own if the holder dies. Triggers that arrive while a
//! rebuild is running collapse into a single rerun once it finishes.
//! Non-forced triggers inside the debounce window are deferred: one rebuild
//! is scheduled for the moment the window closes.
//!
//! A rebuild runs under a deadline. When it fires, the in-progress attempt is
//! dropped, its unpublished snapshots are deleted and the previously
//! published sets stay live.

use crate::config::{RankingSettings, RebuildConfig, SettingsHandle};
use crate::db::ItemStore;
use crate::error::{FeedError, Result};
use crate::metrics;
use crate::models::Segment;
use crate::services::cache_builder::TopKBuilder;
use crate::services::diversity::DiversitySampler;
use crate::services::feed_reader::{TierSnapshot, TierStats};
use crate::services::ranked_sets::{RankedSets, StagedKeys};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rankset_cache::RankedSetKind;
use resilience::{run_with_deadline, with_retry, RetryConfig, TimeoutError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOutcome {
    Accepted,
    AlreadyInFlight,
    /// Scheduled for the end of the debounce window
    Deferred,
}

impl TriggerOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerOutcome::Accepted => "accepted",
            TriggerOutcome::AlreadyInFlight => "already_in_flight",
            TriggerOutcome::Deferred => "deferred",
        }
    }
}

/// Summary of one completed rebuild, persisted next to the ranked sets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildReport {
    pub segment: String,
    pub generation: u64,
    pub diversity_generation: Option<u64>,
    pub eligible: usize,
    pub top_k_size: usize,
    pub diversity_size: usize,
    pub persist_errors: usize,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentStats {
    pub segment: String,
    pub total_eligible: u64,
    pub top_k_size: usize,
    pub diversity_size: usize,
    pub last_rebuilt_at: Option<DateTime<Utc>>,
    pub top_k_generation: Option<u64>,
    pub diversity_generation: Option<u64>,
    pub rebuild_in_flight: bool,
    pub last_rebuild: Option<RebuildReport>,
    pub tiers: TierSnapshot,
}

#[derive(Debug, Default)]
struct SegmentState {
    in_flight: bool,
    pending: bool,
    /// A deferred trigger is already waiting for the window to close
    deferred: bool,
    last_completed: Option<Instant>,
}

struct Inner {
    builder: TopKBuilder,
    sampler: DiversitySampler,
    sets: RankedSets,
    items: Arc<dyn ItemStore>,
    settings: Arc<SettingsHandle>,
    config: RebuildConfig,
    tier_stats: Arc<TierStats>,
    states: DashMap<String, SegmentState>,
}

#[derive(Clone)]
pub struct RebuildCoordinator {
    inner: Arc<Inner>,
}

impl RebuildCoordinator {
    pub fn new(
        items: Arc<dyn ItemStore>,
        sets: RankedSets,
        settings: Arc<SettingsHandle>,
        config: RebuildConfig,
        tier_stats: Arc<TierStats>,
    ) -> Self {
        let builder = TopKBuilder::new(
            items.clone(),
            sets.clone(),
            config.persist_concurrency,
            config.max_retries,
        );
        let sampler = DiversitySampler::new(items.clone(), sets.clone());
        Self {
            inner: Arc::new(Inner {
                builder,
                sampler,
                sets,
                items,
                settings,
                config,
                tier_stats,
                states: DashMap::new(),
            }),
        }
    }

    /// Start a background rebuild. A running rebuild owes one rerun instead;
    /// a non-forced trigger inside the debounce window runs once the window
    /// closes.
    pub fn trigger_rebuild(&self, segment: &Segment, force: bool) -> TriggerOutcome {
        let name = segment.name();
        let mut wake_at = None;
        let outcome = {
            let mut state = self.inner.states.entry(name.to_string()).or_default();
            let window_end = if force { None } else { self.window_end(&state) };
            if state.in_flight {
                state.pending = true;
                TriggerOutcome::AlreadyInFlight
            } else if let Some(at) = window_end {
                if !state.deferred {
                    state.deferred = true;
                    wake_at = Some(at);
                }
                TriggerOutcome::Deferred
            } else {
                state.in_flight = true;
                TriggerOutcome::Accepted
            }
        };

        metrics::record_trigger(name, outcome.as_str());
        debug!(segment = %name, force, outcome = outcome.as_str(), "Rebuild trigger");

        if outcome == TriggerOutcome::Accepted {
            let this = self.clone();
            let segment = segment.clone();
            tokio::spawn(async move { this.drive(segment).await });
        } else if let Some(at) = wake_at {
            let this = self.clone();
            let segment = segment.clone();
            tokio::spawn(async move {
                tokio::time::sleep_until(at).await;
                this.run_deferred(segment).await;
            });
        }
        outcome
    }

    /// Run a rebuild on the caller's task and return its report
    pub async fn rebuild_now(&self, segment: &Segment) -> Result<RebuildReport> {
        let name = segment.name();
        {
            let mut state = self.inner.states.entry(name.to_string()).or_default();
            if state.in_flight {
                state.pending = true;
                return Err(FeedError::ConcurrentRebuildRejected(name.to_string()));
            }
            state.in_flight = true;
        }

        let result = self.run_guarded(segment).await;

        if self.finish_run(name) {
            let this = self.clone();
            let segment = segment.clone();
            tokio::spawn(async move { this.drive(segment).await });
        }
        result
    }

    pub fn is_in_flight(&self, segment: &str) -> bool {
        self.inner
            .states
            .get(segment)
            .map(|s| s.in_flight)
            .unwrap_or(false)
    }

    pub async fn stats(&self, segment: &Segment) -> Result<SegmentStats> {
        let name = segment.name();
        let total_eligible = self.inner.items.count_eligible(segment, Utc::now()).await?;
        let top_k = self.inner.sets.current(name, RankedSetKind::TopK).await?;
        let diversity = match &top_k {
            Some(top_k) => self.inner.sets.live_diversity(name, top_k).await?,
            None => None,
        };
        let last_rebuild: Option<RebuildReport> = match self.inner.sets.read_report(name).await {
            Ok(report) => report,
            Err(e) => {
                warn!(segment = %name, error = %e, "Unreadable rebuild report");
                None
            }
        };

        Ok(SegmentStats {
            segment: name.to_string(),
            total_eligible,
            top_k_size: top_k.as_ref().map(|m| m.size).unwrap_or(0),
            diversity_size: diversity.as_ref().map(|m| m.size).unwrap_or(0),
            last_rebuilt_at: top_k.as_ref().map(|m| m.built_at),
            top_k_generation: top_k.as_ref().map(|m| m.generation),
            diversity_generation: diversity.as_ref().map(|m| m.generation),
            rebuild_in_flight: self.is_in_flight(name),
            last_rebuild,
            tiers: self.inner.tier_stats.snapshot(name),
        })
    }

    /// Drop the published sets; reads go chronological until the next rebuild
    pub async fn invalidate(&self, segment: &Segment) -> Result<()> {
        let name = segment.name();
        self.inner.sets.invalidate(name).await?;
        for kind in [RankedSetKind::TopK, RankedSetKind::Diversity] {
            metrics::set_ranked_set_size(name, kind.as_str(), 0);
        }
        info!(segment = %name, "Ranked sets invalidated");
        Ok(())
    }

    /// End of the debounce window, if it is still open
    fn window_end(&self, state: &SegmentState) -> Option<Instant> {
        state
            .last_completed
            .map(|at| at + self.inner.config.min_interval())
            .filter(|end| *end > Instant::now())
    }

    async fn run_deferred(&self, segment: Segment) {
        let start = {
            let mut state = self.inner.states.entry(segment.name().to_string()).or_default();
            state.deferred = false;
            if state.in_flight {
                state.pending = true;
                false
            } else {
                state.in_flight = true;
                true
            }
        };
        if start {
            debug!(segment = %segment, "Running deferred rebuild");
            self.drive(segment).await;
        }
    }

    /// Clears the in-flight flag unless a rerun is owed. Returns true when
    /// the caller must start that rerun.
    fn finish_run(&self, segment: &str) -> bool {
        let mut state = self.inner.states.entry(segment.to_string()).or_default();
        if state.pending {
            state.pending = false;
            true
        } else {
            state.in_flight = false;
            false
        }
    }

    async fn drive(&self, segment: Segment) {
        loop {
            // failures are logged and counted inside
            let _ = self.run_guarded(&segment).await;
            if !self.finish_run(segment.name()) {
                break;
            }
            debug!(segment = %segment, "Running coalesced rebuild");
        }
    }

    async fn run_guarded(&self, segment: &Segment) -> Result<RebuildReport> {
        let name = segment.name();
        let config = &self.inner.config;
        let token = Uuid::new_v4().to_string();

        if !self
            .inner
            .sets
            .acquire_lease(name, &token, config.lease_ttl())
            .await?
        {
            metrics::record_rebuild_run(name, "lease_held");
            warn!(segment = %name, "Rebuild lease held by another process");
            return Err(FeedError::ConcurrentRebuildRejected(name.to_string()));
        }

        let started = Instant::now();
        let settings = self.inner.settings.snapshot();
        let staged = StagedKeys::default();
        let retry = RetryConfig::default().with_max_retries(config.max_retries);

        let attempt = {
            let this = self.clone();
            let segment = segment.clone();
            let staged = staged.clone();
            move || {
                let this = this.clone();
                let segment = segment.clone();
                let settings = settings.clone();
                let staged = staged.clone();
                async move { this.rebuild_once(&segment, &settings, &staged, started).await }
            }
        };
        let result = run_with_deadline(
            config.timeout(),
            with_retry(retry, FeedError::is_transient, attempt),
        )
        .await;

        self.inner.sets.discard_staged(&staged).await;
        match self.inner.sets.release_lease(name, &token).await {
            Ok(true) => {}
            Ok(false) => warn!(segment = %name, "Rebuild lease expired before release"),
            Err(e) => warn!(segment = %name, error = %e, "Failed to release rebuild lease"),
        }

        let elapsed = started.elapsed();
        metrics::record_rebuild_duration(name, elapsed);

        match result {
            Ok(report) => {
                metrics::record_rebuild_run(name, "success");
                if let Some(mut state) = self.inner.states.get_mut(name) {
                    state.last_completed = Some(Instant::now());
                }
                Ok(report)
            }
            Err(TimeoutError::Elapsed(deadline)) => {
                metrics::record_rebuild_run(name, "timeout");
                error!(segment = %name, timeout_secs = deadline.as_secs(), "Rebuild timed out, previous sets stay live");
                Err(FeedError::RebuildTimeout(deadline))
            }
            Err(TimeoutError::Inner(e)) => {
                let e = e.into_inner();
                metrics::record_rebuild_run(name, "error");
                error!(segment = %name, error = %e, duration_ms = elapsed.as_millis() as u64, "Rebuild failed");
                Err(e)
            }
        }
    }

    async fn rebuild_once(
        &self,
        segment: &Segment,
        settings: &RankingSettings,
        staged: &StagedKeys,
        started: Instant,
    ) -> Result<RebuildReport> {
        let name = segment.name();
        let built = self.inner.builder.rebuild(segment, settings, staged).await?;

        // top-K is already live; a failed sample leaves readers on it
        let diversity = match self.inner.sampler.sample(segment, settings, staged).await {
            Ok(meta) => meta,
            Err(e) => {
                warn!(segment = %name, error = %e, "Diversity sampling failed");
                metrics::record_item_errors(name, "diversity", 1);
                None
            }
        };

        let persisted = self.inner.builder.persist_scores(segment, &built.scored).await;

        let report = RebuildReport {
            segment: name.to_string(),
            generation: built.meta.generation,
            diversity_generation: diversity.as_ref().map(|m| m.generation),
            eligible: built.eligible,
            top_k_size: built.meta.size,
            diversity_size: diversity.as_ref().map(|m| m.size).unwrap_or(0),
            persist_errors: persisted.failed,
            duration_ms: started.elapsed().as_millis() as u64,
            completed_at: Utc::now(),
        };

        if let Err(e) = self.inner.sets.write_report(name, &report).await {
            warn!(segment = %name, error = %e, "Failed to store rebuild report");
        }
        metrics::set_ranked_set_size(name, RankedSetKind::TopK.as_str(), report.top_k_size);
        metrics::set_ranked_set_size(name, RankedSetKind::Diversity.as_str(), report.diversity_size);

        info!(
            segment = %name,
            generation = report.generation,
            eligible = report.eligible,
            top_k_size = report.top_k_size,
            diversity_size = report.diversity_size,
            persist_errors = report.persist_errors,
            duration_ms = report.duration_ms,
            "Rebuild completed"
        );
        Ok(report)
    }
}
