/// Top-K cache builder
///
/// Scores every eligible market of a segment, publishes the best `top_k` as a
/// new generation of the segment's top-K set, and writes the scores back to
/// the item store.
use crate::config::RankingSettings;
use crate::db::ItemStore;
use crate::error::{FeedError, Result};
use crate::metrics;
use crate::models::Segment;
use crate::scoring::Score;
use crate::services::ranked_sets::{RankedSetMeta, RankedSets, StagedKeys};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use rankset_cache::{RankedSetKind, ScoredMember};
use resilience::{with_retry, RetryConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ScoredMarket {
    pub id: Uuid,
    /// Sorted-set member (hyphenated id)
    pub member: String,
    pub score: Score,
}

/// Confidence descending, ties by member descending (ZREVRANGE order),
/// truncated to `top_k`.
pub fn rank_top_k(mut scored: Vec<ScoredMarket>, top_k: usize) -> Vec<ScoredMarket> {
    scored.sort_by(|a, b| {
        b.score
            .confidence
            .total_cmp(&a.score.confidence)
            .then_with(|| b.member.cmp(&a.member))
    });
    scored.truncate(top_k);
    scored
}

#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub meta: RankedSetMeta,
    pub eligible: usize,
    /// Every eligible market with its fresh score, for write-back
    pub scored: Vec<ScoredMarket>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistSummary {
    pub written: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct TopKBuilder {
    items: Arc<dyn ItemStore>,
    sets: RankedSets,
    persist_concurrency: usize,
    persist_retry: RetryConfig,
}

impl TopKBuilder {
    pub fn new(
        items: Arc<dyn ItemStore>,
        sets: RankedSets,
        persist_concurrency: usize,
        max_retries: u32,
    ) -> Self {
        Self {
            items,
            sets,
            persist_concurrency: persist_concurrency.max(1),
            persist_retry: RetryConfig {
                max_retries,
                initial_backoff: Duration::from_millis(50),
                max_backoff: Duration::from_secs(1),
                ..Default::default()
            },
        }
    }

    /// Score, rank, stage and publish. The previous top-K stays live until
    /// the pointer swap.
    pub async fn rebuild(
        &self,
        segment: &Segment,
        settings: &RankingSettings,
        staged: &StagedKeys,
    ) -> Result<BuildOutcome> {
        let name = segment.name();
        let now = Utc::now();

        let markets = self.items.list_eligible(segment, now).await?;
        let eligible = markets.len();
        let scored: Vec<ScoredMarket> = markets
            .iter()
            .map(|m| ScoredMarket {
                id: m.id,
                member: m.id.to_string(),
                score: settings.strategy.score(m, now),
            })
            .collect();

        let members: Vec<ScoredMember> = rank_top_k(scored.clone(), settings.top_k)
            .into_iter()
            .map(|s| ScoredMember::new(s.member, s.score.confidence))
            .collect();

        let previous = self.sets.current(name, RankedSetKind::TopK).await?;
        let generation = self.sets.allocate_generation(name).await?;
        self.sets
            .stage(
                name,
                RankedSetKind::TopK,
                generation,
                &members,
                settings.top_k_ttl_secs + settings.superseded_grace_secs,
                staged,
            )
            .await?;

        let meta = RankedSetMeta {
            generation,
            kind: RankedSetKind::TopK,
            size: members.len(),
            built_at: now,
            expires_at: now + chrono::Duration::seconds(settings.top_k_ttl_secs as i64),
            source_generation: None,
        };
        self.sets
            .publish(
                name,
                &meta,
                previous.as_ref(),
                settings.superseded_grace_secs,
                staged,
            )
            .await?;

        info!(
            segment = %name,
            generation,
            eligible,
            size = meta.size,
            strategy = settings.strategy.name(),
            "Top-K set published"
        );

        Ok(BuildOutcome {
            meta,
            eligible,
            scored,
        })
    }

    /// Write scores back, in parallel, each market isolated from the rest.
    /// Failures are logged and counted, never returned.
    pub async fn persist_scores(&self, segment: &Segment, scored: &[ScoredMarket]) -> PersistSummary {
        let results: Vec<bool> = stream::iter(scored.iter().cloned().map(|s| {
            let items = self.items.clone();
            let retry = self.persist_retry.clone();
            let (id, confidence, trend_score) = (s.id, s.score.confidence, s.score.trend_score);
            async move {
                let written = with_retry(retry, FeedError::is_transient, || {
                    let items = items.clone();
                    async move { items.write_score(id, confidence, trend_score).await }
                })
                .await;
                match written {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(market_id = %id, error = %e, "Score write-back failed");
                        false
                    }
                }
            }
        }))
        .buffer_unordered(self.persist_concurrency)
        .collect()
        .await;

        let failed = results.iter().filter(|ok| !**ok).count();
        let summary = PersistSummary {
            written: results.len() - failed,
            failed,
        };
        metrics::record_item_errors(segment.name(), "persist", failed as u64);
        if failed > 0 {
            warn!(
                segment = %segment,
                written = summary.written,
                failed,
                "Score write-back finished with failures"
            );
        }
        summary
    }
}
