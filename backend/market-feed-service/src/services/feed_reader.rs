//! Feed reader
//!
//! First pages prefer the diversity set, then the raw top-K set, then a
//! chronological query against the item store. A tier that is missing or
//! fails hands over to the next; only when every tier fails does the caller
//! see an error.
//!
//! Ranked cursors are pinned to a snapshot generation. Continuing one after a
//! rebuild has replaced that snapshot yields [`FeedError::StaleCursor`] so the
//! client restarts from the first page instead of seeing duplicates or gaps.
//! A store failure while continuing a still-live snapshot is reported as the
//! store error itself, not as a resync.
//!
//! Only configured segments are served; cursors only continue in the segment
//! that issued them.

use crate::config::FeedConfig;
use crate::db::ItemStore;
use crate::error::{FeedError, Result};
use crate::metrics;
use crate::models::{ChronoPosition, ItemSummary, Market, Segment};
use crate::services::cursor::{Cursor, Tier};
use crate::services::ranked_sets::{RankedSetMeta, RankedSets};
use dashmap::DashMap;
use rankset_cache::RankedSetKind;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPage {
    pub items: Vec<ItemSummary>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
    pub tier: Tier,
    /// Snapshot generation for ranked tiers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<u64>,
}

impl FeedPage {
    fn empty(tier: Tier, generation: Option<u64>) -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
            has_more: false,
            tier,
            generation,
        }
    }
}

#[derive(Default)]
struct TierCounters {
    diversity: AtomicU64,
    top_k: AtomicU64,
    chronological: AtomicU64,
    errors: AtomicU64,
}

/// Pages served per tier for one segment
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierSnapshot {
    pub diversity: u64,
    pub top_k: u64,
    pub chronological: u64,
    pub tier_errors: u64,
    /// Share of pages answered from a ranked set
    pub hit_rate: f64,
}

/// Per-segment tier accounting shared by the reader and the stats endpoint
#[derive(Default)]
pub struct TierStats {
    segments: DashMap<String, TierCounters>,
}

impl TierStats {
    pub fn record_served(&self, segment: &str, tier: Tier) {
        let counters = self.segments.entry(segment.to_string()).or_default();
        let counter = match tier {
            Tier::Diversity => &counters.diversity,
            Tier::TopK => &counters.top_k,
            Tier::Chronological => &counters.chronological,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, segment: &str) {
        self.segments
            .entry(segment.to_string())
            .or_default()
            .errors
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, segment: &str) -> TierSnapshot {
        let Some(c) = self.segments.get(segment) else {
            return TierSnapshot::default();
        };
        let diversity = c.diversity.load(Ordering::Relaxed);
        let top_k = c.top_k.load(Ordering::Relaxed);
        let chronological = c.chronological.load(Ordering::Relaxed);
        let total = diversity + top_k + chronological;
        TierSnapshot {
            diversity,
            top_k,
            chronological,
            tier_errors: c.errors.load(Ordering::Relaxed),
            hit_rate: if total == 0 {
                0.0
            } else {
                (diversity + top_k) as f64 / total as f64
            },
        }
    }
}

#[derive(Clone)]
pub struct FeedReader {
    items: Arc<dyn ItemStore>,
    sets: RankedSets,
    stats: Arc<TierStats>,
    segments: Arc<Vec<Segment>>,
    default_limit: usize,
    max_limit: usize,
}

impl FeedReader {
    pub fn new(
        items: Arc<dyn ItemStore>,
        sets: RankedSets,
        stats: Arc<TierStats>,
        feed: &FeedConfig,
    ) -> Self {
        Self {
            items,
            sets,
            stats,
            segments: Arc::new(feed.parsed_segments()),
            default_limit: feed.default_limit,
            max_limit: feed.max_limit,
        }
    }

    pub fn stats(&self) -> &Arc<TierStats> {
        &self.stats
    }

    /// Segments this reader serves
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Parse a client-supplied segment name, `default` when absent
    pub fn resolve_segment(&self, raw: Option<&str>) -> Result<Segment> {
        let segment = Segment::parse(raw.unwrap_or(Segment::DEFAULT))?;
        self.check_segment(&segment)?;
        Ok(segment)
    }

    fn check_segment(&self, segment: &Segment) -> Result<()> {
        if self.segments.contains(segment) {
            Ok(())
        } else {
            Err(FeedError::InvalidRequest(format!(
                "segment '{}' is not served",
                segment.name()
            )))
        }
    }

    fn clamp_limit(&self, limit: Option<usize>) -> usize {
        limit.unwrap_or(self.default_limit).clamp(1, self.max_limit)
    }

    pub async fn get_page(
        &self,
        segment: &Segment,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> Result<FeedPage> {
        self.check_segment(segment)?;
        let limit = self.clamp_limit(limit);
        let cursor = cursor
            .filter(|c| !c.trim().is_empty())
            .map(Cursor::decode)
            .transpose()?;
        let name = segment.name();

        if let Some(cursor) = &cursor {
            if cursor.segment() != name {
                return Err(FeedError::InvalidCursor(format!(
                    "cursor was issued for segment '{}'",
                    cursor.segment()
                )));
            }
        }

        let page = match cursor {
            None => self.first_page(segment, limit).await?,
            Some(Cursor::Ranked {
                tier,
                generation,
                offset,
                ..
            }) => {
                self.continue_ranked(segment, tier, generation, offset, limit)
                    .await?
            }
            Some(Cursor::Chronological { updated_at, id, .. }) => {
                let after = ChronoPosition { updated_at, id };
                self.chronological(segment, Some(after), limit)
                    .await
                    .map_err(|e| self.exhausted(name, e))?
            }
        };

        self.stats.record_served(name, page.tier);
        metrics::record_page(name, page.tier.as_str());
        Ok(page)
    }

    async fn first_page(&self, segment: &Segment, limit: usize) -> Result<FeedPage> {
        let name = segment.name();

        match self.sets.current(name, RankedSetKind::TopK).await {
            Ok(Some(top_k)) => {
                match self.sets.live_diversity(name, &top_k).await {
                    Ok(Some(diversity)) => {
                        match self
                            .ranked_page(segment, Tier::Diversity, &diversity, 0, limit)
                            .await
                        {
                            Ok(page) => return Ok(page),
                            Err(e) => self.tier_failed(name, Tier::Diversity, &e),
                        }
                    }
                    Ok(None) => debug!(segment = %name, "No diversity set for live top-K"),
                    Err(e) => self.tier_failed(name, Tier::Diversity, &e),
                }

                match self.ranked_page(segment, Tier::TopK, &top_k, 0, limit).await {
                    Ok(page) => return Ok(page),
                    Err(e) => self.tier_failed(name, Tier::TopK, &e),
                }
            }
            Ok(None) => debug!(segment = %name, "No live top-K set, serving chronological"),
            Err(e) => self.tier_failed(name, Tier::TopK, &e),
        }

        self.chronological(segment, None, limit)
            .await
            .map_err(|e| self.exhausted(name, e))
    }

    async fn continue_ranked(
        &self,
        segment: &Segment,
        tier: Tier,
        generation: u64,
        offset: usize,
        limit: usize,
    ) -> Result<FeedPage> {
        let name = segment.name();
        let live = match self.resolve(name, tier).await {
            Ok(live) => live,
            Err(e) => {
                self.tier_failed(name, tier, &e);
                return Err(e);
            }
        };

        match live {
            Some(meta) if meta.generation == generation => self
                .ranked_page(segment, tier, &meta, offset, limit)
                .await
                .map_err(|e| {
                    self.tier_failed(name, tier, &e);
                    e
                }),
            _ => {
                debug!(segment = %name, tier = tier.as_str(), generation, "Cursor generation superseded");
                Err(FeedError::StaleCursor)
            }
        }
    }

    async fn resolve(&self, segment: &str, tier: Tier) -> Result<Option<RankedSetMeta>> {
        let top_k = self.sets.current(segment, RankedSetKind::TopK).await?;
        match (tier, top_k) {
            (Tier::TopK, top_k) => Ok(top_k),
            (Tier::Diversity, Some(top_k)) => self.sets.live_diversity(segment, &top_k).await,
            _ => Ok(None),
        }
    }

    async fn ranked_page(
        &self,
        segment: &Segment,
        tier: Tier,
        meta: &RankedSetMeta,
        offset: usize,
        limit: usize,
    ) -> Result<FeedPage> {
        let name = segment.name();
        if offset >= meta.size {
            return Ok(FeedPage::empty(tier, Some(meta.generation)));
        }

        // one extra member tells us whether another page exists
        let mut members = self.sets.range(name, meta, offset, offset + limit).await?;
        if members.is_empty() {
            return Err(FeedError::TransientStore(format!(
                "snapshot g{} for {} is missing",
                meta.generation, name
            )));
        }
        let has_more = members.len() > limit;
        members.truncate(limit);

        let ids: Vec<Uuid> = members
            .iter()
            .filter_map(|m| Uuid::parse_str(&m.member).ok())
            .collect();
        let items = self.hydrate(&ids).await?;

        let next_cursor = if has_more {
            Some(
                Cursor::Ranked {
                    segment: name.to_string(),
                    tier,
                    generation: meta.generation,
                    offset: offset + limit,
                }
                .encode()?,
            )
        } else {
            None
        };

        Ok(FeedPage {
            items,
            next_cursor,
            has_more,
            tier,
            generation: Some(meta.generation),
        })
    }

    /// Rank order preserved; markets deleted since the build are skipped
    async fn hydrate(&self, ids: &[Uuid]) -> Result<Vec<ItemSummary>> {
        let mut by_id: HashMap<Uuid, Market> = self
            .items
            .find_by_ids(ids)
            .await?
            .into_iter()
            .map(|m| (m.id, m))
            .collect();
        Ok(ids
            .iter()
            .filter_map(|id| by_id.remove(id))
            .map(|m| ItemSummary::from(&m))
            .collect())
    }

    async fn chronological(
        &self,
        segment: &Segment,
        after: Option<ChronoPosition>,
        limit: usize,
    ) -> Result<FeedPage> {
        let mut rows = self
            .items
            .list_recent_unranked(segment, after, limit + 1)
            .await?;
        let has_more = rows.len() > limit;
        rows.truncate(limit);

        let next_cursor = match rows.last() {
            Some(last) if has_more => {
                Some(Cursor::after(segment.name(), last.position()).encode()?)
            }
            _ => None,
        };

        Ok(FeedPage {
            items: rows.iter().map(ItemSummary::from).collect(),
            next_cursor,
            has_more,
            tier: Tier::Chronological,
            generation: None,
        })
    }

    fn tier_failed(&self, segment: &str, tier: Tier, error: &FeedError) {
        warn!(segment = %segment, tier = tier.as_str(), error = %error, "Feed tier failed, falling through");
        self.stats.record_error(segment);
        metrics::record_tier_error(segment, tier.as_str());
    }

    fn exhausted(&self, segment: &str, error: FeedError) -> FeedError {
        self.tier_failed(segment, Tier::Chronological, &error);
        FeedError::AllTiersExhausted(segment.to_string())
    }
}
