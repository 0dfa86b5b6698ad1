//! Shared fixtures for integration tests
//!
//! Everything runs against the in-memory item store and sorted-set store, so
//! no Postgres or Redis is needed.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use market_feed_service::config::{FeedConfig, RankingSettings, RebuildConfig, SettingsHandle};
use market_feed_service::db::{InMemoryItemStore, ItemStore};
use market_feed_service::models::{ChronoPosition, Market, Segment};
use market_feed_service::services::{FeedReader, RankedSets, RebuildCoordinator, TierStats};
use market_feed_service::Result;
use rankset_cache::InMemorySortedSetStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const CATEGORIES: [&str; 6] = ["politics", "crypto", "sports", "science", "culture", "economy"];

/// An eligible market; `rank` controls volume so higher ranks score higher
pub fn market(tag: &str, rank: usize) -> Market {
    let now = Utc::now();
    Market {
        id: Uuid::new_v4(),
        source: "polymarket".to_string(),
        external_id: format!("ext-{}", Uuid::new_v4()),
        title: format!("{} market #{}", tag, rank),
        volume: 1_000.0 * (rank + 1) as f64,
        liquidity: 25_000.0,
        price_change_24h: 1.5,
        end_date: Some(now + ChronoDuration::days(14)),
        social_mention_score: 20.0,
        trend_signal: None,
        tags: vec![tag.to_string()],
        confidence: None,
        trend_score: None,
        active: true,
        updated_at: now - ChronoDuration::seconds(rank as i64),
    }
}

/// `count` markets cycling through [`CATEGORIES`]
pub fn catalog(count: usize) -> Vec<Market> {
    (0..count)
        .map(|i| market(CATEGORIES[i % CATEGORIES.len()], i))
        .collect()
}

/// Item store wrapper that can stall `list_eligible` and counts calls to it
pub struct SlowItemStore {
    pub inner: Arc<InMemoryItemStore>,
    delay_ms: AtomicU64,
    list_calls: AtomicU64,
}

impl SlowItemStore {
    pub fn new(inner: Arc<InMemoryItemStore>) -> Self {
        Self {
            inner,
            delay_ms: AtomicU64::new(0),
            list_calls: AtomicU64::new(0),
        }
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> u64 {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ItemStore for SlowItemStore {
    async fn list_eligible(&self, segment: &Segment, now: DateTime<Utc>) -> Result<Vec<Market>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.inner.list_eligible(segment, now).await
    }

    async fn count_eligible(&self, segment: &Segment, now: DateTime<Utc>) -> Result<u64> {
        self.inner.count_eligible(segment, now).await
    }

    async fn write_score(&self, id: Uuid, confidence: f64, trend_score: f64) -> Result<()> {
        self.inner.write_score(id, confidence, trend_score).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Market>> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Market>> {
        self.inner.find_by_ids(ids).await
    }

    async fn list_recent_unranked(
        &self,
        segment: &Segment,
        after: Option<ChronoPosition>,
        limit: usize,
    ) -> Result<Vec<Market>> {
        self.inner.list_recent_unranked(segment, after, limit).await
    }
}

/// Fully wired reader and coordinator over in-memory stores. Every category
/// in [`CATEGORIES`] is a served segment.
pub struct Harness {
    pub items: Arc<InMemoryItemStore>,
    pub slow: Arc<SlowItemStore>,
    pub store: Arc<InMemorySortedSetStore>,
    pub sets: RankedSets,
    pub settings: Arc<SettingsHandle>,
    pub coordinator: RebuildCoordinator,
    pub reader: FeedReader,
}

impl Harness {
    pub fn new(markets: Vec<Market>) -> Self {
        Self::with_config(markets, RankingSettings::default(), RebuildConfig::default())
    }

    pub fn with_config(markets: Vec<Market>, ranking: RankingSettings, rebuild: RebuildConfig) -> Self {
        let items = Arc::new(InMemoryItemStore::with_markets(markets));
        let slow = Arc::new(SlowItemStore::new(items.clone()));
        let store = Arc::new(InMemorySortedSetStore::new());
        let sets = RankedSets::new(store.clone());
        let settings = Arc::new(SettingsHandle::new(ranking).expect("valid settings"));
        let tier_stats = Arc::new(TierStats::default());

        let coordinator = RebuildCoordinator::new(
            slow.clone(),
            sets.clone(),
            settings.clone(),
            rebuild,
            tier_stats.clone(),
        );
        let feed = FeedConfig {
            segments: CATEGORIES.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        };
        let reader = FeedReader::new(slow.clone(), sets.clone(), tier_stats, &feed);

        Self {
            items,
            slow,
            store,
            sets,
            settings,
            coordinator,
            reader,
        }
    }

    /// Wait for background rebuilds of `segment` to settle
    pub async fn settle(&self, segment: &str) {
        while self.coordinator.is_in_flight(segment) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
