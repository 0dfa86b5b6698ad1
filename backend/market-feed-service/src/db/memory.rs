//! In-memory item store for local runs and tests
//!
//! Follows the same ordering and eligibility rules as the Postgres store.
//! Failure switches let tests simulate an unreachable database or isolated
//! score write failures.

use crate::db::ItemStore;
use crate::error::{FeedError, Result};
use crate::models::{ChronoPosition, Market, Segment};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryItemStore {
    markets: RwLock<HashMap<Uuid, Market>>,
    failing_writes: RwLock<HashSet<Uuid>>,
    unavailable: AtomicBool,
    score_writes: AtomicU64,
}

impl InMemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_markets(markets: impl IntoIterator<Item = Market>) -> Self {
        let store = Self::new();
        for m in markets {
            store.upsert(m);
        }
        store
    }

    pub fn upsert(&self, market: Market) {
        self.markets.write().insert(market.id, market);
    }

    pub fn remove(&self, id: Uuid) -> Option<Market> {
        self.markets.write().remove(&id)
    }

    pub fn get(&self, id: Uuid) -> Option<Market> {
        self.markets.read().get(&id).cloned()
    }

    /// Make every call fail as if the database were down
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Make `write_score` fail for one market
    pub fn fail_score_writes_for(&self, id: Uuid) {
        self.failing_writes.write().insert(id);
    }

    /// Successful score writes so far
    pub fn score_writes(&self) -> u64 {
        self.score_writes.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(FeedError::ItemStore("in-memory item store offline".to_string()))
        } else {
            Ok(())
        }
    }

    fn eligible(&self, segment: &Segment, now: DateTime<Utc>) -> Vec<Market> {
        self.markets
            .read()
            .values()
            .filter(|m| m.is_eligible(now) && segment.matches(m))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ItemStore for InMemoryItemStore {
    async fn list_eligible(&self, segment: &Segment, now: DateTime<Utc>) -> Result<Vec<Market>> {
        self.check_available()?;
        Ok(self.eligible(segment, now))
    }

    async fn count_eligible(&self, segment: &Segment, now: DateTime<Utc>) -> Result<u64> {
        self.check_available()?;
        Ok(self.eligible(segment, now).len() as u64)
    }

    async fn write_score(&self, id: Uuid, confidence: f64, trend_score: f64) -> Result<()> {
        self.check_available()?;
        if self.failing_writes.read().contains(&id) {
            return Err(FeedError::ItemStore(format!("score write rejected for {}", id)));
        }
        if let Some(m) = self.markets.write().get_mut(&id) {
            m.confidence = Some(confidence);
            m.trend_score = Some(trend_score);
        }
        self.score_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Market>> {
        self.check_available()?;
        Ok(self.get(id))
    }

    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Market>> {
        self.check_available()?;
        let markets = self.markets.read();
        Ok(ids.iter().filter_map(|id| markets.get(id).cloned()).collect())
    }

    async fn list_recent_unranked(
        &self,
        segment: &Segment,
        after: Option<ChronoPosition>,
        limit: usize,
    ) -> Result<Vec<Market>> {
        self.check_available()?;
        let mut rows: Vec<Market> = self
            .eligible(segment, Utc::now())
            .into_iter()
            .filter(|m| after.map_or(true, |p| p.precedes(m)))
            .collect();
        rows.sort_by(|a, b| (b.updated_at, b.id).cmp(&(a.updated_at, a.id)));
        rows.truncate(limit);
        Ok(rows)
    }
}
