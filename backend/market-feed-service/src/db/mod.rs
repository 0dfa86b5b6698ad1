//! Item store access
//!
//! The ranking core only reads market snapshots and writes back two derived
//! scores, so the whole persistence surface is the [`ItemStore`] trait.

pub mod market_repo;
pub mod memory;

pub use market_repo::PgItemStore;
pub use memory::InMemoryItemStore;

use crate::error::Result;
use crate::models::{ChronoPosition, Market, Segment};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Active, unresolved markets of `segment` at `now`
    async fn list_eligible(&self, segment: &Segment, now: DateTime<Utc>) -> Result<Vec<Market>>;

    async fn count_eligible(&self, segment: &Segment, now: DateTime<Utc>) -> Result<u64>;

    async fn write_score(&self, id: Uuid, confidence: f64, trend_score: f64) -> Result<()>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Market>>;

    /// Markets for `ids` in no particular order; unknown ids are skipped
    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Market>>;

    /// Eligible markets, newest `updated_at` first (ties by id desc),
    /// strictly after `after` when given
    async fn list_recent_unranked(
        &self,
        segment: &Segment,
        after: Option<ChronoPosition>,
        limit: usize,
    ) -> Result<Vec<Market>>;
}
