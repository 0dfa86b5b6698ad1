//! Ranked-set caching layer
//!
//! Sorted-set primitives for publishing ranked feed snapshots:
//! - Unified key schema with versioning
//! - Bulk replace of a sorted set inside a single MULTI/EXEC
//! - Pointer swap that retires the superseded snapshot after a grace period
//! - Expiring per-segment leases with compare-and-delete release
//! - Per-command timeouts and metrics
//!
//! Two backends implement [`SortedSetStore`]: [`RedisSortedSetStore`] for
//! production and [`InMemorySortedSetStore`] for local runs and tests.

mod error;
mod keys;
mod metrics;

pub mod memory;
pub mod redis_store;

pub use error::{CacheError, CacheResult};
pub use keys::{RankedSetKey, RankedSetKind, KEY_VERSION};
pub use memory::InMemorySortedSetStore;
pub use metrics::CacheMetrics;
pub use redis_store::RedisSortedSetStore;

use std::time::Duration;

/// A member of a sorted set together with its score
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMember {
    pub member: String,
    pub score: f64,
}

impl ScoredMember {
    pub fn new(member: impl Into<String>, score: f64) -> Self {
        Self {
            member: member.into(),
            score,
        }
    }
}

/// Snapshot to expire once a pointer has moved past it
#[derive(Debug, Clone, Copy)]
pub struct Retire<'a> {
    pub key: &'a str,
    pub grace_secs: u64,
}

/// Sorted-set store operations.
///
/// Rank ranges use inclusive `start..=stop` indices, like ZRANGE. Ordering
/// follows Redis: ascending by score, ties broken by member bytes; the
/// descending variants are the exact reverse.
#[async_trait::async_trait]
pub trait SortedSetStore: Send + Sync {
    /// Atomically overwrite `key` with `members` and set its TTL.
    /// An empty member list leaves the key absent.
    async fn replace_sorted_set(
        &self,
        key: &str,
        members: &[ScoredMember],
        ttl_secs: u64,
    ) -> CacheResult<()>;

    /// Members by rank, highest score first
    async fn range_by_rank_desc(
        &self,
        key: &str,
        start: usize,
        stop: usize,
    ) -> CacheResult<Vec<ScoredMember>>;

    /// Members by rank, lowest score first
    async fn range_by_rank(
        &self,
        key: &str,
        start: usize,
        stop: usize,
    ) -> CacheResult<Vec<ScoredMember>>;

    async fn exists(&self, key: &str) -> CacheResult<bool>;

    async fn cardinality(&self, key: &str) -> CacheResult<u64>;

    async fn delete(&self, key: &str) -> CacheResult<()>;

    async fn get_string(&self, key: &str) -> CacheResult<Option<String>>;

    /// Set a string value; `None` keeps it without expiry
    async fn set_string(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> CacheResult<()>;

    /// Remaining time to live. `None` when the key is missing or persistent.
    async fn ttl(&self, key: &str) -> CacheResult<Option<Duration>>;

    async fn incr(&self, key: &str) -> CacheResult<u64>;

    /// Point `pointer_key` at a new value and, in the same transaction,
    /// schedule the superseded snapshot for expiry.
    async fn swap_pointer(
        &self,
        pointer_key: &str,
        value: &str,
        ttl_secs: u64,
        retire: Option<Retire<'_>>,
    ) -> CacheResult<()>;

    /// SET NX with expiry. Returns true when the lease was taken.
    async fn try_acquire_lease(&self, key: &str, token: &str, ttl: Duration) -> CacheResult<bool>;

    /// Delete the lease only if it is still held by `token`.
    async fn release_lease(&self, key: &str, token: &str) -> CacheResult<bool>;
}
