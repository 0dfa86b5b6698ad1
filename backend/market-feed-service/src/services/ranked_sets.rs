//! Ranked-set publication and lookup
//!
//! A ranked set is published in two steps: the members are staged under a
//! generation-stamped snapshot key, then the segment's pointer key is swapped
//! to a [`RankedSetMeta`] naming that generation. Readers always resolve the
//! pointer first, so a half-written snapshot is never visible and a reader
//! that resolved the old pointer keeps a consistent view until the grace
//! period retires it.

use crate::error::{FeedError, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rankset_cache::{RankedSetKey, RankedSetKind, Retire, ScoredMember, SortedSetStore};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// How long the last rebuild report is kept
const REPORT_TTL_SECS: u64 = 7 * 24 * 3600;

/// Stored in the pointer key of every published ranked set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedSetMeta {
    pub generation: u64,
    pub kind: RankedSetKind,
    pub size: usize,
    pub built_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Top-K generation a diversity set was sampled from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_generation: Option<u64>,
}

impl RankedSetMeta {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    /// Whole seconds until expiry, at least one
    pub fn ttl_secs(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.expires_at - now).num_milliseconds().max(0) as u64;
        millis.div_ceil(1000).max(1)
    }
}

/// Snapshot keys written by the current rebuild attempt but not yet
/// published. Whatever is left here when a rebuild ends is deleted.
#[derive(Clone, Default)]
pub struct StagedKeys(Arc<Mutex<Vec<String>>>);

impl StagedKeys {
    fn push(&self, key: String) {
        self.0.lock().push(key);
    }

    fn forget(&self, key: &str) {
        self.0.lock().retain(|k| k != key);
    }

    fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

#[derive(Clone)]
pub struct RankedSets {
    store: Arc<dyn SortedSetStore>,
}

impl RankedSets {
    pub fn new(store: Arc<dyn SortedSetStore>) -> Self {
        Self { store }
    }

    /// Live pointer for `kind`, or `None` when absent or expired
    pub async fn current(&self, segment: &str, kind: RankedSetKind) -> Result<Option<RankedSetMeta>> {
        let pointer = RankedSetKey::pointer(segment, kind);
        let Some(raw) = self.store.get_string(&pointer).await? else {
            return Ok(None);
        };

        let meta: RankedSetMeta = serde_json::from_str(&raw)
            .map_err(|e| FeedError::Internal(format!("corrupt pointer {}: {}", pointer, e)))?;
        if meta.kind != kind {
            return Err(FeedError::Internal(format!(
                "pointer {} names a {} set",
                pointer, meta.kind
            )));
        }

        Ok(Some(meta).filter(|m| m.is_live(Utc::now())))
    }

    /// The diversity set, but only if it was sampled from `top_k`
    pub async fn live_diversity(
        &self,
        segment: &str,
        top_k: &RankedSetMeta,
    ) -> Result<Option<RankedSetMeta>> {
        let diversity = self.current(segment, RankedSetKind::Diversity).await?;
        Ok(diversity.filter(|d| d.source_generation == Some(top_k.generation)))
    }

    pub async fn allocate_generation(&self, segment: &str) -> Result<u64> {
        Ok(self
            .store
            .incr(&RankedSetKey::generation_counter(segment))
            .await?)
    }

    /// Write members under the snapshot key for `generation`
    pub async fn stage(
        &self,
        segment: &str,
        kind: RankedSetKind,
        generation: u64,
        members: &[ScoredMember],
        ttl_secs: u64,
        staged: &StagedKeys,
    ) -> Result<()> {
        let key = RankedSetKey::snapshot(segment, kind, generation);
        staged.push(key.clone());
        self.store.replace_sorted_set(&key, members, ttl_secs).await?;
        debug!(segment, kind = %kind, generation, members = members.len(), "Snapshot staged");
        Ok(())
    }

    /// Swap the pointer to `meta` and retire `previous` after `grace_secs`
    pub async fn publish(
        &self,
        segment: &str,
        meta: &RankedSetMeta,
        previous: Option<&RankedSetMeta>,
        grace_secs: u64,
        staged: &StagedKeys,
    ) -> Result<()> {
        let pointer = RankedSetKey::pointer(segment, meta.kind);
        let value = serde_json::to_string(meta)?;
        let old_key = previous
            .filter(|p| p.generation != meta.generation)
            .map(|p| RankedSetKey::snapshot(segment, p.kind, p.generation));
        let retire = old_key.as_deref().map(|key| Retire { key, grace_secs });

        self.store
            .swap_pointer(&pointer, &value, meta.ttl_secs(Utc::now()), retire)
            .await?;
        staged.forget(&RankedSetKey::snapshot(segment, meta.kind, meta.generation));
        Ok(())
    }

    /// Inclusive rank range in the set's natural order
    pub async fn range(
        &self,
        segment: &str,
        meta: &RankedSetMeta,
        start: usize,
        stop: usize,
    ) -> Result<Vec<ScoredMember>> {
        let key = RankedSetKey::snapshot(segment, meta.kind, meta.generation);
        let members = match meta.kind {
            RankedSetKind::TopK => self.store.range_by_rank_desc(&key, start, stop).await?,
            RankedSetKind::Diversity => self.store.range_by_rank(&key, start, stop).await?,
        };
        Ok(members)
    }

    /// Drop both pointers; snapshots age out on their own
    pub async fn invalidate(&self, segment: &str) -> Result<()> {
        for kind in [RankedSetKind::Diversity, RankedSetKind::TopK] {
            self.store.delete(&RankedSetKey::pointer(segment, kind)).await?;
        }
        Ok(())
    }

    /// Best effort: delete staged snapshots that never got published
    pub async fn discard_staged(&self, staged: &StagedKeys) {
        for key in staged.drain() {
            if let Err(e) = self.store.delete(&key).await {
                warn!(key = %key, error = %e, "Failed to discard staged snapshot");
            }
        }
    }

    pub async fn acquire_lease(&self, segment: &str, token: &str, ttl: Duration) -> Result<bool> {
        Ok(self
            .store
            .try_acquire_lease(&RankedSetKey::rebuild_lease(segment), token, ttl)
            .await?)
    }

    pub async fn release_lease(&self, segment: &str, token: &str) -> Result<bool> {
        Ok(self
            .store
            .release_lease(&RankedSetKey::rebuild_lease(segment), token)
            .await?)
    }

    pub async fn write_report<T: Serialize + Sync>(&self, segment: &str, report: &T) -> Result<()> {
        let value = serde_json::to_string(report)?;
        self.store
            .set_string(&RankedSetKey::last_rebuild(segment), &value, Some(REPORT_TTL_SECS))
            .await?;
        Ok(())
    }

    pub async fn read_report<T: DeserializeOwned>(&self, segment: &str) -> Result<Option<T>> {
        match self
            .store
            .get_string(&RankedSetKey::last_rebuild(segment))
            .await?
        {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}
