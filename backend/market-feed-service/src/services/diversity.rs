//! Category diversity sampler
//!
//! Walks the head of the live top-K set in rank order and keeps an item if
//! fewer than `window` items have been accepted so far, or if its category
//! has not been used since the last reset. The used-category set resets every
//! `window` accepted items, so each aligned block after the first holds
//! distinct categories. Rejected items are dropped rather than deferred.
//!
//! This is a greedy single pass, not a global optimum: a block can come up
//! short of distinct categories late in the walk and simply takes whatever
//! remains.

use crate::config::RankingSettings;
use crate::db::ItemStore;
use crate::error::Result;
use crate::metrics;
use crate::models::Segment;
use crate::services::ranked_sets::{RankedSetMeta, RankedSets, StagedKeys};
use chrono::Utc;
use rankset_cache::{RankedSetKind, ScoredMember};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub member: String,
    pub category: String,
}

impl Candidate {
    pub fn new(member: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            member: member.into(),
            category: category.into(),
        }
    }
}

pub fn diversify(candidates: Vec<Candidate>, window: usize) -> Vec<Candidate> {
    let window = window.max(1);
    let mut accepted: Vec<Candidate> = Vec::with_capacity(candidates.len());
    let mut used: HashSet<String> = HashSet::new();

    for candidate in candidates {
        if accepted.len() < window || !used.contains(&candidate.category) {
            used.insert(candidate.category.clone());
            accepted.push(candidate);
            if accepted.len() % window == 0 {
                used.clear();
            }
        }
    }
    accepted
}

#[derive(Clone)]
pub struct DiversitySampler {
    items: Arc<dyn ItemStore>,
    sets: RankedSets,
}

impl DiversitySampler {
    pub fn new(items: Arc<dyn ItemStore>, sets: RankedSets) -> Self {
        Self { items, sets }
    }

    /// Resample the diversity set from the live top-K set. Returns `None`
    /// when the segment has no live top-K set to sample from.
    pub async fn sample(
        &self,
        segment: &Segment,
        settings: &RankingSettings,
        staged: &StagedKeys,
    ) -> Result<Option<RankedSetMeta>> {
        let name = segment.name();
        let Some(top_k) = self.sets.current(name, RankedSetKind::TopK).await? else {
            debug!(segment = %name, "No live top-K set to sample");
            return Ok(None);
        };

        let head = if top_k.size == 0 {
            Vec::new()
        } else {
            self.sets
                .range(name, &top_k, 0, settings.diversity_sample_size - 1)
                .await?
        };
        let candidates = self.hydrate(name, head).await?;
        let sampled = diversify(candidates, settings.diversity_window);

        let members: Vec<ScoredMember> = sampled
            .into_iter()
            .enumerate()
            .map(|(position, c)| ScoredMember::new(c.member, position as f64))
            .collect();

        let previous = self.sets.current(name, RankedSetKind::Diversity).await?;
        let generation = self.sets.allocate_generation(name).await?;

        let now = Utc::now();
        let expires_at = std::cmp::min(
            now + chrono::Duration::seconds(settings.diversity_ttl_secs as i64),
            top_k.expires_at,
        );
        let meta = RankedSetMeta {
            generation,
            kind: RankedSetKind::Diversity,
            size: members.len(),
            built_at: now,
            expires_at,
            source_generation: Some(top_k.generation),
        };

        self.sets
            .stage(
                name,
                RankedSetKind::Diversity,
                generation,
                &members,
                meta.ttl_secs(now) + settings.superseded_grace_secs,
                staged,
            )
            .await?;
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
            source_generation = top_k.generation,
            size = meta.size,
            "Diversity set published"
        );
        Ok(Some(meta))
    }

    /// Attach categories to ranked members, keeping rank order. Members whose
    /// market no longer exists are skipped.
    async fn hydrate(&self, segment: &str, head: Vec<ScoredMember>) -> Result<Vec<Candidate>> {
        let ids: Vec<Uuid> = head
            .iter()
            .filter_map(|m| Uuid::parse_str(&m.member).ok())
            .collect();
        if ids.len() < head.len() {
            warn!(
                segment = %segment,
                skipped = head.len() - ids.len(),
                "Top-K set holds malformed members"
            );
        }

        let categories: HashMap<Uuid, String> = self
            .items
            .find_by_ids(&ids)
            .await?
            .into_iter()
            .map(|m| (m.id, m.category()))
            .collect();

        let missing = ids.len() - ids.iter().filter(|id| categories.contains_key(id)).count();
        metrics::record_item_errors(segment, "hydrate", missing as u64);

        Ok(ids
            .into_iter()
            .filter_map(|id| {
                categories
                    .get(&id)
                    .map(|category| Candidate::new(id.to_string(), category.clone()))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk(categories: &[&str]) -> Vec<Candidate> {
        categories
            .iter()
            .enumerate()
            .map(|(i, c)| Candidate::new(format!("m{}", i), *c))
            .collect()
    }

    fn cats(accepted: &[Candidate]) -> Vec<&str> {
        accepted.iter().map(|c| c.category.as_str()).collect()
    }

    #[test]
    fn test_empty_input() {
        assert!(diversify(Vec::new(), 5).is_empty());
    }

    #[test]
    fn test_fewer_than_window_all_accepted() {
        let out = diversify(walk(&["a", "a", "a"]), 5);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_first_block_is_unconstrained() {
        let out = diversify(walk(&["a", "a", "a", "a", "a", "a", "b"]), 5);
        assert_eq!(cats(&out), vec!["a", "a", "a", "a", "a", "a", "b"]);
    }

    #[test]
    fn test_used_set_drops_repeats_after_first_block() {
        let input = walk(&["a", "a", "a", "a", "a", "b", "b", "c", "a", "c", "d", "e"]);
        let out = diversify(input, 5);
        // block 2 starts fresh: b, c, a, d, e (second b and second c rejected)
        assert_eq!(
            cats(&out),
            vec!["a", "a", "a", "a", "a", "b", "c", "a", "d", "e"]
        );
    }

    #[test]
    fn test_aligned_blocks_after_first_are_distinct() {
        let pattern = ["politics", "crypto", "sports", "politics", "crypto", "culture", "science"];
        let input: Vec<&str> = (0..100).map(|i| pattern[(i * 3 + i / 7) % pattern.len()]).collect();
        let out = diversify(walk(&input), 5);

        for block in out.chunks(5).skip(1) {
            let distinct: HashSet<&str> = block.iter().map(|c| c.category.as_str()).collect();
            assert_eq!(distinct.len(), block.len());
        }
    }

    #[test]
    fn test_preserves_rank_order() {
        let input = walk(&["a", "b", "c", "d", "e", "f", "a", "g"]);
        let out = diversify(input, 5);
        let idx: Vec<usize> = out
            .iter()
            .map(|c| c.member[1..].parse().unwrap())
            .collect();
        assert!(idx.windows(2).all(|w| w[0] < w[1]));
    }
}
