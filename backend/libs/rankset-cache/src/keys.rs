//! Ranked-set key schema
//!
//! Every segment owns a small family of keys. Key format:
//! v{VERSION}:rankset:{segment}:{kind}:{suffix}
//!
//! Readers resolve the `current` pointer first and only then range the
//! generation-stamped snapshot it names, so a snapshot key is never visible
//! before it is complete.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Key schema version - increment when changing key formats
pub const KEY_VERSION: u32 = 1;

/// The two ranked structures kept per segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankedSetKind {
    /// Raw best-scoring items, ordered by confidence
    TopK,
    /// Category-diversified walk over the top of `TopK`, ordered by position
    Diversity,
}

impl RankedSetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TopK => "topk",
            Self::Diversity => "diversity",
        }
    }
}

impl fmt::Display for RankedSetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Cache key builder
pub struct RankedSetKey;

impl RankedSetKey {
    /// Pointer to the live snapshot of a ranked set
    /// Format: v1:rankset:{segment}:{kind}:current
    pub fn pointer(segment: &str, kind: RankedSetKind) -> String {
        format!("v{}:rankset:{}:{}:current", KEY_VERSION, segment, kind)
    }

    /// Generation-stamped snapshot
    /// Format: v1:rankset:{segment}:{kind}:g{generation}
    pub fn snapshot(segment: &str, kind: RankedSetKind, generation: u64) -> String {
        format!(
            "v{}:rankset:{}:{}:g{}",
            KEY_VERSION, segment, kind, generation
        )
    }

    /// Monotonic generation counter shared by both kinds of a segment
    pub fn generation_counter(segment: &str) -> String {
        format!("v{}:rankset:{}:generation", KEY_VERSION, segment)
    }

    /// Rebuild lease (at most one rebuild per segment across processes)
    pub fn rebuild_lease(segment: &str) -> String {
        format!("v{}:rankset:{}:rebuild_lease", KEY_VERSION, segment)
    }

    /// JSON report of the last completed rebuild
    pub fn last_rebuild(segment: &str) -> String {
        format!("v{}:rankset:{}:last_rebuild", KEY_VERSION, segment)
    }

    /// Extract the trailing component (`current`, `g12`, `generation`, ...)
    /// used as a low-cardinality metrics label.
    pub fn label(key: &str) -> &str {
        match key.rsplit(':').next() {
            Some(last) if last.starts_with('g') && last[1..].parse::<u64>().is_ok() => "snapshot",
            Some(last) if !last.is_empty() => last,
            _ => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_key() {
        assert_eq!(
            RankedSetKey::pointer("default", RankedSetKind::TopK),
            "v1:rankset:default:topk:current"
        );
        assert_eq!(
            RankedSetKey::pointer("politics", RankedSetKind::Diversity),
            "v1:rankset:politics:diversity:current"
        );
    }

    #[test]
    fn test_snapshot_key_embeds_generation() {
        let key = RankedSetKey::snapshot("crypto", RankedSetKind::TopK, 42);
        assert_eq!(key, "v1:rankset:crypto:topk:g42");
    }

    #[test]
    fn test_label() {
        assert_eq!(RankedSetKey::label("v1:rankset:default:topk:g7"), "snapshot");
        assert_eq!(RankedSetKey::label("v1:rankset:default:topk:current"), "current");
        assert_eq!(
            RankedSetKey::label(&RankedSetKey::rebuild_lease("default")),
            "rebuild_lease"
        );
        assert_eq!(RankedSetKey::label(""), "unknown");
    }
}
