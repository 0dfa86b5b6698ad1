//! Service layer for market-feed-service
//!
//! - ranked_sets: stage-then-swap publication of ranked sets
//! - cache_builder: scoring and top-K publication
//! - diversity: category-diverse resampling of the top-K head
//! - feed_reader: tiered paginated reads
//! - rebuild: per-segment rebuild coordination

pub mod cache_builder;
pub mod cursor;
pub mod diversity;
pub mod feed_reader;
pub mod ranked_sets;
pub mod rebuild;

pub use cache_builder::TopKBuilder;
pub use cursor::{Cursor, Tier};
pub use diversity::DiversitySampler;
pub use feed_reader::{FeedPage, FeedReader, TierStats};
pub use ranked_sets::{RankedSetMeta, RankedSets};
pub use rebuild::{RebuildCoordinator, RebuildReport, SegmentStats, TriggerOutcome};
