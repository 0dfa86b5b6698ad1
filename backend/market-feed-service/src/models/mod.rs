use crate::error::{FeedError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Category given to markets without tags
pub const UNCATEGORIZED: &str = "uncategorized";

/// A prediction-market listing as stored in the item store.
///
/// Identified by `(source, external_id)` with `id` as the surrogate key.
/// `confidence` and `trend_score` are written back by the rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Market {
    pub id: Uuid,
    pub source: String,
    pub external_id: String,
    pub title: String,
    pub volume: f64,
    pub liquidity: f64,
    pub price_change_24h: f64,
    pub end_date: Option<DateTime<Utc>>,
    pub social_mention_score: f64,
    /// External trend input used by the fixed v1 formula
    pub trend_signal: Option<f64>,
    pub tags: Vec<String>,
    pub confidence: Option<f64>,
    pub trend_score: Option<f64>,
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

impl Market {
    /// First non-blank tag, lowercased
    pub fn category(&self) -> String {
        self.tags
            .first()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .unwrap_or_else(|| UNCATEGORIZED.to_string())
    }

    /// Active and not yet resolved at `now`
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.active && self.end_date.map_or(true, |end| end > now)
    }

    pub fn position(&self) -> ChronoPosition {
        ChronoPosition {
            updated_at: self.updated_at,
            id: self.id,
        }
    }
}

/// Keyset position in the chronological fallback ordering
/// (`updated_at` desc, then `id` desc).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChronoPosition {
    pub updated_at: DateTime<Utc>,
    pub id: Uuid,
}

impl ChronoPosition {
    /// Whether `market` sorts strictly after this position
    pub fn precedes(&self, market: &Market) -> bool {
        (market.updated_at, market.id) < (self.updated_at, self.id)
    }
}

/// What a feed page returns for each market
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemSummary {
    pub id: Uuid,
    pub source: String,
    pub external_id: String,
    pub title: String,
    pub category: String,
    pub volume: f64,
    pub liquidity: f64,
    pub price_change_24h: f64,
    pub end_date: Option<DateTime<Utc>>,
    pub confidence: Option<f64>,
    pub trend_score: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Market> for ItemSummary {
    fn from(m: &Market) -> Self {
        Self {
            id: m.id,
            source: m.source.clone(),
            external_id: m.external_id.clone(),
            title: m.title.clone(),
            category: m.category(),
            volume: m.volume,
            liquidity: m.liquidity,
            price_change_24h: m.price_change_24h,
            end_date: m.end_date,
            confidence: m.confidence,
            trend_score: m.trend_score,
            updated_at: m.updated_at,
        }
    }
}

/// A named partition of the feed.
///
/// `default` (alias `all`) covers every eligible market; any other name
/// selects the markets whose category matches it, ignoring case.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    All,
    Category(String),
}

impl Segment {
    pub const DEFAULT: &'static str = "default";
    const MAX_NAME_LEN: usize = 64;

    pub fn parse(name: &str) -> Result<Self> {
        let name = name.trim().to_lowercase();
        if name.is_empty() || name == Self::DEFAULT || name == "all" {
            return Ok(Segment::All);
        }
        if name.len() > Self::MAX_NAME_LEN
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(FeedError::InvalidRequest(format!(
                "segment '{}' must be 1-{} characters of [a-z0-9_-]",
                name,
                Self::MAX_NAME_LEN
            )));
        }
        Ok(Segment::Category(name))
    }

    /// Canonical name used in keys, labels and responses
    pub fn name(&self) -> &str {
        match self {
            Segment::All => Self::DEFAULT,
            Segment::Category(c) => c,
        }
    }

    /// Category filter, if any
    pub fn category(&self) -> Option<&str> {
        match self {
            Segment::All => None,
            Segment::Category(c) => Some(c),
        }
    }

    pub fn matches(&self, market: &Market) -> bool {
        match self {
            Segment::All => true,
            Segment::Category(c) => market.category() == *c,
        }
    }
}

impl Default for Segment {
    fn default() -> Self {
        Segment::All
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
