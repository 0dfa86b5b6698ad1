//! Opaque pagination cursors
//!
//! A cursor is URL-safe base64 over a small JSON document. Every cursor names
//! the segment it was issued for. Ranked cursors pin the tier and snapshot
//! generation they were issued against plus a rank offset; chronological
//! cursors carry the keyset position of the last item.

use crate::error::{FeedError, Result};
use crate::models::ChronoPosition;
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use rankset_cache::RankedSetKind;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Longest token accepted from clients
const MAX_CURSOR_LEN: usize = 512;

/// Which source answered a feed page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Diversity,
    TopK,
    Chronological,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Diversity => "diversity",
            Tier::TopK => "top_k",
            Tier::Chronological => "chronological",
        }
    }

    pub fn ranked_kind(&self) -> Option<RankedSetKind> {
        match self {
            Tier::Diversity => Some(RankedSetKind::Diversity),
            Tier::TopK => Some(RankedSetKind::TopK),
            Tier::Chronological => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "o", rename_all = "snake_case")]
pub enum Cursor {
    Ranked {
        segment: String,
        tier: Tier,
        generation: u64,
        offset: usize,
    },
    Chronological {
        segment: String,
        updated_at: DateTime<Utc>,
        id: Uuid,
    },
}

impl Cursor {
    pub fn after(segment: &str, position: ChronoPosition) -> Self {
        Cursor::Chronological {
            segment: segment.to_string(),
            updated_at: position.updated_at,
            id: position.id,
        }
    }

    pub fn segment(&self) -> &str {
        match self {
            Cursor::Ranked { segment, .. } | Cursor::Chronological { segment, .. } => segment,
        }
    }

    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self)?;
        Ok(general_purpose::URL_SAFE_NO_PAD.encode(json))
    }

    pub fn decode(token: &str) -> Result<Self> {
        if token.len() > MAX_CURSOR_LEN {
            return Err(FeedError::InvalidCursor("cursor too long".to_string()));
        }
        let bytes = general_purpose::URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| FeedError::InvalidCursor("not valid base64".to_string()))?;
        let cursor: Cursor = serde_json::from_slice(&bytes)
            .map_err(|_| FeedError::InvalidCursor("unrecognized cursor".to_string()))?;

        if let Cursor::Ranked { tier, .. } = &cursor {
            if tier.ranked_kind().is_none() {
                return Err(FeedError::InvalidCursor(
                    "ranked cursor names an unranked tier".to_string(),
                ));
            }
        }
        Ok(cursor)
    }
}
