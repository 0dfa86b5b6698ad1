//! Scoring engine
//!
//! Pure, total mapping from a market snapshot to `{confidence, trend_score}`.
//! Malformed numbers (NaN, infinities, negative magnitudes) are clamped to
//! zero before any normalization, so every output lands in `[0, 1]`.
//!
//! Two strategies are supported:
//! - [`ScoringStrategy::Weighted`] (default): five configurable weights over
//!   liquidity, volume, drift, social and an hours-based time decay
//! - [`ScoringStrategy::FixedV1`]: the original fixed five-term formula with
//!   a day-based urgency and an external trend input
//!
//! v1 urgency is `exp(-days/30)` with days capped at 365. Markets further out
//! than that score the same urgency as resolved or open-ended markets, which
//! sit at the 365-day floor (about 5e-6).

use crate::error::{FeedError, Result};
use crate::models::Market;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const WEIGHT_SUM_TOLERANCE: f64 = 0.001;

/// Days at which v1 urgency stops decaying
const URGENCY_HORIZON_DAYS: f64 = 365.0;
const URGENCY_SCALE_DAYS: f64 = 30.0;
const DECAY_SCALE_HOURS: f64 = 720.0;

const LIQUIDITY_MIDPOINT: f64 = 10_000.0;
const LIQUIDITY_STEEPNESS: f64 = 0.0005;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub confidence: f64,
    pub trend_score: f64,
}

/// Weights for the v2 composition. Must sum to 1.0 (±0.001).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightSet {
    pub liquidity: f64,
    pub volume: f64,
    pub drift: f64,
    pub social: f64,
    pub time_decay: f64,
}

impl Default for WeightSet {
    fn default() -> Self {
        Self {
            liquidity: 0.28,
            volume: 0.22,
            drift: 0.16,
            social: 0.24,
            time_decay: 0.10,
        }
    }
}

impl WeightSet {
    /// Build from `[liquidity, volume, drift, social, time_decay]`
    pub fn from_slice(values: &[f64]) -> Result<Self> {
        match values {
            [liquidity, volume, drift, social, time_decay] => {
                let weights = Self {
                    liquidity: *liquidity,
                    volume: *volume,
                    drift: *drift,
                    social: *social,
                    time_decay: *time_decay,
                };
                weights.validate()?;
                Ok(weights)
            }
            _ => Err(FeedError::Configuration(format!(
                "expected 5 scoring weights, got {}",
                values.len()
            ))),
        }
    }

    pub fn as_array(&self) -> [f64; 5] {
        [
            self.liquidity,
            self.volume,
            self.drift,
            self.social,
            self.time_decay,
        ]
    }

    /// Reject, never renormalize.
    pub fn validate(&self) -> Result<()> {
        let values = self.as_array();
        if let Some(bad) = values.iter().find(|w| !w.is_finite() || **w < 0.0) {
            return Err(FeedError::Configuration(format!(
                "scoring weights must be finite and non-negative, got {}",
                bad
            )));
        }
        let sum: f64 = values.iter().sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(FeedError::Configuration(format!(
                "scoring weights must sum to 1.0 (±{}), got {:.4}",
                WEIGHT_SUM_TOLERANCE, sum
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ScoringStrategy {
    FixedV1,
    Weighted(WeightSet),
}

impl Default for ScoringStrategy {
    fn default() -> Self {
        ScoringStrategy::Weighted(WeightSet::default())
    }
}

impl ScoringStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            ScoringStrategy::FixedV1 => "fixed_v1",
            ScoringStrategy::Weighted(_) => "weighted",
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            ScoringStrategy::FixedV1 => Ok(()),
            ScoringStrategy::Weighted(w) => w.validate(),
        }
    }

    pub fn score(&self, market: &Market, now: DateTime<Utc>) -> Score {
        let volume = volume_norm(market.volume);
        let drift = drift_norm(market.price_change_24h);
        let liquidity = liquidity_sigmoid(market.liquidity);

        match self {
            ScoringStrategy::FixedV1 => {
                let trend_input = clamp01(magnitude(market.trend_signal.unwrap_or(0.0)));
                let confidence = 0.35 * volume
                    + 0.25 * drift
                    + 0.20 * time_urgency(market.end_date, now)
                    + 0.15 * liquidity
                    + 0.05 * trend_input;
                Score {
                    confidence: clamp01(confidence),
                    trend_score: trend_input,
                }
            }
            ScoringStrategy::Weighted(w) => {
                let social = social_norm(market.social_mention_score);
                let confidence = w.liquidity * liquidity
                    + w.volume * volume
                    + w.drift * drift
                    + w.social * social
                    + w.time_decay * time_decay(market.end_date, now);
                Score {
                    confidence: clamp01(confidence),
                    trend_score: clamp01(0.5 * drift + 0.5 * social),
                }
            }
        }
    }
}

fn clamp01(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

/// Non-finite and negative inputs count as zero
fn magnitude(x: f64) -> f64 {
    if x.is_finite() && x > 0.0 {
        x
    } else {
        0.0
    }
}

pub fn volume_norm(volume: f64) -> f64 {
    clamp01((magnitude(volume) + 1.0).log10() / 6.0)
}

pub fn drift_norm(price_change_24h: f64) -> f64 {
    let change = if price_change_24h.is_finite() {
        price_change_24h.abs()
    } else {
        0.0
    };
    clamp01(change / 20.0)
}

pub fn liquidity_sigmoid(liquidity: f64) -> f64 {
    let l = magnitude(liquidity);
    clamp01(1.0 / (1.0 + (-LIQUIDITY_STEEPNESS * (l - LIQUIDITY_MIDPOINT)).exp()))
}

pub fn social_norm(mentions: f64) -> f64 {
    clamp01(magnitude(mentions) / 100.0)
}

/// v1 urgency: `exp(-days/30)` with days capped at the horizon. Resolved or
/// open-ended markets sit at the horizon floor.
pub fn time_urgency(end_date: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    let days = match end_date {
        Some(end) if end > now => {
            let days = (end - now).num_seconds() as f64 / 86_400.0;
            days.min(URGENCY_HORIZON_DAYS)
        }
        _ => URGENCY_HORIZON_DAYS,
    };
    clamp01((-days / URGENCY_SCALE_DAYS).exp())
}

/// v2 decay: `exp(-hours/720)`, zero once resolved or without an end date
pub fn time_decay(end_date: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    match end_date {
        Some(end) if end > now => {
            let hours = (end - now).num_seconds() as f64 / 3_600.0;
            clamp01((-hours / DECAY_SCALE_HOURS).exp())
        }
        _ => 0.0,
    }
}
