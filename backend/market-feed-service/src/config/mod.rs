use crate::error::{FeedError, Result};
use crate::models::Segment;
use crate::scoring::{ScoringStrategy, WeightSet};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Hard ceiling on page size
pub const MAX_PAGE_LIMIT: usize = 20;

/// Lease outlives the rebuild timeout by this margin
const LEASE_MARGIN: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub ranking: RankingSettings,
    pub rebuild: RebuildConfig,
    pub feed: FeedConfig,
    pub ingestion: IngestionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub env: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub command_timeout_ms: u64,
}

/// Tunables read by every rebuild.
///
/// Held behind a [`SettingsHandle`]; each rebuild works from one immutable
/// snapshot even if an admin update lands mid-run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingSettings {
    pub strategy: ScoringStrategy,
    pub top_k: usize,
    pub top_k_ttl_secs: u64,
    pub diversity_ttl_secs: u64,
    pub diversity_sample_size: usize,
    pub diversity_window: usize,
    pub superseded_grace_secs: u64,
}

impl Default for RankingSettings {
    fn default() -> Self {
        Self {
            strategy: ScoringStrategy::default(),
            top_k: 1000,
            top_k_ttl_secs: 3600,
            diversity_ttl_secs: 1800,
            diversity_sample_size: 100,
            diversity_window: 5,
            superseded_grace_secs: 120,
        }
    }
}

impl RankingSettings {
    pub fn validate(&self) -> Result<()> {
        self.strategy.validate()?;

        let checks: [(&str, bool); 5] = [
            ("top_k", self.top_k > 0),
            ("top_k_ttl_secs", self.top_k_ttl_secs > 0),
            ("diversity_ttl_secs", self.diversity_ttl_secs > 0),
            ("diversity_sample_size", self.diversity_sample_size > 0),
            ("diversity_window", self.diversity_window > 0),
        ];
        match checks.iter().find(|(_, ok)| !ok) {
            Some((field, _)) => Err(FeedError::Configuration(format!(
                "{} must be greater than zero",
                field
            ))),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebuildConfig {
    pub timeout_secs: u64,
    pub interval_secs: u64,
    /// Non-forced triggers closer than this to the last rebuild are skipped
    pub min_interval_secs: u64,
    pub persist_concurrency: usize,
    pub max_retries: u32,
}

impl Default for RebuildConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            interval_secs: 900,
            min_interval_secs: 30,
            persist_concurrency: 16,
            max_retries: 2,
        }
    }
}

impl RebuildConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_secs)
    }

    pub fn lease_ttl(&self) -> Duration {
        self.timeout() + LEASE_MARGIN
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 || self.interval_secs == 0 {
            return Err(FeedError::Configuration(
                "rebuild timeout and interval must be greater than zero".to_string(),
            ));
        }
        if self.persist_concurrency == 0 {
            return Err(FeedError::Configuration(
                "persist_concurrency must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub segments: Vec<String>,
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            segments: vec![Segment::DEFAULT.to_string()],
            default_limit: MAX_PAGE_LIMIT,
            max_limit: MAX_PAGE_LIMIT,
        }
    }
}

impl FeedConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_limit == 0 || self.max_limit > MAX_PAGE_LIMIT {
            return Err(FeedError::Configuration(format!(
                "max_limit must be between 1 and {}",
                MAX_PAGE_LIMIT
            )));
        }
        if self.default_limit == 0 || self.default_limit > self.max_limit {
            return Err(FeedError::Configuration(
                "default_limit must be between 1 and max_limit".to_string(),
            ));
        }
        for name in &self.segments {
            Segment::parse(name).map_err(|e| FeedError::Configuration(e.to_string()))?;
        }
        Ok(())
    }

    pub fn parsed_segments(&self) -> Vec<Segment> {
        let mut seen = std::collections::HashSet::new();
        std::iter::once(Segment::All)
            .chain(self.segments.iter().filter_map(|s| Segment::parse(s).ok()))
            .filter(|s| seen.insert(s.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Redis pub/sub channel carrying ingestion completion events
    pub channel: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let strategy = match env_string("SCORING_STRATEGY", "weighted").as_str() {
            "weighted" => {
                let weights = match std::env::var("SCORING_WEIGHTS") {
                    Ok(raw) => WeightSet::from_slice(&parse_list::<f64>("SCORING_WEIGHTS", &raw)?)?,
                    Err(_) => WeightSet::default(),
                };
                ScoringStrategy::Weighted(weights)
            }
            "fixed_v1" => ScoringStrategy::FixedV1,
            other => {
                return Err(FeedError::Configuration(format!(
                    "SCORING_STRATEGY must be 'weighted' or 'fixed_v1', got '{}'",
                    other
                )))
            }
        };

        let defaults = RankingSettings::default();
        let ranking = RankingSettings {
            strategy,
            top_k: env_parse("RANKING_TOP_K", defaults.top_k)?,
            top_k_ttl_secs: env_parse("RANKING_TOP_K_TTL_SECS", defaults.top_k_ttl_secs)?,
            diversity_ttl_secs: env_parse(
                "RANKING_DIVERSITY_TTL_SECS",
                defaults.diversity_ttl_secs,
            )?,
            diversity_sample_size: env_parse(
                "RANKING_DIVERSITY_SAMPLE_SIZE",
                defaults.diversity_sample_size,
            )?,
            diversity_window: env_parse("RANKING_DIVERSITY_WINDOW", defaults.diversity_window)?,
            superseded_grace_secs: env_parse(
                "RANKING_SUPERSEDED_GRACE_SECS",
                defaults.superseded_grace_secs,
            )?,
        };

        let rebuild_defaults = RebuildConfig::default();
        let rebuild = RebuildConfig {
            timeout_secs: env_parse("REBUILD_TIMEOUT_SECS", rebuild_defaults.timeout_secs)?,
            interval_secs: env_parse("REBUILD_INTERVAL_SECS", rebuild_defaults.interval_secs)?,
            min_interval_secs: env_parse(
                "REBUILD_MIN_INTERVAL_SECS",
                rebuild_defaults.min_interval_secs,
            )?,
            persist_concurrency: env_parse(
                "REBUILD_PERSIST_CONCURRENCY",
                rebuild_defaults.persist_concurrency,
            )?,
            max_retries: env_parse("REBUILD_MAX_RETRIES", rebuild_defaults.max_retries)?,
        };

        let feed = FeedConfig {
            segments: match std::env::var("FEED_SEGMENTS") {
                Ok(raw) => parse_list::<String>("FEED_SEGMENTS", &raw)?,
                Err(_) => FeedConfig::default().segments,
            },
            default_limit: env_parse("FEED_DEFAULT_LIMIT", MAX_PAGE_LIMIT)?,
            max_limit: env_parse("FEED_MAX_LIMIT", MAX_PAGE_LIMIT)?,
        };

        let config = Config {
            app: AppConfig {
                env: env_string("APP_ENV", "development"),
                host: env_string("HTTP_HOST", "0.0.0.0"),
                port: env_parse("HTTP_PORT", 8090)?,
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .map_err(|_| FeedError::Configuration("DATABASE_URL must be set".into()))?,
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 10)?,
            },
            redis: RedisConfig {
                url: env_string("REDIS_URL", "redis://127.0.0.1:6379"),
                command_timeout_ms: env_parse("REDIS_COMMAND_TIMEOUT_MS", 3000)?,
            },
            ranking,
            rebuild,
            feed,
            ingestion: IngestionConfig {
                channel: env_string("INGESTION_CHANNEL", "market-feed:ingestion"),
            },
        };

        config.ranking.validate()?;
        config.rebuild.validate()?;
        config.feed.validate()?;
        Ok(config)
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| FeedError::Configuration(format!("{} has invalid value '{}'", key, raw))),
        Err(_) => Ok(default),
    }
}

fn parse_list<T: FromStr>(key: &str, raw: &str) -> Result<Vec<T>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse()
                .map_err(|_| FeedError::Configuration(format!("{} has invalid entry '{}'", key, s)))
        })
        .collect()
}

/// Swappable handle to the live [`RankingSettings`]
pub struct SettingsHandle {
    current: RwLock<Arc<RankingSettings>>,
}

impl SettingsHandle {
    pub fn new(settings: RankingSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            current: RwLock::new(Arc::new(settings)),
        })
    }

    /// Immutable view for one rebuild
    pub fn snapshot(&self) -> Arc<RankingSettings> {
        self.current.read().clone()
    }

    /// Validate, then replace the whole value
    pub fn replace(&self, settings: RankingSettings) -> Result<Arc<RankingSettings>> {
        settings.validate()?;
        let next = Arc::new(settings);
        *self.current.write() = next.clone();
        Ok(next)
    }

    pub fn update_strategy(&self, strategy: ScoringStrategy) -> Result<Arc<RankingSettings>> {
        let mut next = (*self.snapshot()).clone();
        next.strategy = strategy;
        self.replace(next)
    }
}
