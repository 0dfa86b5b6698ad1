//! Cache error types

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache command timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid cache data: {0}")]
    InvalidData(String),
}

impl CacheError {
    /// Whether retrying the same command later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            CacheError::Redis(e) => {
                e.is_io_error()
                    || e.is_timeout()
                    || e.is_connection_dropped()
                    || matches!(
                        e.kind(),
                        redis::ErrorKind::TryAgain | redis::ErrorKind::BusyLoadingError
                    )
            }
            CacheError::Timeout(_) | CacheError::Unavailable(_) => true,
            CacheError::Serialization(_) | CacheError::InvalidData(_) => false,
        }
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
