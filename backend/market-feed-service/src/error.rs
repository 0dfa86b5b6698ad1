/// Error types for the market feed service
///
/// Errors are converted to JSON HTTP responses for API clients.
use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use rankset_cache::CacheError;
use serde::Serialize;
use std::time::Duration;

/// Result type for market-feed-service operations
pub type Result<T> = std::result::Result<T, FeedError>;

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// Sorted-set store unreachable, slow, or returning garbage
    #[error("ranked set store error: {0}")]
    TransientStore(String),

    #[error("item store error: {0}")]
    ItemStore(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("a rebuild is already in flight for segment '{0}'")]
    ConcurrentRebuildRejected(String),

    /// The snapshot a cursor was issued against is gone
    #[error("cursor no longer matches the live ranking; restart from the first page")]
    StaleCursor,

    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no feed source available for segment '{0}'")]
    AllTiersExhausted(String),

    #[error("rebuild timed out after {0:?}")]
    RebuildTimeout(Duration),

    #[error("internal error: {0}")]
    Internal(String),
}

impl FeedError {
    /// Worth retrying inside a rebuild
    pub fn is_transient(&self) -> bool {
        matches!(self, FeedError::TransientStore(_) | FeedError::ItemStore(_))
    }

    fn code(&self) -> &'static str {
        match self {
            FeedError::TransientStore(_) => "STORE_UNAVAILABLE",
            FeedError::ItemStore(_) => "DATABASE_ERROR",
            FeedError::Configuration(_) => "INVALID_CONFIGURATION",
            FeedError::ConcurrentRebuildRejected(_) => "REBUILD_IN_FLIGHT",
            FeedError::StaleCursor => "CURSOR_RESYNC",
            FeedError::InvalidCursor(_) => "INVALID_CURSOR",
            FeedError::InvalidRequest(_) => "INVALID_REQUEST",
            FeedError::AllTiersExhausted(_) => "FEED_UNAVAILABLE",
            FeedError::RebuildTimeout(_) => "REBUILD_TIMEOUT",
            FeedError::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
    code: &'a str,
}

impl ResponseError for FeedError {
    fn status_code(&self) -> StatusCode {
        match self {
            FeedError::StaleCursor | FeedError::ConcurrentRebuildRejected(_) => {
                StatusCode::CONFLICT
            }
            FeedError::InvalidCursor(_)
            | FeedError::InvalidRequest(_)
            | FeedError::Configuration(_) => StatusCode::BAD_REQUEST,
            FeedError::AllTiersExhausted(_) | FeedError::TransientStore(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            FeedError::ItemStore(_) | FeedError::RebuildTimeout(_) | FeedError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        HttpResponse::build(status).json(ErrorBody {
            error: status.canonical_reason().unwrap_or("Error"),
            message: self.to_string(),
            code: self.code(),
        })
    }
}

impl From<CacheError> for FeedError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::InvalidData(msg) => FeedError::Internal(msg),
            other => FeedError::TransientStore(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for FeedError {
    fn from(err: sqlx::Error) -> Self {
        FeedError::ItemStore(err.to_string())
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(FeedError::StaleCursor.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            FeedError::InvalidCursor("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            FeedError::AllTiersExhausted("default".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            FeedError::RebuildTimeout(Duration::from_secs(1)).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_stale_cursor_carries_resync_code() {
        assert_eq!(FeedError::StaleCursor.code(), "CURSOR_RESYNC");
    }

    #[test]
    fn test_cache_errors_are_transient() {
        let err: FeedError = CacheError::Timeout(Duration::from_millis(5)).into();
        assert!(err.is_transient());

        let err: FeedError = CacheError::InvalidData("bad".into()).into();
        assert!(!err.is_transient());
    }
}
