/// Feed API handler
///
/// Public paginated reads over the ranked sets
use actix_web::{get, web, HttpResponse};
use serde::Deserialize;
use tracing::debug;

use crate::error::Result;
use crate::handlers::AppState;

/// Query parameters for GET /api/v1/feed
#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    /// Segment name; `default` when absent
    #[serde(default)]
    pub segment: Option<String>,
    pub cursor: Option<String>,
    /// Page size, clamped to 1-20
    pub limit: Option<usize>,
}

/// GET /api/v1/feed
#[get("/api/v1/feed")]
pub async fn get_feed(query: web::Query<FeedQuery>, state: web::Data<AppState>) -> Result<HttpResponse> {
    let segment = state.reader.resolve_segment(query.segment.as_deref())?;
    debug!(segment = %segment, has_cursor = query.cursor.is_some(), limit = ?query.limit, "Feed request");

    let page = state
        .reader
        .get_page(&segment, query.cursor.as_deref(), query.limit)
        .await?;
    Ok(HttpResponse::Ok().json(page))
}
