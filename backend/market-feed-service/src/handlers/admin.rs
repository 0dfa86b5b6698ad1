/// Ranking administration handlers
///
/// Authentication for these routes is enforced by the gateway in front of
/// the service.
use actix_web::{delete, get, post, put, web, HttpResponse};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::RankingSettings;
use crate::error::Result;
use crate::handlers::AppState;
use crate::jobs::{handle_event, IngestionEvent};
use crate::scoring::ScoringStrategy;
use crate::services::TriggerOutcome;

#[derive(Debug, Deserialize)]
pub struct SegmentQuery {
    pub segment: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RebuildRequest {
    pub segment: Option<String>,
    /// Skip the debounce window
    pub force: bool,
    /// Run on the request and return the report
    pub wait: bool,
}

#[derive(Debug, Serialize)]
struct TriggerResponse {
    segment: String,
    outcome: TriggerOutcome,
}

#[derive(Debug, Serialize)]
struct IngestionResponse {
    accepted: Vec<String>,
}

/// GET /api/v1/admin/ranking/stats
#[get("/api/v1/admin/ranking/stats")]
pub async fn get_stats(query: web::Query<SegmentQuery>, state: web::Data<AppState>) -> Result<HttpResponse> {
    let segment = state.reader.resolve_segment(query.segment.as_deref())?;
    let stats = state.coordinator.stats(&segment).await?;
    Ok(HttpResponse::Ok().json(stats))
}

/// GET /api/v1/admin/ranking/settings
#[get("/api/v1/admin/ranking/settings")]
pub async fn get_settings(state: web::Data<AppState>) -> Result<HttpResponse> {
    let settings: RankingSettings = (*state.settings.snapshot()).clone();
    Ok(HttpResponse::Ok().json(settings))
}

/// PUT /api/v1/admin/ranking/weights
///
/// Takes effect from the next rebuild.
#[put("/api/v1/admin/ranking/weights")]
pub async fn update_weights(
    body: web::Json<ScoringStrategy>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let updated = state.settings.update_strategy(body.into_inner())?;
    info!(strategy = updated.strategy.name(), "Scoring strategy updated");
    Ok(HttpResponse::Ok().json(&*updated))
}

/// POST /api/v1/admin/ranking/rebuild
#[post("/api/v1/admin/ranking/rebuild")]
pub async fn trigger_rebuild(
    body: Option<web::Json<RebuildRequest>>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let request = body.map(|b| b.into_inner()).unwrap_or_default();
    let segment = state.reader.resolve_segment(request.segment.as_deref())?;

    if request.wait {
        let report = state.coordinator.rebuild_now(&segment).await?;
        return Ok(HttpResponse::Ok().json(report));
    }

    let outcome = state.coordinator.trigger_rebuild(&segment, request.force);
    let response = TriggerResponse {
        segment: segment.name().to_string(),
        outcome,
    };
    Ok(match outcome {
        TriggerOutcome::Accepted => HttpResponse::Accepted().json(response),
        _ => HttpResponse::Ok().json(response),
    })
}

/// DELETE /api/v1/admin/ranking/cache/{segment}
#[delete("/api/v1/admin/ranking/cache/{segment}")]
pub async fn invalidate_cache(path: web::Path<String>, state: web::Data<AppState>) -> Result<HttpResponse> {
    let segment = state.reader.resolve_segment(Some(path.as_str()))?;
    state.coordinator.invalidate(&segment).await?;
    Ok(HttpResponse::NoContent().finish())
}

/// POST /api/v1/admin/ingestion/complete
#[post("/api/v1/admin/ingestion/complete")]
pub async fn ingestion_complete(
    body: web::Json<IngestionEvent>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let accepted = handle_event(&state.coordinator, state.reader.segments(), &body);
    Ok(HttpResponse::Accepted().json(IngestionResponse { accepted }))
}
