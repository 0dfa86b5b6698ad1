pub mod admin;
pub mod feed;

use crate::config::SettingsHandle;
use crate::services::{FeedReader, RebuildCoordinator};
use actix_web::web;
use std::sync::Arc;

/// Shared state for every HTTP handler
#[derive(Clone)]
pub struct AppState {
    pub reader: FeedReader,
    pub coordinator: RebuildCoordinator,
    pub settings: Arc<SettingsHandle>,
}

/// Register all routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(feed::get_feed)
        .service(admin::get_stats)
        .service(admin::get_settings)
        .service(admin::update_weights)
        .service(admin::trigger_rebuild)
        .service(admin::invalidate_cache)
        .service(admin::ingestion_complete)
        .route("/health", web::get().to(|| async { "OK" }))
        .route("/metrics", web::get().to(crate::metrics::serve_metrics));
}
