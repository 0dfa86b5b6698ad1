//! Prometheus metrics for market-feed-service.
//!
//! Exposes rebuild and feed-tier collectors and an HTTP handler for the
//! `/metrics` endpoint.

use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, Encoder,
    HistogramVec, IntCounterVec, IntGaugeVec, TextEncoder,
};
use std::time::Duration;

static REBUILD_RUNS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "market_feed_rebuild_runs_total",
        "Ranking rebuilds by outcome (success/error/timeout/lease_held)",
        &["segment", "status"]
    )
    .expect("Failed to register rebuild runs metric")
});

static REBUILD_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "market_feed_rebuild_duration_seconds",
        "Wall time of ranking rebuilds",
        &["segment"],
        vec![0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    )
    .expect("Failed to register rebuild duration metric")
});

static REBUILD_ITEM_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "market_feed_rebuild_item_errors_total",
        "Per-item failures isolated during rebuilds",
        &["segment", "stage"]
    )
    .expect("Failed to register rebuild item errors metric")
});

static REBUILD_TRIGGERS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "market_feed_rebuild_triggers_total",
        "Rebuild triggers by outcome (accepted/already_in_flight/deferred)",
        &["segment", "outcome"]
    )
    .expect("Failed to register rebuild triggers metric")
});

static PAGE_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "market_feed_page_requests_total",
        "Feed pages served, by the tier that answered",
        &["segment", "tier"]
    )
    .expect("Failed to register page requests metric")
});

static TIER_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "market_feed_tier_errors_total",
        "Feed tier reads that failed and fell through",
        &["segment", "tier"]
    )
    .expect("Failed to register tier errors metric")
});

static RANKED_SET_SIZE: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "market_feed_ranked_set_size",
        "Members in the last published ranked set",
        &["segment", "kind"]
    )
    .expect("Failed to register ranked set size metric")
});

pub fn record_rebuild_run(segment: &str, status: &str) {
    REBUILD_RUNS_TOTAL.with_label_values(&[segment, status]).inc();
}

pub fn record_rebuild_duration(segment: &str, duration: Duration) {
    REBUILD_DURATION_SECONDS
        .with_label_values(&[segment])
        .observe(duration.as_secs_f64());
}

pub fn record_item_errors(segment: &str, stage: &str, count: u64) {
    if count > 0 {
        REBUILD_ITEM_ERRORS_TOTAL
            .with_label_values(&[segment, stage])
            .inc_by(count);
    }
}

pub fn record_trigger(segment: &str, outcome: &str) {
    REBUILD_TRIGGERS_TOTAL
        .with_label_values(&[segment, outcome])
        .inc();
}

pub fn record_page(segment: &str, tier: &str) {
    PAGE_REQUESTS_TOTAL.with_label_values(&[segment, tier]).inc();
}

pub fn record_tier_error(segment: &str, tier: &str) {
    TIER_ERRORS_TOTAL.with_label_values(&[segment, tier]).inc();
}

pub fn set_ranked_set_size(segment: &str, kind: &str, size: usize) {
    RANKED_SET_SIZE
        .with_label_values(&[segment, kind])
        .set(size as i64);
}

/// Actix handler that renders Prometheus metrics in text format.
pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
