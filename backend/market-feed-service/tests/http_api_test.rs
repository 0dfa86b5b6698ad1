//! Integration Tests: HTTP surface
//!
//! Coverage:
//! - GET /api/v1/feed pages and error codes
//! - Admin stats, settings, weights, rebuild and invalidation routes
//! - Ingestion completion route

mod common;

use actix_web::{test, web, App};
use common::{catalog, Harness};
use market_feed_service::handlers::{self, AppState};
use serde_json::{json, Value};

fn state(harness: &Harness) -> web::Data<AppState> {
    web::Data::new(AppState {
        reader: harness.reader.clone(),
        coordinator: harness.coordinator.clone(),
        settings: harness.settings.clone(),
    })
}

#[actix_web::test]
async fn test_feed_endpoint_returns_ranked_page() {
    let harness = Harness::new(catalog(25));
    let app = test::init_service(App::new().app_data(state(&harness)).configure(handlers::configure)).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/admin/ranking/rebuild")
        .set_json(json!({ "wait": true }))
        .to_request();
    let report: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(report["topKSize"], 25);

    let req = test::TestRequest::get().uri("/api/v1/feed?limit=10").to_request();
    let page: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(page["tier"], "diversity");
    assert_eq!(page["items"].as_array().unwrap().len(), 10);
    assert_eq!(page["hasMore"], true);
    let cursor = page["nextCursor"].as_str().unwrap().to_string();

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/feed?limit=10&cursor={}", cursor))
        .to_request();
    let next: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(next["generation"], page["generation"]);
}

#[actix_web::test]
async fn test_stale_cursor_returns_conflict() {
    let harness = Harness::new(catalog(25));
    harness.coordinator.rebuild_now(&Default::default()).await.unwrap();
    let app = test::init_service(App::new().app_data(state(&harness)).configure(handlers::configure)).await;

    let req = test::TestRequest::get().uri("/api/v1/feed?limit=5").to_request();
    let page: Value = test::call_and_read_body_json(&app, req).await;
    let cursor = page["nextCursor"].as_str().unwrap().to_string();

    harness.coordinator.rebuild_now(&Default::default()).await.unwrap();

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/feed?cursor={}", cursor))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 409);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "CURSOR_RESYNC");
}

#[actix_web::test]
async fn test_bad_input_returns_bad_request() {
    let harness = Harness::new(catalog(3));
    let app = test::init_service(App::new().app_data(state(&harness)).configure(handlers::configure)).await;

    let req = test::TestRequest::get().uri("/api/v1/feed?cursor=not-a-cursor!").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let req = test::TestRequest::get().uri("/api/v1/feed?segment=no%20spaces").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
async fn test_unserved_segment_is_rejected_everywhere() {
    let harness = Harness::new(catalog(3));
    let app = test::init_service(App::new().app_data(state(&harness)).configure(handlers::configure)).await;

    let req = test::TestRequest::get().uri("/api/v1/feed?segment=junk0").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "INVALID_REQUEST");

    let req = test::TestRequest::post()
        .uri("/api/v1/admin/ranking/rebuild")
        .set_json(json!({ "segment": "junk1", "force": true }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);
    assert!(!harness.coordinator.is_in_flight("junk1"));

    let req = test::TestRequest::get()
        .uri("/api/v1/admin/ranking/stats?segment=junk2")
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);

    let req = test::TestRequest::post()
        .uri("/api/v1/admin/ingestion/complete")
        .set_json(json!({ "segments": ["junk3"], "newItems": 1 }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["accepted"], json!(["default"]));
    assert!(!harness.coordinator.is_in_flight("junk3"));
}

#[actix_web::test]
async fn test_weight_update_is_validated() {
    let harness = Harness::new(catalog(3));
    let app = test::init_service(App::new().app_data(state(&harness)).configure(handlers::configure)).await;

    let req = test::TestRequest::put()
        .uri("/api/v1/admin/ranking/weights")
        .set_json(json!({
            "strategy": "weighted",
            "liquidity": 0.09, "volume": 0.09, "drift": 0.09, "social": 0.09, "time_decay": 0.09
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let req = test::TestRequest::put()
        .uri("/api/v1/admin/ranking/weights")
        .set_json(json!({ "strategy": "fixed_v1" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    assert_eq!(harness.settings.snapshot().strategy.name(), "fixed_v1");

    let req = test::TestRequest::get().uri("/api/v1/admin/ranking/settings").to_request();
    let settings: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(settings["strategy"]["strategy"], "fixed_v1");
    assert_eq!(settings["top_k"], 1000);
}

#[actix_web::test]
async fn test_stats_and_invalidation() {
    let harness = Harness::new(catalog(9));
    harness.coordinator.rebuild_now(&Default::default()).await.unwrap();
    let app = test::init_service(App::new().app_data(state(&harness)).configure(handlers::configure)).await;

    let req = test::TestRequest::get().uri("/api/v1/admin/ranking/stats").to_request();
    let stats: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(stats["totalEligible"], 9);
    assert_eq!(stats["topKSize"], 9);
    assert!(stats["lastRebuiltAt"].is_string());

    let req = test::TestRequest::delete()
        .uri("/api/v1/admin/ranking/cache/default")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 204);

    let req = test::TestRequest::get().uri("/api/v1/feed").to_request();
    let page: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(page["tier"], "chronological");
}

#[actix_web::test]
async fn test_rebuild_trigger_and_ingestion_routes() {
    let harness = Harness::new(catalog(4));
    let app = test::init_service(App::new().app_data(state(&harness)).configure(handlers::configure)).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/admin/ranking/rebuild")
        .set_json(json!({ "segment": "crypto", "force": true }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 202);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["outcome"], "accepted");
    assert_eq!(body["segment"], "crypto");

    let req = test::TestRequest::post()
        .uri("/api/v1/admin/ingestion/complete")
        .set_json(json!({ "segments": ["sports"], "newItems": 0, "updatedItems": 0 }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["accepted"], json!([]));

    let req = test::TestRequest::post()
        .uri("/api/v1/admin/ingestion/complete")
        .set_json(json!({ "segments": ["sports"], "newItems": 2 }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["accepted"], json!(["default", "sports"]));
}

#[actix_web::test]
async fn test_health_and_metrics() {
    let harness = Harness::new(Vec::new());
    let app = test::init_service(App::new().app_data(state(&harness)).configure(handlers::configure)).await;

    let req = test::TestRequest::get().uri("/health").to_request();
    assert!(test::call_service(&app, req).await.status().is_success());

    let req = test::TestRequest::get().uri("/api/v1/feed").to_request();
    test::call_service(&app, req).await;

    let req = test::TestRequest::get().uri("/metrics").to_request();
    let body = test::call_and_read_body(&app, req).await;
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("market_feed_page_requests_total"));
}
