//! Integration tests for the health check endpoint and general HTTP behaviour.

mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use chrono::Utc;
use common::{body_json, get, TestApp};
use matte_db::SlotHeartbeat;
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Test: no live slots means degraded
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_is_degraded_without_live_workers() {
    let test = TestApp::new();
    let response = get(test.app.clone(), "/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;

    assert_eq!(json["status"], "degraded");
    assert!(json["version"].is_string());
    assert_eq!(json["components"]["store"]["healthy"], true);
    assert_eq!(json["components"]["queue"]["healthy"], true);
    assert_eq!(json["components"]["queue"]["depth"], 0);
    assert_eq!(json["components"]["workers"]["healthy"], false);
}

// ---------------------------------------------------------------------------
// Test: a recent heartbeat makes the service healthy
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_is_ok_with_a_live_slot() {
    let test = TestApp::new();
    test.backends
        .store
        .record_heartbeat(&SlotHeartbeat {
            slot: "slot-0@cuda:0".into(),
            device: "cuda:0".into(),
            current_job: None,
            seen_at: Utc::now(),
        })
        .await
        .unwrap();

    let json = body_json(get(test.app.clone(), "/health").await).await;

    assert_eq!(json["status"], "ok");
    let slots = json["components"]["workers"]["live_slots"].as_array().unwrap();
    assert_eq!(slots.len(), 1);
    assert_eq!(slots[0]["slot"], "slot-0@cuda:0");
}

#[tokio::test]
async fn stale_heartbeat_does_not_count() {
    let test = TestApp::new();
    test.backends
        .store
        .record_heartbeat(&SlotHeartbeat {
            slot: "slot-0@cpu".into(),
            device: "cpu".into(),
            current_job: None,
            seen_at: Utc::now() - chrono::Duration::minutes(5),
        })
        .await
        .unwrap();

    let json = body_json(get(test.app.clone(), "/health").await).await;

    assert_eq!(json["status"], "degraded");
    assert_eq!(json["components"]["workers"]["healthy"], false);
}

// ---------------------------------------------------------------------------
// Test: Unknown route returns 404
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_route_returns_404() {
    let test = TestApp::new();
    let response = get(test.app.clone(), "/this-route-does-not-exist").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Test: x-request-id header is present in response
// ---------------------------------------------------------------------------

#[tokio::test]
async fn response_contains_x_request_id_header() {
    let test = TestApp::new();
    let response = get(test.app.clone(), "/health").await;

    let request_id = response.headers().get("x-request-id");
    assert!(
        request_id.is_some(),
        "Response must contain an x-request-id header"
    );
    let id_str = request_id.unwrap().to_str().unwrap();
    assert_eq!(id_str.len(), 36, "x-request-id should be a UUID string");
}

// ---------------------------------------------------------------------------
// Test: CORS preflight with the wildcard default
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cors_preflight_allows_any_origin_by_default() {
    let test = TestApp::new();
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/v1/jobs")
        .header("Origin", "https://client.example.com")
        .header("Access-Control-Request-Method", "POST")
        .header("Access-Control-Request-Headers", "content-type")
        .body(Body::empty())
        .unwrap();

    let response = test.app.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "*"
    );
}
