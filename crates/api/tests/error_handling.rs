//! Tests for `AppError` → HTTP response mapping.
//!
//! These call `IntoResponse` directly on `AppError` values; no server is
//! needed.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use http_body_util::BodyExt;
use matte_api::error::AppError;
use matte_api::gateway::GatewayError;
use matte_core::error::CoreError;
use matte_core::job::JobStatus;

/// Helper: convert an `AppError` into its status code and parsed JSON body.
async fn error_to_response(err: AppError) -> (StatusCode, serde_json::Value) {
    let response = err.into_response();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    (status, json)
}

#[tokio::test]
async fn invalid_input_returns_400() {
    let err = AppError::Gateway(GatewayError::InvalidInput("Input not found: x.png".into()));

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "INVALID_INPUT");
    assert_eq!(json["error"], "Input not found: x.png");
}

#[tokio::test]
async fn queue_unavailable_returns_503_with_generic_message() {
    let err = AppError::Gateway(GatewayError::QueueUnavailable(
        "connection refused to 10.0.0.5:5432".into(),
    ));

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["code"], "QUEUE_UNAVAILABLE");
    assert!(!json["error"].as_str().unwrap().contains("10.0.0.5"));
}

#[tokio::test]
async fn gateway_not_found_returns_404() {
    let err = AppError::Gateway(GatewayError::NotFound("abc".into()));

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");
    assert_eq!(json["error"], "Job not found: abc");
}

#[tokio::test]
async fn core_validation_error_returns_400() {
    let err = AppError::Core(CoreError::Validation("custom_data must be a JSON object".into()));

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "INVALID_INPUT");
    assert_eq!(json["error"], "custom_data must be a JSON object");
}

#[tokio::test]
async fn invalid_transition_is_an_internal_error() {
    let err = AppError::Core(CoreError::InvalidTransition {
        from: JobStatus::Notified,
        to: JobStatus::Processing,
    });

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["code"], "INTERNAL_ERROR");
}

#[tokio::test]
async fn bad_request_returns_400() {
    let err = AppError::BadRequest("Missing required 'file' field".into());

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "INVALID_INPUT");
    assert_eq!(json["error"], "Missing required 'file' field");
}

#[tokio::test]
async fn internal_error_returns_500_and_sanitizes_message() {
    let err = AppError::InternalError("disk full at /var/lib/matte".into());

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["code"], "INTERNAL_ERROR");
    assert_eq!(json["error"], "An internal error occurred");
}
