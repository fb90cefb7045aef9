//! Tests for `AppError` → HTTP response mapping.
//!
//! These call `IntoResponse` directly; no server is needed.

use assert_matches::assert_matches;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use http_body_util::BodyExt;
use sourcepin_api::error::AppError;
use sourcepin_core::error::{CommandFailure, CoreError, USER_ERROR_EXIT_CODE};

async fn error_to_response(err: AppError) -> (StatusCode, serde_json::Value) {
    let response = err.into_response();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    (status, json)
}

// ---------------------------------------------------------------------------
// Test: described failures are 400 with type, digest and description
// ---------------------------------------------------------------------------

#[tokio::test]
async fn validation_error_returns_400() {
    let err = AppError::Core(CoreError::Validation("name must not be empty".into()));

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error_type"], "ValidationError");
    assert_eq!(json["desc"], "Validation failed: name must not be empty");
    let traceback = json["error_traceback"].as_str().unwrap();
    assert_eq!(traceback.len(), 64);
    assert!(traceback.chars().all(|c| c.is_ascii_hexdigit()));
}

#[tokio::test]
async fn ref_not_found_names_ref_and_repo() {
    let err = AppError::Core(CoreError::RefNotFound {
        reference: "v9".into(),
        repo: "https://example.com/w.git".into(),
    });

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error_type"], "RefNotFound");
    assert_eq!(json["ref"], "v9");
    assert_eq!(json["repo"], "https://example.com/w.git");
}

#[tokio::test]
async fn command_failure_reports_exit_code() {
    let failure = CommandFailure {
        desc: "Alignment failed".into(),
        cmd: vec!["pme".into(), "--batch".into()],
        exit_code: Some(3),
        stderr: "bad version".into(),
    }
    .into_user_error();

    let (status, json) = error_to_response(AppError::Core(failure.into())).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error_type"], "CommandError");
    assert_eq!(json["exit_code"], USER_ERROR_EXIT_CODE);
    assert_eq!(json["cmd"], serde_json::json!(["pme", "--batch"]));
    assert_matches!(json.get("stderr"), None);
}

#[tokio::test]
async fn unknown_job_returns_400() {
    let (status, json) = error_to_response(AppError::JobNotFound("abc".into())).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error_type"], "JobNotFound");
}

// ---------------------------------------------------------------------------
// Test: unexpected failures are 500 and not echoed back
// ---------------------------------------------------------------------------

#[tokio::test]
async fn internal_error_returns_500_and_sanitizes_message() {
    let err = AppError::Core(CoreError::Internal("secret path /srv/keys leaked".into()));

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error_type"], "InternalError");
    assert_eq!(json["desc"], "An internal error occurred");
    assert!(!json.to_string().contains("/srv/keys"));
}
