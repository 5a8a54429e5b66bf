//! Integration tests for the upload endpoint
//!
//! Drives the axum router with `oneshot` and a stub inference backend, so no
//! network or LLM is involved.

mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use common::*;
use log_classifier::server::{build_router, AppState};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tower::util::ServiceExt; // for `oneshot` method

const BOUNDARY: &str = "X-LOG-CLASSIFIER-BOUNDARY";

/// Test helper: app wired to a keyword stub, writing into `dir`
fn setup_app(dir: &Path, backend: Arc<KeywordBackend>) -> axum::Router {
    let orchestrator = orchestrator(auth_rules(), backend, test_config(20, 4));
    let state = AppState::new(
        Arc::new(orchestrator),
        dir.join("resources").join("output.csv"),
        1024 * 1024,
    );
    build_router(Arc::new(state))
}

/// Test helper: multipart request with a single `file` field
fn upload_request(filename: &str, content: &str) -> Request<Body> {
    let body = format!(
        "--{b}\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\n\
         Content-Type: text/csv\r\n\r\n\
         {c}\r\n\
         --{b}--\r\n",
        b = BOUNDARY,
        f = filename,
        c = content
    );

    Request::builder()
        .method("POST")
        .uri("/classify/")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn body_bytes(body: Body) -> Vec<u8> {
    axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body")
        .to_vec()
}

async fn extract_json(body: Body) -> Value {
    serde_json::from_slice(&body_bytes(body).await).expect("Should parse JSON")
}

#[tokio::test]
async fn test_classify_returns_labeled_csv() {
    let dir = tempfile::tempdir().unwrap();
    let backend = KeywordBackend::new();
    let app = setup_app(dir.path(), backend.clone());

    let csv = "timestamp,source,log_message\n\
               1,auth,login failed\n\
               2,auth,login failed\n\
               3,db,conn refused\n";
    let response = app.oneshot(upload_request("logs.csv", csv)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/csv"
    );

    let body = String::from_utf8(body_bytes(response.into_body()).await).unwrap();
    let lines: Vec<&str> = body.lines().collect();
    assert_eq!(lines[0], "timestamp,source,log_message,target_label");
    assert_eq!(lines[1], "1,auth,login failed,AUTH_FAIL");
    assert_eq!(lines[2], "2,auth,login failed,AUTH_FAIL");
    assert_eq!(lines[3], "3,db,conn refused,Critical Error");

    // The artifact on disk is exactly what was served
    let saved = std::fs::read_to_string(dir.path().join("resources/output.csv")).unwrap();
    assert_eq!(saved, body);
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn test_non_csv_rejected_before_classification() {
    let dir = tempfile::tempdir().unwrap();
    let backend = KeywordBackend::new();
    let app = setup_app(dir.path(), backend.clone());

    let response = app
        .oneshot(upload_request("data.txt", "source,log_message\ndb,conn refused\n"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["detail"], "File must be a CSV.");

    assert_eq!(backend.calls(), 0);
    assert!(!dir.path().join("resources/output.csv").exists());
}

#[tokio::test]
async fn test_missing_column_named() {
    let dir = tempfile::tempdir().unwrap();
    let backend = KeywordBackend::new();
    let app = setup_app(dir.path(), backend.clone());

    let response = app
        .oneshot(upload_request("logs.csv", "source,message\ndb,conn refused\n"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = extract_json(response.into_body()).await;
    let detail = body["detail"].as_str().unwrap();
    assert!(detail.contains("log_message"), "detail was: {}", detail);
    assert!(!detail.contains("Missing: source"));

    assert_eq!(backend.calls(), 0);
    assert!(!dir.path().join("resources/output.csv").exists());
}

#[tokio::test]
async fn test_row_with_extra_fields_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let backend = KeywordBackend::new();
    let app = setup_app(dir.path(), backend.clone());

    let response = app
        .oneshot(upload_request(
            "logs.csv",
            "source,log_message\nauth,login failed,EXTRA\n",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = extract_json(response.into_body()).await;
    let detail = body["detail"].as_str().unwrap();
    assert!(detail.contains("Line 2"), "detail was: {}", detail);

    assert_eq!(backend.calls(), 0);
    assert!(!dir.path().join("resources/output.csv").exists());
}

#[tokio::test]
async fn test_missing_file_field() {
    let dir = tempfile::tempdir().unwrap();
    let app = setup_app(dir.path(), KeywordBackend::new());

    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"other\"\r\n\r\nhello\r\n--{b}--\r\n",
        b = BOUNDARY
    );
    let request = Request::builder()
        .method("POST")
        .uri("/classify/")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_non_multipart_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = setup_app(dir.path(), KeywordBackend::new());

    let request = Request::builder()
        .method("POST")
        .uri("/classify/")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = extract_json(response.into_body()).await;
    assert!(body["detail"].is_string());
}

#[tokio::test]
async fn test_header_only_csv() {
    let dir = tempfile::tempdir().unwrap();
    let backend = KeywordBackend::new();
    let app = setup_app(dir.path(), backend.clone());

    let response = app
        .oneshot(upload_request("empty.csv", "source,log_message\n"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = String::from_utf8(body_bytes(response.into_body()).await).unwrap();
    assert_eq!(body.trim_end(), "source,log_message,target_label");
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn test_health_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let app = setup_app(dir.path(), KeywordBackend::new());

    let request = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["rules_loaded"], 1);
    assert_eq!(body["rule_sources"][0], "auth");
    assert_eq!(body["fallback"], "keyword-stub");
}
