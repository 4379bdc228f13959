//! Integration tests for the Image Registry API

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use image_registry::{create_router, AppState};
use image_selector::ValidationPolicy;
use serde_json::{json, Value};
use tower::ServiceExt; // for `oneshot`

fn create_test_app() -> Router {
    create_router(AppState::new(ValidationPolicy::default()))
}

fn image(id: &str, env: &str, state: &str, created_at: &str) -> Value {
    json!({
        "id": id,
        "name": format!("golden-ami-ubuntu-22.04-{}", id),
        "region": "us-east-1",
        "state": state,
        "created_at": created_at,
        "tags": {
            "Environment": env,
            "Purpose": "golden-ami",
            "OS": "ubuntu",
            "OSVersion": "22.04"
        }
    })
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

#[tokio::test]
async fn test_health_check() {
    let app = create_test_app();
    let (status, json) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["service"], "image-registry");
    assert_eq!(json["images"], 0);
}

#[tokio::test]
async fn test_ingest_and_latest() {
    let app = create_test_app();

    let (status, json) = send(
        &app,
        "POST",
        "/api/images",
        Some(image("ami-001", "prod", "available", "2024-01-01T00:00:00Z")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["success"], true);
    assert_eq!(json["out_of_order"], false);
    assert_eq!(json["validation"]["passed"], true);

    send(
        &app,
        "POST",
        "/api/images",
        Some(image("ami-002", "prod", "available", "2024-01-02T00:00:00Z")),
    )
    .await;

    let (status, json) = send(&app, "GET", "/api/environments/prod/latest", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["image"]["id"], "ami-002");

    let (_, json) = send(&app, "GET", "/api/environments", None).await;
    assert_eq!(json["environments"], json!(["prod"]));
}

#[tokio::test]
async fn test_duplicate_conflict() {
    let app = create_test_app();
    let body = image("ami-dup", "prod", "available", "2024-01-01T00:00:00Z");

    let (status, _) = send(&app, "POST", "/api/images", Some(body.clone())).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, json) = send(&app, "POST", "/api/images", Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(json["error"].as_str().unwrap().contains("ami-dup"));

    let (_, json) = send(&app, "GET", "/api/environments/prod/images", None).await;
    assert_eq!(json["total"], 1);
}

#[tokio::test]
async fn test_empty_environment_not_found() {
    let app = create_test_app();
    let (status, json) = send(&app, "GET", "/api/environments/staging/latest", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("staging"));
}

#[tokio::test]
async fn test_malformed_record_rejected() {
    let app = create_test_app();
    let mut body = image("ami-x", "prod", "available", "2024-01-01T00:00:00Z");
    body["tags"].as_object_mut().unwrap().remove("Environment");

    let (status, _) = send(&app, "POST", "/api/images", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_ingest_reports_policy_failures() {
    let app = create_test_app();
    let mut body = image("ami-bare", "prod", "available", "2024-01-01T00:00:00Z");
    body["tags"].as_object_mut().unwrap().remove("Purpose");
    body["tags"].as_object_mut().unwrap().remove("OS");

    let (status, json) = send(&app, "POST", "/api/images", Some(body)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["validation"]["passed"], false);
    assert_eq!(json["validation"]["failures"].as_array().unwrap().len(), 2);

    // Recorded, but never selected
    let (status, _) = send(&app, "GET", "/api/environments/prod/latest", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_deregister_flow() {
    let app = create_test_app();
    send(
        &app,
        "POST",
        "/api/images",
        Some(image("ami-dev", "dev", "available", "2024-01-01T00:00:00Z")),
    )
    .await;

    let (status, json) = send(&app, "POST", "/api/images/ami-dev/deregister", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["image"]["state"], "deregistered");

    let (status, _) = send(&app, "GET", "/api/environments/dev/latest", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, json) = send(&app, "GET", "/api/images/ami-dev", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["image"]["state"], "deregistered");

    let (status, _) = send(&app, "POST", "/api/images/ami-dev/deregister", None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = send(&app, "POST", "/api/images/ami-missing/deregister", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_pending_then_available() {
    let app = create_test_app();
    send(
        &app,
        "POST",
        "/api/images",
        Some(image("ami-p", "staging", "pending", "2024-01-01T00:00:00Z")),
    )
    .await;

    let (status, _) = send(&app, "GET", "/api/environments/staging/latest", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, json) = send(
        &app,
        "PUT",
        "/api/images/ami-p/state",
        Some(json!({"state": "available"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["image"]["state"], "available");

    let (_, json) = send(&app, "GET", "/api/environments/staging/latest", None).await;
    assert_eq!(json["image"]["id"], "ami-p");

    let (status, _) = send(
        &app,
        "PUT",
        "/api/images/ami-p/state",
        Some(json!({"state": "pending"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_validate_endpoints() {
    let app = create_test_app();
    let mut body = image("ami-v", "prod", "pending", "2024-01-01T00:00:00Z");
    body["tags"].as_object_mut().unwrap().remove("OSVersion");

    let (status, json) = send(&app, "POST", "/api/validate", Some(json!({ "image": body.clone() }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["passed"], false);
    let reasons: Vec<_> = json["failures"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["reason"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(reasons, vec!["missing_tag", "wrong_state"]);

    // Policy override in the request
    let (_, json) = send(
        &app,
        "POST",
        "/api/validate",
        Some(json!({
            "image": body.clone(),
            "policy": {"required_tags": ["Environment"], "required_state": "pending"}
        })),
    )
    .await;
    assert_eq!(json["passed"], true);

    send(&app, "POST", "/api/images", Some(body)).await;
    let (status, json) = send(&app, "GET", "/api/images/ami-v/validation", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["image_id"], "ami-v");
    assert_eq!(json["failures"].as_array().unwrap().len(), 2);

    let (status, _) = send(&app, "GET", "/api/images/ami-none/validation", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_validate_rejects_out_of_range_max_age() {
    let app = create_test_app();
    let body = image("ami-age", "prod", "available", "2024-01-01T00:00:00Z");

    let (status, _) = send(
        &app,
        "POST",
        "/api/validate",
        Some(json!({
            "image": body.clone(),
            "policy": {"max_age_secs": i64::MAX}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    // The service keeps answering
    let (status, json) = send(&app, "POST", "/api/validate", Some(json!({ "image": body }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["passed"], true);
}
