//! API integration tests

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use hitstats_server::{
    api::create_router,
    config::{AppConfig, StorageBackend},
    repository::Repository,
    services::Services,
    AppState,
};

fn app() -> Router {
    let mut config = AppConfig::default();
    config.storage.backend = StorageBackend::Memory;

    create_router(AppState {
        config: Arc::new(config),
        services: Arc::new(Services::new(Repository::in_memory())),
    })
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    let request = match body {
        Some(body) => request.body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .expect("Failed to build request");

    let response = app.clone().oneshot(request).await.expect("Failed to send request");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("Failed to parse response")
    };
    (status, body)
}

async fn create_host(app: &Router, hostname: &str) -> i64 {
    let (status, body) = send(app, "POST", "/api/v1/hosts", Some(json!({ "hostname": hostname }))).await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_i64().expect("No host id in response")
}

async fn create_hit(app: &Router, host_id: i64, path: &str, status: &str, count: i64, hit_on: &str) {
    let (code, body) = send(
        app,
        "POST",
        "/api/v1/hits",
        Some(json!({
            "host_id": host_id,
            "path": path,
            "http_status": status,
            "count": count,
            "hit_on": hit_on,
        })),
    )
    .await;
    assert_eq!(code, StatusCode::CREATED, "unexpected response: {}", body);
}

async fn seed(app: &Router) {
    let www = create_host(app, "www.example.gov").await;
    let aka = create_host(app, "aka.example.gov").await;

    create_hit(app, www, "/a", "301", 10, "2024-06-01").await;
    create_hit(app, aka, "/a", "301", 2, "2024-06-01").await;
    create_hit(app, www, "/a", "404", 22, "2024-06-01").await;
    create_hit(app, www, "/b", "301", 40, "2024-06-01").await;
    create_hit(app, aka, "/b", "301", 4, "2024-06-01").await;
    create_hit(app, aka, "/a", "301", 88, "2024-06-02").await;
}

#[tokio::test]
async fn test_health_check() {
    let app = app();
    let (status, body) = send(&app, "GET", "/api/v1/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = send(&app, "GET", "/api/v1/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["storage"], "memory");
}

#[tokio::test]
async fn test_create_hit_normalizes() {
    let app = app();
    let host = create_host(&app, "www.example.gov").await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/hits",
        Some(json!({
            "host_id": host,
            "path": "/some/page",
            "http_status": "200",
            "count": "7",
            "hit_on": "2024-06-01T18:45:00Z",
        })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["hit_on"], "2024-06-01");
    assert_eq!(body["count"], 7);
    assert_eq!(body["path_hash"].as_str().map(str::len), Some(40));
}

#[tokio::test]
async fn test_create_invalid_hit() {
    let app = app();
    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/hits",
        Some(json!({
            "host_id": 1,
            "path": "/x",
            "http_status": "4044",
            "count": 1.3,
            "hit_on": "2024-06-01",
        })),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["details"]["http_status"].is_array());
    assert!(body["details"]["count"].is_array());

    let (_, hits) = send(&app, "GET", "/api/v1/hits", None).await;
    assert_eq!(hits.as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn test_create_hit_for_unknown_host() {
    let app = app();
    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/hits",
        Some(json!({
            "host_id": 999,
            "path": "/x",
            "http_status": "200",
            "count": 1,
            "hit_on": "2024-06-01",
        })),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["details"]["host_id"][0]["code"], "exists");

    let (_, hits) = send(&app, "GET", "/api/v1/hits", None).await;
    assert_eq!(hits.as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn test_create_hit_count_bounds() {
    let app = app();
    let host = create_host(&app, "www.example.gov").await;
    let hit = |count: Value, path: &str| {
        json!({
            "host_id": host,
            "path": path,
            "http_status": "200",
            "count": count,
            "hit_on": "2024-06-01",
        })
    };

    let (status, body) = send(&app, "POST", "/api/v1/hits", Some(hit(json!(2147483648i64), "/over"))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["details"]["count"].is_array());

    let (status, body) = send(&app, "POST", "/api/v1/hits", Some(hit(json!(2147483647i64), "/max"))).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["id"].as_i64().expect("No hit id");

    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/v1/hits/{}/increment", id),
        Some(json!({ "by": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_hits_in_count_order() {
    let app = app();
    seed(&app).await;

    let (status, body) = send(&app, "GET", "/api/v1/hits?date=2024-06-01&aggregate=true", None).await;
    assert_eq!(status, StatusCode::OK);

    let counts: Vec<i64> = body
        .as_array()
        .expect("Expected an array")
        .iter()
        .filter_map(|hit| hit["count"].as_i64())
        .collect();
    assert_eq!(counts, vec![44, 22, 12]);
    assert!(body[0]["host_id"].is_null());
}

#[tokio::test]
async fn test_list_hits_with_status() {
    let app = app();
    seed(&app).await;

    let (_, redirects) = send(&app, "GET", "/api/v1/hits?status=301", None).await;
    assert_eq!(redirects.as_array().map(Vec::len), Some(5));

    let (_, everything) = send(&app, "GET", "/api/v1/hits?status=all", None).await;
    assert_eq!(everything.as_array().map(Vec::len), Some(6));

    let (_, errors) = send(&app, "GET", "/api/v1/hits?category=errors", None).await;
    assert_eq!(errors.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn test_hits_summary() {
    let app = app();
    seed(&app).await;

    let (status, body) = send(&app, "GET", "/api/v1/hits/summary?aggregate=true", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["most_recent_hit_on"], "2024-06-02");
    assert_eq!(body["total_hits"], 166);
    assert_eq!(body["most_hits"], 88);
    assert_eq!(body["counts_by_status"], json!({ "301": 144, "404": 22 }));

    let (_, period) = send(
        &app,
        "GET",
        "/api/v1/hits/summary?start_date=2024-06-01&end_date=2024-06-01&aggregate=true",
        None,
    )
    .await;
    assert_eq!(period["most_hits"], 44);
    assert_eq!(period["total_hits"], 78);
}

#[tokio::test]
async fn test_summary_of_empty_period() {
    let app = app();
    let (status, body) = send(
        &app,
        "GET",
        "/api/v1/hits/summary?start_date=2020-01-01&end_date=2020-01-31",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["most_recent_hit_on"], "2020-01-31");
    assert_eq!(body["total_hits"], 0);
    assert_eq!(body["most_hits"], 0);
    assert_eq!(body["counts_by_status"], json!({}));
}

#[tokio::test]
async fn test_bad_query_date() {
    let app = app();
    let (status, _) = send(&app, "GET", "/api/v1/hits?start_date=yesterday", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_increment_and_delete() {
    let app = app();
    let host = create_host(&app, "www.example.gov").await;
    create_hit(&app, host, "/inc", "200", 1, "2024-06-01").await;

    let (_, hits) = send(&app, "GET", "/api/v1/hits", None).await;
    let id = hits[0]["id"].as_i64().expect("No hit id");

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/v1/hits/{}/increment", id),
        Some(json!({ "by": 5 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 6);

    let (status, _) = send(&app, "POST", "/api/v1/hits/9999/increment", Some(json!({ "by": 1 }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, "DELETE", "/api/v1/hits", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], 1);
}
