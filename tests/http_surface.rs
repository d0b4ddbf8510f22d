//! HTTP surface: health string, debug echo, and the influencers endpoint's
//! structured failure and success shapes.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use helpers::{retweet, user};
use sway_analytics::analysis::{CollectiveInfluenceRanker, OnDemandAnalysis};
use sway_analytics::api::{create_router, AppState, QueryLog};
use sway_analytics::dispatcher::{Dispatcher, DispatcherConfig};
use sway_analytics::upstream::{MemorySearchBackend, UpstreamClient};

fn test_app(dir: &std::path::Path, backend: Arc<MemorySearchBackend>) -> axum::Router {
    let client = UpstreamClient::new(backend);
    let config = DispatcherConfig::new(OnDemandAnalysis::new(dir.join("archives")));
    let dispatcher = Dispatcher::spawn(config, client, Arc::new(CollectiveInfluenceRanker));
    create_router(AppState {
        dispatcher,
        query_log: Arc::new(QueryLog::new(dir.join("logs/failed_queries.log"))),
        slow_threshold: Duration::from_secs(60),
    })
}

async fn get_json(app: axum::Router, uri: &str) -> Value {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path(), Arc::new(MemorySearchBackend::new()));
    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"Analytics server is ONLINE");
}

#[tokio::test]
async fn test_debug_echoes_request() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path(), Arc::new(MemorySearchBackend::new()));
    let response = app
        .oneshot(
            Request::builder()
                .uri("/debug/some/path?x=1")
                .header("x-probe", "42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.starts_with("You requested:"));
    assert!(text.contains("GET /debug/some/path?x=1"));
    assert!(text.contains("x-probe: 42"));
}

#[tokio::test]
async fn test_empty_query_is_structured_failure() {
    // S1: empty query resolves immediately with error code 1.
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path(), Arc::new(MemorySearchBackend::new()));
    let body = get_json(app, "/influencers.json?query=").await;
    assert_eq!(body["failure"], Value::Bool(true));
    assert_eq!(body["error_code"], 1);
    assert_eq!(body["error_text"], "Empty or invalid query");
}

#[tokio::test]
async fn test_punctuation_only_query_is_structured_failure() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(dir.path(), Arc::new(MemorySearchBackend::new()));
    let body = get_json(app, "/influencers.json?query=%28%29%2C").await;
    assert_eq!(body["failure"], Value::Bool(true));
    assert_eq!(body["error_code"], 1);
}

#[tokio::test]
async fn test_influencers_success_shape() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MemorySearchBackend::new());
    backend.seed_posts(vec![
        retweet(11, "2", "1"),
        retweet(12, "3", "1"),
        retweet(13, "4", "1"),
    ]);
    backend.seed_users(vec![
        user("1", "origin", 1000),
        user("2", "fan_one", 10),
        user("3", "fan_two", 10),
        user("4", "fan_three", 10),
    ]);

    let app = test_app(dir.path(), backend);
    let body = get_json(app, "/influencers.json?query=anything").await;
    assert_eq!(body["failure"], Value::Bool(false));
    let influencers = body["influencers"].as_object().unwrap();
    assert!(influencers.contains_key("origin"));
    assert_eq!(influencers["origin"]["rank"], 1);
    let graph = &body["graph"];
    assert_eq!(graph["directed"], Value::Bool(true));
    assert!(graph["nodes"].as_array().unwrap().len() >= 1);
}
