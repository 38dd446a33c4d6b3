// Integration tests: HTTP health and usage endpoints

mod common;

use axum_test::TestServer;
use chrono::Utc;
use common::test_repo;
use traffic_reporter::models::Usage;
use traffic_reporter::routes;

async fn test_server() -> (tempfile::TempDir, TestServer) {
    let (dir, repo) = test_repo().await;
    let now = Utc::now();
    repo.append_sample("n1", now, Usage::new(100, 900)).await.unwrap();
    repo.append_sample("n2", now, Usage::new(10, 0)).await.unwrap();
    let server = TestServer::try_new(routes::app(repo, 3)).unwrap();
    (dir, server)
}

#[tokio::test]
async fn test_root_endpoint() {
    let (_dir, server) = test_server().await;
    let response = server.get("/").await;
    response.assert_status_ok();
    response.assert_text("traffic-reporter");
}

#[tokio::test]
async fn test_version_endpoint() {
    let (_dir, server) = test_server().await;
    let response = server.get("/version").await;
    response.assert_status_ok();
    let json: serde_json::Value = response.json();
    assert_eq!(
        json.get("name").and_then(|v| v.as_str()),
        Some("traffic-reporter")
    );
    assert!(json.get("version").and_then(|v| v.as_str()).is_some());
}

#[tokio::test]
async fn test_health_endpoint() {
    let (_dir, server) = test_server().await;
    let response = server.get("/health").await;
    response.assert_status_ok();
    response.assert_text("ok");
}

#[tokio::test]
async fn test_usage_last_hours() {
    let (_dir, server) = test_server().await;
    let response = server.get("/api/usage").add_query_param("window", "1h").await;
    response.assert_status_ok();
    let json: serde_json::Value = response.json();
    assert_eq!(json["window"], "last 1h");
    let nodes = json["nodes"].as_array().unwrap();
    assert_eq!(nodes.len(), 2);
    let n1 = nodes.iter().find(|n| n["node"]["id"] == "n1").unwrap();
    assert_eq!(n1["upload"], 100);
    assert_eq!(n1["download"], 900);
    assert_eq!(json["total"]["upload"], 110);
}

#[tokio::test]
async fn test_usage_rejects_zero_hours() {
    let (_dir, server) = test_server().await;
    let response = server
        .get("/api/usage")
        .add_query_param("window", "0h")
        .expect_failure()
        .await;
    response.assert_status_bad_request();
    let json: serde_json::Value = response.json();
    assert!(json["error"].as_str().unwrap().contains("greater than zero"));
}

#[tokio::test]
async fn test_top_limits_and_orders() {
    let (_dir, server) = test_server().await;
    let response = server
        .get("/api/top")
        .add_query_param("window", "6h")
        .add_query_param("n", 1)
        .await;
    response.assert_status_ok();
    let json: serde_json::Value = response.json();
    let top = json["top"].as_array().unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0]["node"]["id"], "n1");
}

#[tokio::test]
async fn test_top_rejects_oversized_hours() {
    let (_dir, server) = test_server().await;
    let response = server
        .get("/api/top")
        .add_query_param("window", "4294967295h")
        .expect_failure()
        .await;
    response.assert_status_bad_request();
    let json: serde_json::Value = response.json();
    assert!(json["error"].as_str().unwrap().contains("at most"));
}
