//! API tests over the in-process router.
//!
//! Requests go through the real task manager; storefront, parsers and
//! webhooks are mocks.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use cartrunner_core::checkout::{CheckoutState, StepResponse};
use serde_json::{json, Value};

use common::{fixtures, TestFixture};

const TIMEOUT: Duration = Duration::from_secs(5);

fn task_json(id: &str, sizes: &[&str]) -> Value {
    serde_json::to_value(fixtures::sized_task(id, sizes)).unwrap()
}

// =============================================================================
// Basic endpoints
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let fixture = TestFixture::new();
    let response = fixture.get("/api/v1/health").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
}

#[tokio::test]
async fn test_config_hides_site_keys() {
    let fixture = TestFixture::new();
    let response = fixture.get("/api/v1/config").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["sites"][0]["api_key_configured"], true);
    assert!(!response.body.to_string().contains("configured-key"));
}

#[tokio::test]
async fn test_metrics_endpoint_renders_text() {
    let fixture = TestFixture::new();
    fixture.get("/api/v1/health").await;

    let (status, text) = fixture.get_text("/api/v1/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("cartrunner_http_requests_total"));
    assert!(text.contains("cartrunner_tasks_running"));
}

// =============================================================================
// Tasks
// =============================================================================

#[tokio::test]
async fn test_start_task_runs_to_completion() {
    let fixture = TestFixture::new();
    fixture
        .parsers
        .feed()
        .push(Ok(fixtures::sized_product(&[("9", true)])))
        .await;

    let response = fixture.post("/api/v1/tasks", task_json("t1", &["9"])).await;
    assert_status!(response, StatusCode::CREATED);
    assert_eq!(response.body["task_id"], "t1");
    assert!(response.body["runner_id"]
        .as_str()
        .unwrap()
        .starts_with("task-"));

    assert!(fixture.wait_for_tasks(0, TIMEOUT).await);
    assert_eq!(fixture.gateway.released().await, vec!["t1".to_string()]);

    // Site keys the request left out come from the configured site.
    let requests = fixture.gateway.requests().await;
    assert_eq!(
        requests[0].task.site.api_key.as_deref(),
        Some("configured-key")
    );
}

#[tokio::test]
async fn test_start_twice_conflicts() {
    let fixture = TestFixture::new();
    let first = fixture.post("/api/v1/tasks", task_json("t1", &["9"])).await;
    assert_status!(first, StatusCode::CREATED);

    let second = fixture.post("/api/v1/tasks", task_json("t1", &["9"])).await;
    assert_status!(second, StatusCode::CONFLICT);
    assert_eq!(second.body["error"], "task already running: t1");

    let list = fixture.get("/api/v1/tasks").await;
    assert_eq!(list.body["total"], 1);
    assert_eq!(list.body["tasks"][0]["task_id"], "t1");

    fixture.manager.shutdown().await;
}

#[tokio::test]
async fn test_start_rejects_empty_id() {
    let fixture = TestFixture::new();
    let response = fixture.post("/api/v1/tasks", task_json("  ", &["9"])).await;
    assert_status!(response, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_start_rejects_malformed_body() {
    let fixture = TestFixture::new();
    let response = fixture.post_raw("/api/v1/tasks", "{ not json").await;
    assert!(response.status.is_client_error());
}

#[tokio::test]
async fn test_stop_task_and_unknown_task() {
    let fixture = TestFixture::new();
    fixture.post("/api/v1/tasks", task_json("t1", &["9"])).await;

    let stopped = fixture.delete("/api/v1/tasks/t1").await;
    assert_status!(stopped, StatusCode::OK);
    assert!(fixture.wait_for_tasks(0, TIMEOUT).await);

    let missing = fixture.delete("/api/v1/tasks/t1").await;
    assert_status!(missing, StatusCode::NOT_FOUND);
    assert_eq!(missing.body["error"], "task not found: t1");
}

#[tokio::test]
async fn test_restart_uses_path_id() {
    let fixture = TestFixture::new();
    fixture.post("/api/v1/tasks", task_json("t1", &["9"])).await;

    let mut edited = task_json("ignored", &["10"]);
    edited["selector"] = json!({ "type": "url", "url": "https://shop.example/products/runner" });
    let response = fixture.put("/api/v1/tasks/t1", edited).await;
    assert_status!(response, StatusCode::OK);

    let list = fixture.get("/api/v1/tasks").await;
    assert_eq!(list.body["total"], 1);
    assert_eq!(list.body["tasks"][0]["task_id"], "t1");

    let unknown = fixture.put("/api/v1/tasks/t2", task_json("t2", &["9"])).await;
    assert_status!(unknown, StatusCode::NOT_FOUND);

    fixture.manager.shutdown().await;
}

#[tokio::test]
async fn test_equivalent_tasks_report_shared_monitor() {
    let fixture = TestFixture::new();
    fixture.post("/api/v1/tasks", task_json("a", &["8"])).await;
    fixture.post("/api/v1/tasks", task_json("b", &["9"])).await;

    let status = fixture.get("/api/v1/status").await;
    assert_eq!(status.body["tasks"], 2);
    assert_eq!(status.body["monitors"], 1);

    let peers = fixture.get("/api/v1/tasks/a/peers").await;
    assert_status!(peers, StatusCode::OK);
    assert_eq!(peers.body["peers"], json!(["a", "b"]));

    fixture.manager.shutdown().await;
}

// =============================================================================
// Proxies
// =============================================================================

#[tokio::test]
async fn test_proxy_register_list_deregister() {
    let fixture = TestFixture::new();

    let response = fixture
        .post(
            "/api/v1/proxies",
            json!({ "proxies": ["10.0.0.1:8080", "10.0.0.2:8080:user:pass", "not a proxy"] }),
        )
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["count"], 2);
    assert_eq!(response.body["rejected"], json!(["not a proxy"]));

    let list = fixture.get("/api/v1/proxies").await;
    assert_eq!(list.body.as_array().unwrap().len(), 2);
    assert!(!list.body.to_string().contains("pass"));

    let removed = fixture
        .delete_with_body("/api/v1/proxies", json!({ "proxies": ["10.0.0.1:8080"] }))
        .await;
    assert_status!(removed, StatusCode::OK);
    assert_eq!(removed.body["count"], 1);
    assert_eq!(fixture.get("/api/v1/status").await.body["proxies"], 1);
}

#[tokio::test]
async fn test_proxy_register_requires_entries() {
    let fixture = TestFixture::new();
    let response = fixture.post("/api/v1/proxies", json!({ "proxies": [] })).await;
    assert_status!(response, StatusCode::BAD_REQUEST);
}

// =============================================================================
// CAPTCHA and control events
// =============================================================================

#[tokio::test]
async fn test_harvested_token_unblocks_checkout() {
    let fixture = TestFixture::new();
    fixture
        .gateway
        .push(
            CheckoutState::CompletePayment,
            Ok(StepResponse::redirect(302, "https://shop.example/checkpoint")),
        )
        .await;
    fixture
        .parsers
        .feed()
        .push(Ok(fixtures::sized_product(&[("9", true)])))
        .await;

    let started = fixture.post("/api/v1/tasks", task_json("t1", &["9"])).await;
    let runner_id = started.body["runner_id"].as_str().unwrap().to_string();

    // The configured site supplies the CAPTCHA site key.
    let start = std::time::Instant::now();
    loop {
        let waiting = fixture.get("/api/v1/captcha/waiting/sk-shop").await;
        if waiting.body["runners"] == json!([runner_id.clone()]) {
            break;
        }
        assert!(start.elapsed() < TIMEOUT, "never queued for captcha");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let response = fixture
        .post(
            "/api/v1/captcha/harvest",
            json!({ "token": "tok", "site_key": "sk-shop" }),
        )
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["delivered"], true);
    assert_eq!(response.body["runner_id"], runner_id.as_str());

    assert!(fixture.wait_for_tasks(0, TIMEOUT).await);
    let sent = fixture.notifier.sent().await;
    assert!(sent.is_empty() || sent[0].success);
}

#[tokio::test]
async fn test_harvest_without_waiter_is_dropped() {
    let fixture = TestFixture::new();
    let response = fixture
        .post(
            "/api/v1/captcha/harvest",
            json!({ "token": "tok", "site_key": "nobody" }),
        )
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["delivered"], false);
    assert!(response.body["runner_id"].is_null());
}

#[tokio::test]
async fn test_dispatch_change_delay() {
    let fixture = TestFixture::new();
    fixture.post("/api/v1/tasks", task_json("t1", &["9"])).await;

    let response = fixture
        .post(
            "/api/v1/events",
            json!({
                "target": { "scope": "task", "id": "t1" },
                "event": { "type": "change_delay", "ms": 50, "kind": "monitor" }
            }),
        )
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["event"], "change_delay");
    // The checkout and its monitor.
    assert_eq!(response.body["delivered"], 2);

    let missing = fixture
        .post(
            "/api/v1/events",
            json!({ "target": { "scope": "task", "id": "nope" }, "event": { "type": "abort" } }),
        )
        .await;
    assert_status!(missing, StatusCode::NOT_FOUND);

    let everyone = fixture
        .post(
            "/api/v1/events",
            json!({ "target": { "scope": "all" }, "event": { "type": "abort" } }),
        )
        .await;
    assert_status!(everyone, StatusCode::OK);
    assert!(fixture.wait_for_tasks(0, TIMEOUT).await);
}
