//! Common test utilities for API testing with mocks.
//!
//! Builds the router over a real task manager whose storefront, parsers and
//! webhooks are mocks, so requests exercise the full stack in-process.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use cartrunner_core::{
    testing::{MockGateway, MockNotifier, MockParserFactory},
    CaptchaBroker, CheckoutGateway, Collaborators, Config, ManagerSettings, Notifier,
    ParserFactory, ProxyConfig, ProxyPool, RunnerConfig, TaskManager,
};
use cartrunner_server::{api::create_router, state::AppState};

/// Re-export fixtures for test convenience
pub use cartrunner_core::testing::fixtures;

/// Test fixture with an in-process router and controllable mocks.
pub struct TestFixture {
    pub router: Router,
    pub manager: TaskManager,
    pub parsers: Arc<MockParserFactory>,
    pub gateway: Arc<MockGateway>,
    pub notifier: Arc<MockNotifier>,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    pub fn new() -> Self {
        let config: Config = cartrunner_core::load_config_from_str(
            r#"
[server]
host = "127.0.0.1"
port = 8080

[[sites]]
name = "Example Shop"
url = "https://shop.example"
api_key = "configured-key"
captcha_site_key = "sk-shop"
"#,
        )
        .expect("Failed to parse test config");
        Self::with_config(config)
    }

    pub fn with_config(config: Config) -> Self {
        let parsers = Arc::new(MockParserFactory::new());
        let gateway = Arc::new(MockGateway::new());
        let notifier = Arc::new(MockNotifier::new());
        let pool = Arc::new(ProxyPool::new(ProxyConfig {
            retry_interval_ms: 10,
            max_retries: 2,
            ..Default::default()
        }));

        let mut settings = ManagerSettings::from(&config);
        settings.runner = RunnerConfig {
            monitor_delay_ms: 20,
            error_delay_ms: 20,
            captcha_poll_ms: 10,
            wait_for_product_poll_ms: 10,
            queue_retry_ms: 20,
            ..Default::default()
        };
        settings.monitor.swap_timeout = Duration::from_secs(1);

        let parts = Collaborators {
            pool,
            broker: Arc::new(CaptchaBroker::default()),
            parsers: Arc::clone(&parsers) as Arc<dyn ParserFactory>,
            gateway: Arc::clone(&gateway) as Arc<dyn CheckoutGateway>,
            notifier: Some(Arc::clone(&notifier) as Arc<dyn Notifier>),
        };
        let manager = TaskManager::new(settings, parts);

        let state = Arc::new(AppState::new(config, manager.clone()));
        let router = create_router(state);

        Self {
            router,
            manager,
            parsers,
            gateway,
            notifier,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a PUT request with JSON body.
    pub async fn put(&self, path: &str, body: Value) -> TestResponse {
        self.request("PUT", path, Some(body)).await
    }

    /// Send a DELETE request.
    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, None).await
    }

    /// Send a DELETE request with JSON body.
    pub async fn delete_with_body(&self, path: &str, body: Value) -> TestResponse {
        self.request("DELETE", path, Some(body)).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    /// Raw response text, for non-JSON endpoints.
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder().uri(path).body(Body::empty()).unwrap();
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        self.send(request_builder.body(body).unwrap()).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }

    /// Poll until exactly `count` tasks are running.
    pub async fn wait_for_tasks(&self, count: usize, timeout: Duration) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            if self.manager.status().await.tasks == count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
