//! Prometheus metrics for the HTTP surface.
//!
//! Server-side metrics cover HTTP requests and WebSocket relays; runner,
//! proxy and CAPTCHA metrics come from the core crate and are registered
//! into the same registry.

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

use crate::state::AppState;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "cartrunner_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("cartrunner_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

// =============================================================================
// WebSocket Metrics
// =============================================================================

/// Active WebSocket connections.
pub static WS_CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "cartrunner_ws_connections_active",
        "Number of active WebSocket connections",
    )
    .unwrap()
});

/// WebSocket messages sent by type.
pub static WS_MESSAGES_SENT: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("cartrunner_ws_messages_sent_total", "WebSocket messages sent"),
        &["type"],
    )
    .unwrap()
});

/// Status events skipped because a client fell behind.
pub static WS_LAG_EVENTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "cartrunner_ws_lag_events_total",
        "WebSocket lag events (client fell behind)",
    )
    .unwrap()
});

// =============================================================================
// Orchestrator Metrics (collected dynamically)
// =============================================================================

/// Running tasks.
pub static TASKS_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("cartrunner_tasks_running", "Number of tasks currently running").unwrap()
});

/// Proxies in the pool.
pub static PROXIES_REGISTERED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("cartrunner_proxies_registered", "Number of proxies in the pool").unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();

    // WebSocket
    registry
        .register(Box::new(WS_CONNECTIONS_ACTIVE.clone()))
        .unwrap();
    registry
        .register(Box::new(WS_MESSAGES_SENT.clone()))
        .unwrap();
    registry.register(Box::new(WS_LAG_EVENTS.clone())).unwrap();

    // Orchestrator
    registry.register(Box::new(TASKS_RUNNING.clone())).unwrap();
    registry
        .register(Box::new(PROXIES_REGISTERED.clone()))
        .unwrap();

    // Core metrics (runners, monitors, proxies, CAPTCHA)
    for metric in cartrunner_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Refresh gauges from the task manager before encoding.
pub async fn collect_dynamic_metrics(state: &AppState) {
    let status = state.manager().status().await;
    TASKS_RUNNING.set(status.tasks as i64);
    PROXIES_REGISTERED.set(status.proxies as i64);
}

static UUID_RE: Lazy<regex_lite::Regex> = Lazy::new(|| {
    regex_lite::Regex::new(
        r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
    )
    .unwrap()
});

static TASK_ID_RE: Lazy<regex_lite::Regex> =
    Lazy::new(|| regex_lite::Regex::new(r"^(/api/v1/tasks/)[^/]+").unwrap());

/// Normalize a path for metric labels (replace IDs with placeholders).
pub fn normalize_path(path: &str) -> String {
    let result = UUID_RE.replace_all(path, "{id}");
    let result = TASK_ID_RE.replace(&result, "${1}{id}");
    result.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_uuid() {
        let path = "/api/v1/runners/task-550e8400-e29b-41d4-a716-446655440000";
        assert_eq!(normalize_path(path), "/api/v1/runners/task-{id}");
    }

    #[test]
    fn test_normalize_path_task_id() {
        assert_eq!(normalize_path("/api/v1/tasks/nike-og-1"), "/api/v1/tasks/{id}");
        assert_eq!(normalize_path("/api/v1/tasks"), "/api/v1/tasks");
    }

    #[test]
    fn test_normalize_path_no_ids() {
        let path = "/api/v1/health";
        assert_eq!(normalize_path(path), "/api/v1/health");
    }

    #[test]
    fn test_registry_contains_all_metrics() {
        // Prometheus only outputs metrics that have been touched
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/test", "200"])
            .inc();
        HTTP_REQUEST_DURATION
            .with_label_values(&["GET", "/test", "200"])
            .observe(0.1);
        WS_CONNECTIONS_ACTIVE.set(0);
        WS_MESSAGES_SENT.with_label_values(&["status"]).inc();
        TASKS_RUNNING.set(0);
        cartrunner_core::metrics::TASKS_STARTED.inc();

        let output = encode_metrics();
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
        assert!(output.contains("cartrunner_http_requests_total"));
        assert!(output.contains("cartrunner_http_request_duration_seconds"));
        assert!(output.contains("cartrunner_ws_connections_active"));
        assert!(output.contains("cartrunner_ws_messages_sent_total"));
        assert!(output.contains("cartrunner_tasks_running"));
        assert!(output.contains("cartrunner_tasks_started_total"));
    }
}
