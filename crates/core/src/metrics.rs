//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Task lifecycle (starts, terminal outcomes)
//! - Monitors (active groups, parse attempts)
//! - Proxy pool (reservations, bans)
//! - CAPTCHA broker and checkout transitions

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Tasks
// =============================================================================

/// Tasks started total.
pub static TASKS_STARTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("cartrunner_tasks_started_total", "Total tasks started").unwrap()
});

/// Tasks finished total by terminal outcome.
pub static TASKS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("cartrunner_tasks_finished_total", "Total tasks that reached a terminal state"),
        &["outcome"], // "done", "error", "abort"
    )
    .unwrap()
});

/// Runner state transitions by runner kind and destination state.
pub static STATE_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "cartrunner_state_transitions_total",
            "Total runner state transitions",
        ),
        &["runner", "state"], // runner: "task", "monitor"
    )
    .unwrap()
});

/// Checkout step latency in seconds.
pub static CHECKOUT_STEP_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "cartrunner_checkout_step_duration_seconds",
            "Duration of a single checkout step exchange",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["step"],
    )
    .unwrap()
});

// =============================================================================
// Monitors
// =============================================================================

/// Monitor groups currently alive.
pub static MONITORS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("cartrunner_monitors_active", "Monitor groups currently running").unwrap()
});

/// Parse rounds by result.
pub static MONITOR_PARSES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("cartrunner_monitor_parses_total", "Total monitor parse rounds"),
        &["result"], // "found", "not_found", "swap", "error"
    )
    .unwrap()
});

// =============================================================================
// Proxies
// =============================================================================

/// Reservation attempts by result.
pub static PROXY_RESERVATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "cartrunner_proxy_reservations_total",
            "Total proxy reservation attempts",
        ),
        &["result"], // "granted", "exhausted"
    )
    .unwrap()
});

/// Bans applied by level.
pub static PROXY_BANS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("cartrunner_proxy_bans_total", "Total proxy bans applied"),
        &["level"], // "soft", "hard"
    )
    .unwrap()
});

// =============================================================================
// CAPTCHA
// =============================================================================

/// Tokens handed to a waiting runner.
pub static CAPTCHA_TOKENS_DELIVERED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "cartrunner_captcha_tokens_delivered_total",
        "Total CAPTCHA tokens delivered to runners",
    )
    .unwrap()
});

/// Tokens that arrived with nobody waiting.
pub static CAPTCHA_TOKENS_DROPPED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "cartrunner_captcha_tokens_dropped_total",
        "Total CAPTCHA tokens received with no waiter",
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(TASKS_STARTED.clone()),
        Box::new(TASKS_FINISHED.clone()),
        Box::new(STATE_TRANSITIONS.clone()),
        Box::new(CHECKOUT_STEP_DURATION.clone()),
        Box::new(MONITORS_ACTIVE.clone()),
        Box::new(MONITOR_PARSES.clone()),
        Box::new(PROXY_RESERVATIONS.clone()),
        Box::new(PROXY_BANS.clone()),
        Box::new(CAPTCHA_TOKENS_DELIVERED.clone()),
        Box::new(CAPTCHA_TOKENS_DROPPED.clone()),
    ]
}
