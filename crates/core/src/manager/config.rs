//! Runner defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::checkout::CheckoutSettings;
use crate::task::Delays;

/// Timing defaults shared by every runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Monitor delay for tasks that keep the built-in default.
    #[serde(default = "default_delay")]
    pub monitor_delay_ms: u64,

    /// Error delay for tasks that keep the built-in default.
    #[serde(default = "default_delay")]
    pub error_delay_ms: u64,

    /// How often a runner waiting on a CAPTCHA checks for its token.
    #[serde(default = "default_poll")]
    pub captcha_poll_ms: u64,

    /// How often a checkout re-checks for the monitor's product.
    #[serde(default = "default_poll")]
    pub wait_for_product_poll_ms: u64,

    /// Queue poll interval when the storefront gives no retry hint.
    #[serde(default = "default_queue_retry")]
    pub queue_retry_ms: u64,

    /// Per-request timeout for storefront and webhook calls.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Capacity of the status broadcast channel.
    #[serde(default = "default_status_buffer")]
    pub status_buffer: usize,
}

fn default_delay() -> u64 {
    3500
}

fn default_poll() -> u64 {
    500
}

fn default_queue_retry() -> u64 {
    2500
}

fn default_request_timeout() -> u64 {
    15000
}

fn default_status_buffer() -> usize {
    1024
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            monitor_delay_ms: default_delay(),
            error_delay_ms: default_delay(),
            captcha_poll_ms: default_poll(),
            wait_for_product_poll_ms: default_poll(),
            queue_retry_ms: default_queue_retry(),
            request_timeout_ms: default_request_timeout(),
            status_buffer: default_status_buffer(),
        }
    }
}

impl RunnerConfig {
    pub fn default_delays(&self) -> Delays {
        Delays {
            monitor_ms: self.monitor_delay_ms,
            error_ms: self.error_delay_ms,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn checkout_settings(&self, swap_timeout: Duration) -> CheckoutSettings {
        CheckoutSettings {
            captcha_poll: Duration::from_millis(self.captcha_poll_ms),
            wait_for_product_poll: Duration::from_millis(self.wait_for_product_poll_ms),
            queue_retry: Duration::from_millis(self.queue_retry_ms),
            swap_timeout,
        }
    }
}
