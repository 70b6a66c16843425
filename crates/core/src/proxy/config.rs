//! Proxy pool configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the proxy pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Pause between reservation attempts when waiting (milliseconds).
    #[serde(default = "default_retry_interval")]
    pub retry_interval_ms: u64,

    /// Retries granted to a waiting reservation before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// How long a soft ban excludes a proxy from a site (milliseconds).
    /// Hard bans never expire.
    #[serde(default = "default_soft_ban_ttl")]
    pub soft_ban_ttl_ms: u64,

    /// Upper bound on waiting for a replacement proxy during a swap (milliseconds).
    #[serde(default = "default_swap_timeout")]
    pub swap_timeout_ms: u64,

    /// Proxies registered at startup, in any accepted textual form.
    #[serde(default)]
    pub list: Vec<String>,
}

fn default_retry_interval() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    5
}

fn default_soft_ban_ttl() -> u64 {
    30_000
}

fn default_swap_timeout() -> u64 {
    10_000
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: default_retry_interval(),
            max_retries: default_max_retries(),
            soft_ban_ttl_ms: default_soft_ban_ttl(),
            swap_timeout_ms: default_swap_timeout(),
            list: Vec::new(),
        }
    }
}

impl ProxyConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn soft_ban_ttl(&self) -> Duration {
        Duration::from_millis(self.soft_ban_ttl_ms)
    }

    pub fn swap_timeout(&self) -> Duration {
        Duration::from_millis(self.swap_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProxyConfig::default();
        assert_eq!(config.retry_interval_ms, 1000);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.soft_ban_ttl_ms, 30_000);
        assert_eq!(config.swap_timeout(), Duration::from_secs(10));
        assert!(config.list.is_empty());
    }

    #[test]
    fn test_deserialize_partial() {
        let toml = r#"
            max_retries = 2
            list = ["10.0.0.1:8080", "10.0.0.2:8080:user:pass"]
        "#;
        let config: ProxyConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.retry_interval_ms, 1000);
        assert_eq!(config.list.len(), 2);
    }
}
