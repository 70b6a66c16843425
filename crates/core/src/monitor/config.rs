//! Monitor configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Product timestamp used to rank keyword matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    UpdatedAt,
    CreatedAt,
    PublishedAt,
}

/// Configuration for monitors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Most recent first by this timestamp when several products match.
    #[serde(default)]
    pub sort: SortKey,

    /// How many ranked matches to keep. The first one is used.
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Per-parser request timeout (milliseconds).
    #[serde(default = "default_parser_timeout")]
    pub parser_timeout_ms: u64,
}

fn default_limit() -> usize {
    1
}

fn default_parser_timeout() -> u64 {
    10_000
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sort: SortKey::default(),
            limit: default_limit(),
            parser_timeout_ms: default_parser_timeout(),
        }
    }
}

impl MonitorConfig {
    pub fn parser_timeout(&self) -> Duration {
        Duration::from_millis(self.parser_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: MonitorConfig = toml::from_str("").unwrap();
        assert_eq!(config.sort, SortKey::UpdatedAt);
        assert_eq!(config.limit, 1);
        assert_eq!(config.parser_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_custom_sort() {
        let config: MonitorConfig = toml::from_str(
            r#"
            sort = "published_at"
            limit = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.sort, SortKey::PublishedAt);
        assert_eq!(config.limit, 3);
    }
}
