//! Proxy pool types.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

/// Errors from proxy pool operations.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The raw string is empty, loopback or not a recognised proxy form.
    #[error("invalid proxy: {0}")]
    Invalid(String),
}

/// Severity of a per-site ban.
///
/// Ordered so that a stronger ban compares greater.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum BanLevel {
    #[default]
    None,
    /// Rate-limit signal. Lifts after the configured TTL.
    Soft,
    /// Access denied. Persists until the proxy is deregistered.
    Hard,
}

impl BanLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            BanLevel::None => "none",
            BanLevel::Soft => "soft",
            BanLevel::Hard => "hard",
        }
    }
}

impl From<u8> for BanLevel {
    fn from(code: u8) -> Self {
        match code {
            0 => BanLevel::None,
            1 => BanLevel::Soft,
            _ => BanLevel::Hard,
        }
    }
}

/// The unit a reservation or ban is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SiteKey {
    pub site: String,
    pub platform: String,
}

impl SiteKey {
    pub fn new(site: &str, platform: &str) -> Self {
        Self {
            site: site.trim().trim_end_matches('/').to_ascii_lowercase(),
            platform: platform.trim().to_ascii_lowercase(),
        }
    }
}

impl fmt::Display for SiteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.platform, self.site)
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Ban {
    pub level: BanLevel,
    pub since: Instant,
}

/// A registered proxy and its per-site bookkeeping.
#[derive(Debug, Clone)]
pub(crate) struct ProxyRecord {
    pub id: String,
    pub hash: String,
    pub raw: String,
    pub url: String,
    /// Site key → holder id.
    pub in_use: HashMap<SiteKey, String>,
    pub bans: HashMap<SiteKey, Ban>,
}

impl ProxyRecord {
    /// Drop soft bans older than `soft_ttl`.
    pub fn expire_bans(&mut self, soft_ttl: Duration) {
        self.bans
            .retain(|_, ban| !(ban.level == BanLevel::Soft && ban.since.elapsed() >= soft_ttl));
    }

    pub fn ban_level(&self, key: &SiteKey) -> BanLevel {
        self.bans.get(key).map(|b| b.level).unwrap_or_default()
    }

    pub fn is_available(&self, key: &SiteKey) -> bool {
        !self.in_use.contains_key(key) && self.ban_level(key) == BanLevel::None
    }

    pub fn lease(&self) -> ProxyLease {
        ProxyLease {
            id: self.id.clone(),
            raw: self.raw.clone(),
            url: self.url.clone(),
        }
    }
}

/// What a runner holds after a successful reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyLease {
    pub id: String,
    pub raw: String,
    /// Normalized connection URL.
    pub url: String,
}

impl ProxyLease {
    /// Host and port without scheme or credentials, for status messages.
    pub fn display_host(&self) -> &str {
        let rest = self.url.split_once("://").map(|(_, r)| r).unwrap_or(&self.url);
        rest.rsplit_once('@').map(|(_, h)| h).unwrap_or(rest)
    }
}

/// Read-only view of a proxy for the API (credentials stripped).
#[derive(Debug, Clone, Serialize)]
pub struct ProxySummary {
    pub id: String,
    pub host: String,
    pub in_use: Vec<String>,
    pub bans: Vec<(String, BanLevel)>,
}

impl From<&ProxyRecord> for ProxySummary {
    fn from(record: &ProxyRecord) -> Self {
        let mut in_use: Vec<String> = record.in_use.keys().map(|k| k.to_string()).collect();
        in_use.sort();
        let mut bans: Vec<(String, BanLevel)> = record
            .bans
            .iter()
            .map(|(k, b)| (k.to_string(), b.level))
            .collect();
        bans.sort();
        Self {
            id: record.id.clone(),
            host: record.lease().display_host().to_string(),
            in_use,
            bans,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ban_level_from_code() {
        assert_eq!(BanLevel::from(0), BanLevel::None);
        assert_eq!(BanLevel::from(1), BanLevel::Soft);
        assert_eq!(BanLevel::from(2), BanLevel::Hard);
        assert!(BanLevel::Hard > BanLevel::Soft);
    }

    #[test]
    fn test_site_key_normalized() {
        let a = SiteKey::new("https://Kith.com/", "Shopify");
        let b = SiteKey::new("https://kith.com", "shopify");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "shopify|https://kith.com");
    }

    #[test]
    fn test_lease_display_host_hides_credentials() {
        let lease = ProxyLease {
            id: "p1".into(),
            raw: "1.2.3.4:80:u:p".into(),
            url: "http://u:p@1.2.3.4:80".into(),
        };
        assert_eq!(lease.display_host(), "1.2.3.4:80");
    }
}
