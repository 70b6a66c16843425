//! Task data model.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Caller-assigned task identifier.
pub type TaskId = String;

/// Storefront platform. Selects parser and checkout behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    #[default]
    Shopify,
    Supreme,
    Footsites,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Shopify => "shopify",
            Platform::Supreme => "supreme",
            Platform::Footsites => "footsites",
        }
    }
}

/// Target storefront.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub platform: Platform,
    /// Storefront API key. Fetched by the checkout when absent.
    #[serde(default)]
    pub api_key: Option<String>,
    /// CAPTCHA site key used when the storefront challenges the checkout.
    #[serde(default)]
    pub captcha_site_key: Option<String>,
}

/// Which product a task is after.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProductSelector {
    /// Explicit variant id; nothing to discover.
    Variant { id: String },
    /// Direct product URL.
    Url { url: String },
    /// All positive keywords must match, no negative keyword may.
    Keywords {
        #[serde(default)]
        positive: Vec<String>,
        #[serde(default)]
        negative: Vec<String>,
    },
}

impl ProductSelector {
    pub fn kind(&self) -> SelectorKind {
        match self {
            ProductSelector::Variant { .. } => SelectorKind::Variant,
            ProductSelector::Url { .. } => SelectorKind::Url,
            ProductSelector::Keywords { .. } => SelectorKind::Keywords,
        }
    }
}

/// Parse strategy used by a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorKind {
    Variant,
    Url,
    Keywords,
    /// Site-specific scrape adapter.
    Special,
}

impl SelectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectorKind::Variant => "variant",
            SelectorKind::Url => "url",
            SelectorKind::Keywords => "keywords",
            SelectorKind::Special => "special",
        }
    }
}

/// Checkout flow ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutMode {
    /// Wait for the product, then create the checkout.
    #[default]
    Safe,
    /// Create and fill the checkout before the product is known.
    Fast,
}

/// Which delay a `ChangeDelay` event targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayKind {
    Monitor,
    Error,
}

/// Per-task delays in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delays {
    #[serde(default = "default_delay")]
    pub monitor_ms: u64,
    #[serde(default = "default_delay")]
    pub error_ms: u64,
}

fn default_delay() -> u64 {
    3500
}

impl Default for Delays {
    fn default() -> Self {
        Self {
            monitor_ms: default_delay(),
            error_ms: default_delay(),
        }
    }
}

impl Delays {
    pub fn get(&self, kind: DelayKind) -> Duration {
        Duration::from_millis(match kind {
            DelayKind::Monitor => self.monitor_ms,
            DelayKind::Error => self.error_ms,
        })
    }

    pub fn set(&mut self, kind: DelayKind, ms: u64) {
        match kind {
            DelayKind::Monitor => self.monitor_ms = ms,
            DelayKind::Error => self.error_ms = ms,
        }
    }
}

/// Chat service a webhook belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    Discord,
    Slack,
}

/// Notification webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hook {
    pub url: String,
    pub kind: HookKind,
}

/// Storefront account credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub address1: String,
    #[serde(default)]
    pub address2: Option<String>,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub province: String,
    #[serde(default)]
    pub zip: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub phone: String,
}

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    #[serde(default)]
    pub holder: String,
    #[serde(default)]
    pub number: String,
    #[serde(default)]
    pub exp_month: String,
    #[serde(default)]
    pub exp_year: String,
    #[serde(default)]
    pub cvv: String,
}

impl std::fmt::Debug for Payment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let last4 = self
            .number
            .get(self.number.len().saturating_sub(4)..)
            .unwrap_or_default();
        f.debug_struct("Payment")
            .field("holder", &self.holder)
            .field("number", &format!("****{}", last4))
            .finish()
    }
}

/// Buyer profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub shipping: Address,
    /// `None` bills to the shipping address.
    #[serde(default)]
    pub billing: Option<Address>,
    #[serde(default)]
    pub payment: Payment,
}

impl Profile {
    pub fn billing_address(&self) -> &Address {
        self.billing.as_ref().unwrap_or(&self.shipping)
    }
}

/// A purchase intent. Immutable until the caller restarts it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub site: Site,
    pub selector: ProductSelector,
    /// Requested sizes in preference order. `"Random"` picks any group.
    #[serde(default)]
    pub sizes: Vec<String>,
    /// Fall back to a random in-stock variant when the requested size is sold out.
    #[serde(default)]
    pub random_in_stock: bool,
    #[serde(default)]
    pub profile: Profile,
    #[serde(default)]
    pub delays: Delays,
    #[serde(default)]
    pub hook: Option<Hook>,
    #[serde(default)]
    pub account: Option<Account>,
    #[serde(default)]
    pub mode: CheckoutMode,
}

impl Task {
    pub fn delay(&self, kind: DelayKind) -> Duration {
        self.delays.get(kind)
    }

    pub fn platform(&self) -> &'static str {
        self.site.platform.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_minimal_task() {
        let json = r#"{
            "id": "t1",
            "site": { "name": "Kith", "url": "https://kith.com" },
            "selector": { "type": "keywords", "positive": ["yeezy"], "negative": ["kids"] }
        }"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.site.platform, Platform::Shopify);
        assert_eq!(task.selector.kind(), SelectorKind::Keywords);
        assert_eq!(task.delays, Delays::default());
        assert_eq!(task.mode, CheckoutMode::Safe);
        assert!(task.sizes.is_empty());
    }

    #[test]
    fn test_delays_set_and_get() {
        let mut delays = Delays::default();
        delays.set(DelayKind::Error, 100);
        assert_eq!(delays.get(DelayKind::Error), Duration::from_millis(100));
        assert_eq!(delays.get(DelayKind::Monitor), Duration::from_millis(3500));
    }

    #[test]
    fn test_payment_debug_redacts_number() {
        let payment = Payment {
            number: "4111111111111111".into(),
            ..Default::default()
        };
        let debug = format!("{:?}", payment);
        assert!(debug.contains("****1111"));
        assert!(!debug.contains("4111111111111111"));
    }

    #[test]
    fn test_billing_falls_back_to_shipping() {
        let profile = Profile {
            shipping: Address {
                city: "Rome".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(profile.billing_address().city, "Rome");
    }
}
