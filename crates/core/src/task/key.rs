//! Monitor deduplication key.

use std::fmt;

use super::types::{Platform, ProductSelector, Task};

/// Selector reduced to a comparable form.
///
/// Keyword sets are compared as sorted, case-folded sets; URLs
/// case-insensitively; variant ids exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NormalizedSelector {
    Variant(String),
    Url(String),
    Keywords {
        positive: Vec<String>,
        negative: Vec<String>,
    },
}

fn keyword_set(words: &[String]) -> Vec<String> {
    let mut set: Vec<String> = words
        .iter()
        .map(|w| w.trim().to_uppercase())
        .filter(|w| !w.is_empty())
        .collect();
    set.sort();
    set.dedup();
    set
}

fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_lowercase()
}

impl From<&ProductSelector> for NormalizedSelector {
    fn from(selector: &ProductSelector) -> Self {
        match selector {
            ProductSelector::Variant { id } => NormalizedSelector::Variant(id.trim().to_string()),
            ProductSelector::Url { url } => NormalizedSelector::Url(normalize_url(url)),
            ProductSelector::Keywords { positive, negative } => NormalizedSelector::Keywords {
                positive: keyword_set(positive),
                negative: keyword_set(negative),
            },
        }
    }
}

/// Two tasks share a monitor iff their keys are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MonitorKey {
    pub platform: Platform,
    pub site_url: String,
    pub selector: NormalizedSelector,
}

impl MonitorKey {
    pub fn for_task(task: &Task) -> Self {
        Self {
            platform: task.site.platform,
            site_url: normalize_url(&task.site.url),
            selector: NormalizedSelector::from(&task.selector),
        }
    }
}

impl fmt::Display for MonitorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let selector = match &self.selector {
            NormalizedSelector::Variant(id) => format!("variant:{}", id),
            NormalizedSelector::Url(url) => format!("url:{}", url),
            NormalizedSelector::Keywords { positive, negative } => {
                format!("keywords:+{}/-{}", positive.join(","), negative.join(","))
            }
        };
        write!(f, "{}@{}#{}", self.platform.as_str(), self.site_url, selector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Site;

    fn task(url: &str, selector: ProductSelector) -> Task {
        Task {
            id: "t".into(),
            site: Site {
                name: "Shop".into(),
                url: url.into(),
                platform: Platform::Shopify,
                api_key: None,
                captcha_site_key: None,
            },
            selector,
            sizes: vec![],
            random_in_stock: false,
            profile: Default::default(),
            delays: Default::default(),
            hook: None,
            account: None,
            mode: Default::default(),
        }
    }

    fn keywords(pos: &[&str], neg: &[&str]) -> ProductSelector {
        ProductSelector::Keywords {
            positive: pos.iter().map(|s| s.to_string()).collect(),
            negative: neg.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_keyword_order_and_case_do_not_matter() {
        let a = MonitorKey::for_task(&task("https://shop.com", keywords(&["Box", "logo"], &["kids"])));
        let b = MonitorKey::for_task(&task("https://SHOP.com/", keywords(&["LOGO", "box"], &["Kids"])));
        assert_eq!(a, b);
    }

    #[test]
    fn test_negative_keywords_distinguish() {
        let a = MonitorKey::for_task(&task("https://shop.com", keywords(&["box"], &[])));
        let b = MonitorKey::for_task(&task("https://shop.com", keywords(&["box"], &["kids"])));
        assert_ne!(a, b);
    }

    #[test]
    fn test_url_case_insensitive_variant_exact() {
        let a = MonitorKey::for_task(&task(
            "https://shop.com",
            ProductSelector::Url { url: "https://shop.com/products/Tee".into() },
        ));
        let b = MonitorKey::for_task(&task(
            "https://shop.com",
            ProductSelector::Url { url: "HTTPS://SHOP.COM/products/tee".into() },
        ));
        assert_eq!(a, b);

        let v1 = MonitorKey::for_task(&task("https://shop.com", ProductSelector::Variant { id: "123".into() }));
        let v2 = MonitorKey::for_task(&task("https://shop.com", ProductSelector::Variant { id: "1234".into() }));
        assert_ne!(v1, v2);
    }

    #[test]
    fn test_different_sites_never_share() {
        let a = MonitorKey::for_task(&task("https://a.com", keywords(&["box"], &[])));
        let b = MonitorKey::for_task(&task("https://b.com", keywords(&["box"], &[])));
        assert_ne!(a, b);
    }
}
