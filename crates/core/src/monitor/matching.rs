//! Product matching against selectors.

use super::config::{MonitorConfig, SortKey};
use super::types::Product;

fn normalized_handle(handle: &str) -> String {
    handle.replace('-', " ").to_uppercase()
}

fn contains_keyword(title: &str, handle: &str, keyword: &str) -> bool {
    let keyword = keyword.trim().to_uppercase();
    !keyword.is_empty() && (title.contains(&keyword) || handle.contains(&keyword))
}

/// Whether `product` satisfies the keyword sets.
///
/// Every positive keyword must appear in the title or the handle, and no
/// negative keyword may. Comparison is case-insensitive.
pub fn keywords_match(product: &Product, positive: &[String], negative: &[String]) -> bool {
    if positive.iter().all(|k| k.trim().is_empty()) {
        return false;
    }
    let title = product.title.to_uppercase();
    let handle = normalized_handle(&product.handle);

    positive
        .iter()
        .filter(|k| !k.trim().is_empty())
        .all(|k| contains_keyword(&title, &handle, k))
        && !negative.iter().any(|k| contains_keyword(&title, &handle, k))
}

fn sort_value(product: &Product, key: SortKey) -> Option<chrono::DateTime<chrono::Utc>> {
    match key {
        SortKey::UpdatedAt => product.updated_at,
        SortKey::CreatedAt => product.created_at,
        SortKey::PublishedAt => product.published_at,
    }
}

/// Pick the best keyword match from a feed.
///
/// Matches are ranked most recent first by the configured timestamp and
/// cut to `limit`; the head of the list wins.
pub fn match_keywords(
    products: &[Product],
    positive: &[String],
    negative: &[String],
    config: &MonitorConfig,
) -> Option<Product> {
    let mut matches: Vec<&Product> = products
        .iter()
        .filter(|p| keywords_match(p, positive, negative))
        .collect();

    // Stable sort keeps feed order among equal timestamps.
    matches.sort_by(|a, b| sort_value(b, config.sort).cmp(&sort_value(a, config.sort)));
    matches.truncate(config.limit.max(1));
    matches.first().map(|p| (*p).clone())
}

/// Find the product in a feed that carries variant `id`.
pub fn match_variant(products: &[Product], id: &str) -> Option<Product> {
    products
        .iter()
        .find(|p| p.variants.iter().any(|v| v.id == id))
        .cloned()
}

/// Find the product in a feed whose handle ends the given URL.
pub fn match_url(products: &[Product], url: &str) -> Option<Product> {
    let handle = url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .to_lowercase();
    products
        .iter()
        .find(|p| !handle.is_empty() && p.handle.to_lowercase() == handle)
        .cloned()
}
