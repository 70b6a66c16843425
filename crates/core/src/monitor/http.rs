//! Storefront JSON parsers over HTTP.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::matching::{match_keywords, match_url, match_variant};
use super::parser::{ParseRequest, Parser, ParserFactory, ParserSet};
use super::types::{ParseFailure, Product, Variant};
use crate::failure::NetworkErrorKind;
use crate::proxy::ProxyLease;
use crate::task::{ProductSelector, Site};

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

fn network(error: reqwest::Error) -> ParseFailure {
    ParseFailure::Network {
        kind: NetworkErrorKind::from_reqwest(&error),
    }
}

/// Build a client that egresses through `proxy`.
fn client_for(proxy: Option<&ProxyLease>, timeout: Duration) -> Result<Client, ParseFailure> {
    let mut builder = Client::builder().timeout(timeout).user_agent(USER_AGENT);
    if let Some(lease) = proxy {
        let proxy = reqwest::Proxy::all(&lease.url)
            .map_err(|e| ParseFailure::Other(format!("invalid proxy {}: {}", lease.display_host(), e)))?;
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|e| ParseFailure::Other(format!("failed to build client: {}", e)))
}

async fn fetch_json(client: &Client, url: &str) -> Result<Value, ParseFailure> {
    debug!("Fetching {}", url);
    let response = client.get(url).send().await.map_err(network)?;

    if response.url().path().starts_with("/password") {
        return Err(ParseFailure::PasswordPage);
    }
    let status = response.status().as_u16();
    match status {
        200..=299 => {}
        401 => return Err(ParseFailure::PasswordPage),
        404 => return Err(ParseFailure::ProductMissing),
        s => return Err(ParseFailure::Status(s)),
    }

    response
        .json()
        .await
        .map_err(|e| ParseFailure::Other(format!("invalid JSON from {}: {}", url, e)))
}

#[derive(Debug, Deserialize)]
struct RawImage {
    #[serde(default)]
    src: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawVariant {
    id: Value,
    #[serde(default)]
    title: String,
    #[serde(default)]
    price: Value,
    #[serde(default = "default_available")]
    available: bool,
    #[serde(default)]
    option1: Option<String>,
    #[serde(default)]
    option2: Option<String>,
    #[serde(default)]
    option3: Option<String>,
}

fn default_available() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RawProduct {
    #[serde(default)]
    title: String,
    #[serde(default)]
    handle: String,
    #[serde(default)]
    images: Vec<Value>,
    #[serde(default)]
    featured_image: Option<String>,
    #[serde(default)]
    variants: Vec<RawVariant>,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    published_at: Option<String>,
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn timestamp(raw: &Option<String>) -> Option<DateTime<Utc>> {
    raw.as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

impl RawProduct {
    fn into_product(self, site_url: &str) -> Product {
        let image = self.featured_image.clone().or_else(|| {
            self.images.first().and_then(|img| match img {
                Value::String(s) => Some(s.clone()),
                other => serde_json::from_value::<RawImage>(other.clone()).ok().and_then(|i| i.src),
            })
        });
        Product {
            url: Some(format!("{}/products/{}", site_url.trim_end_matches('/'), self.handle)),
            image,
            updated_at: timestamp(&self.updated_at),
            created_at: timestamp(&self.created_at),
            published_at: timestamp(&self.published_at),
            variants: self
                .variants
                .into_iter()
                .filter_map(|v| {
                    Some(Variant {
                        id: scalar(&v.id)?,
                        title: v.title,
                        price: scalar(&v.price),
                        available: v.available,
                        option1: v.option1,
                        option2: v.option2,
                        option3: v.option3,
                        option4: None,
                    })
                })
                .collect(),
            title: self.title,
            handle: self.handle,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Feed {
    #[serde(default)]
    products: Vec<RawProduct>,
}

/// Parses a storefront product feed such as `/products.json`.
pub struct FeedParser {
    name: String,
    path: String,
    timeout: Duration,
}

impl FeedParser {
    pub fn new(path: impl Into<String>, timeout: Duration) -> Self {
        let path = path.into();
        Self {
            name: format!("feed:{}", path),
            path,
            timeout,
        }
    }
}

#[async_trait]
impl Parser for FeedParser {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, request: &ParseRequest) -> Result<Product, ParseFailure> {
        let client = client_for(request.proxy.as_ref(), self.timeout)?;
        let base = request.site.url.trim_end_matches('/');
        let url = format!("{}{}?limit=250", base, self.path);

        let body = fetch_json(&client, &url).await?;
        let feed: Feed = serde_json::from_value(body)
            .map_err(|e| ParseFailure::Other(format!("invalid feed from {}: {}", url, e)))?;
        let products: Vec<Product> = feed
            .products
            .into_iter()
            .map(|p| p.into_product(base))
            .collect();

        let found = match &request.selector {
            ProductSelector::Keywords { positive, negative } => {
                match_keywords(&products, positive, negative, &request.config)
            }
            ProductSelector::Variant { id } => match_variant(&products, id),
            ProductSelector::Url { url } => match_url(&products, url),
        };
        found.ok_or(ParseFailure::ProductMissing)
    }
}

/// Parses a single product's `.js` detail document.
pub struct ProductJsonParser {
    timeout: Duration,
}

impl ProductJsonParser {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Parser for ProductJsonParser {
    fn name(&self) -> &str {
        "product_json"
    }

    async fn run(&self, request: &ParseRequest) -> Result<Product, ParseFailure> {
        let ProductSelector::Url { url } = &request.selector else {
            return Err(ParseFailure::Other("detail lookup needs a product URL".into()));
        };
        let client = client_for(request.proxy.as_ref(), self.timeout)?;
        let base = url.split(['?', '#']).next().unwrap_or_default().trim_end_matches('/');
        let detail_url = format!("{}.js", base);

        let body = fetch_json(&client, &detail_url).await?;
        let raw: RawProduct = serde_json::from_value(body)
            .map_err(|e| ParseFailure::Other(format!("invalid product from {}: {}", detail_url, e)))?;
        let product = raw.into_product(&request.site.url);
        if product.variants.is_empty() {
            return Err(ParseFailure::ProductNotLive);
        }
        Ok(product)
    }
}

/// Default parser set: both product feeds plus the detail parser.
#[derive(Debug, Clone)]
pub struct HttpParserFactory {
    timeout: Duration,
}

impl HttpParserFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ParserFactory for HttpParserFactory {
    fn parsers(&self, _site: &Site) -> ParserSet {
        ParserSet {
            feeds: vec![
                Arc::new(FeedParser::new("/products.json", self.timeout)),
                Arc::new(FeedParser::new("/collections/all/products.json", self.timeout)),
            ],
            detail: Some(Arc::new(ProductJsonParser::new(self.timeout))),
            special: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_conversion() {
        let json = r#"{
            "products": [{
                "id": 1,
                "title": "Box Logo Hoodie",
                "handle": "box-logo-hoodie",
                "updated_at": "2024-05-01T10:00:00-04:00",
                "images": [{"src": "https://cdn.example/1.jpg"}],
                "variants": [
                    {"id": 11, "title": "S", "price": "148.00", "available": true, "option1": "S"},
                    {"id": 12, "title": "M", "price": "148.00", "available": false, "option1": "M"}
                ]
            }]
        }"#;
        let feed: Feed = serde_json::from_str(json).unwrap();
        let product = feed
            .products
            .into_iter()
            .next()
            .unwrap()
            .into_product("https://shop.example/");

        assert_eq!(product.url.as_deref(), Some("https://shop.example/products/box-logo-hoodie"));
        assert_eq!(product.image.as_deref(), Some("https://cdn.example/1.jpg"));
        assert_eq!(product.variants.len(), 2);
        assert_eq!(product.variants[0].id, "11");
        assert_eq!(product.variants[0].price.as_deref(), Some("148.00"));
        assert!(!product.variants[1].available);
        assert!(product.updated_at.is_some());
    }

    #[test]
    fn test_detail_conversion_with_cent_prices() {
        let json = r#"{
            "title": "Tee",
            "handle": "tee",
            "featured_image": "//cdn.example/tee.jpg",
            "variants": [{"id": 7, "title": "9 / Black", "price": 4000}]
        }"#;
        let raw: RawProduct = serde_json::from_str(json).unwrap();
        let product = raw.into_product("https://shop.example");

        assert_eq!(product.variants[0].price.as_deref(), Some("4000"));
        assert!(product.variants[0].available);
        assert_eq!(product.image.as_deref(), Some("//cdn.example/tee.jpg"));
    }

    #[test]
    fn test_factory_builds_two_feeds() {
        let set = HttpParserFactory::new(Duration::from_secs(5)).parsers(&crate::testing::fixtures::site());
        assert_eq!(set.feeds.len(), 2);
        assert_eq!(set.feeds[0].name(), "feed:/products.json");
        assert!(set.detail.is_some());
        assert!(set.special.is_none());
    }
}
