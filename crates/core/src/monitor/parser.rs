//! Parser abstraction.
//!
//! A parser looks up one product on a storefront. Several interchangeable
//! parsers can be raced for the same request.

use std::sync::Arc;

use async_trait::async_trait;

use super::config::MonitorConfig;
use super::types::{ParseFailure, Product};
use crate::proxy::ProxyLease;
use crate::task::{ProductSelector, Site};

/// Everything a parser needs for one lookup.
#[derive(Debug, Clone)]
pub struct ParseRequest {
    pub site: Site,
    pub selector: ProductSelector,
    pub proxy: Option<ProxyLease>,
    pub config: MonitorConfig,
}

/// A product source.
#[async_trait]
pub trait Parser: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    async fn run(&self, request: &ParseRequest) -> Result<Product, ParseFailure>;
}

/// The parsers a monitor can use for one site.
#[derive(Clone, Default)]
pub struct ParserSet {
    /// Raced for keyword selectors.
    pub feeds: Vec<Arc<dyn Parser>>,
    /// Used for URL selectors.
    pub detail: Option<Arc<dyn Parser>>,
    /// Site-specific adapter. Takes precedence when present.
    pub special: Option<Arc<dyn Parser>>,
}

impl std::fmt::Debug for ParserSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParserSet")
            .field("feeds", &self.feeds.iter().map(|p| p.name().to_string()).collect::<Vec<_>>())
            .field("detail", &self.detail.as_ref().map(|p| p.name().to_string()))
            .field("special", &self.special.as_ref().map(|p| p.name().to_string()))
            .finish()
    }
}

/// Builds the parser set for a site.
pub trait ParserFactory: Send + Sync {
    fn parsers(&self, site: &Site) -> ParserSet;
}
