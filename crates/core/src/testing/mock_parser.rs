//! Mock parsers for testing.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::monitor::{ParseFailure, ParseRequest, Parser, ParserFactory, ParserSet, Product};
use crate::task::Site;

/// Mock implementation of the Parser trait.
///
/// Plays back queued results in order. Once the queue is empty every call
/// reports the product as missing.
pub struct MockParser {
    name: String,
    latency: Option<Duration>,
    results: Mutex<VecDeque<Result<Product, ParseFailure>>>,
    calls: Mutex<Vec<ParseRequest>>,
}

impl std::fmt::Debug for MockParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockParser")
            .field("name", &self.name)
            .field("latency", &self.latency)
            .finish()
    }
}

impl MockParser {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            latency: None,
            results: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Sleep this long before answering each call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Queue the result for the next call.
    pub async fn push(&self, result: Result<Product, ParseFailure>) {
        self.results.lock().await.push_back(result);
    }

    /// Number of calls so far.
    pub async fn calls(&self) -> usize {
        self.calls.lock().await.len()
    }

    /// Every request seen so far.
    pub async fn requests(&self) -> Vec<ParseRequest> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl Parser for MockParser {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, request: &ParseRequest) -> Result<Product, ParseFailure> {
        self.calls.lock().await.push(request.clone());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.results
            .lock()
            .await
            .pop_front()
            .unwrap_or(Err(ParseFailure::ProductMissing))
    }
}

/// Hands every site the same pair of mock parsers.
#[derive(Debug)]
pub struct MockParserFactory {
    feed: Arc<MockParser>,
    detail: Arc<MockParser>,
}

impl Default for MockParserFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl MockParserFactory {
    pub fn new() -> Self {
        Self {
            feed: Arc::new(MockParser::new("feed")),
            detail: Arc::new(MockParser::new("detail")),
        }
    }

    /// Parser used for keyword and variant selectors.
    pub fn feed(&self) -> &Arc<MockParser> {
        &self.feed
    }

    /// Parser used for URL selectors.
    pub fn detail(&self) -> &Arc<MockParser> {
        &self.detail
    }
}

impl ParserFactory for MockParserFactory {
    fn parsers(&self, _site: &Site) -> ParserSet {
        ParserSet {
            feeds: vec![Arc::clone(&self.feed) as Arc<dyn Parser>],
            detail: Some(Arc::clone(&self.detail) as Arc<dyn Parser>),
            special: None,
        }
    }
}
