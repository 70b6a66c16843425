//! Product monitors.
//!
//! A monitor watches one storefront target until the product appears,
//! then hands each subscribed task the variants matching its sizes.

mod config;
mod http;
mod matching;
mod parser;
mod runner;
mod types;
mod variants;

pub use config::{MonitorConfig, SortKey};
pub use http::{FeedParser, HttpParserFactory, ProductJsonParser};
pub use matching::{keywords_match, match_keywords, match_url, match_variant};
pub use parser::{ParseRequest, Parser, ParserFactory, ParserSet};
pub use runner::{Monitor, MonitorSettings, Subscribers, Subscription};
pub use types::{MonitorState, ParseFailure, Product, ProductFound, Resolution, Variant};
pub use variants::{resolve_variants, SizeRule};
