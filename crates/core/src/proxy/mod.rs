//! Shared pool of egress proxies.
//!
//! Proxies are reserved per site key (site plus platform). A proxy held for
//! one site stays available for every other site, and bans are scoped the
//! same way.

mod config;
mod format;
mod pool;
mod types;

pub use config::ProxyConfig;
pub use format::format_proxy;
pub use pool::ProxyPool;
pub use types::{BanLevel, ProxyError, ProxyLease, ProxySummary, SiteKey};
