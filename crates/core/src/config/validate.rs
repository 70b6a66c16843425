use std::collections::HashSet;

use super::{types::Config, ConfigError};
use crate::manager::site_key;

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Proxy retry settings and swap timeout are not 0
/// - Every site has a name and a URL, and no URL appears twice
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Server validation
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    let proxies = &config.proxies;
    if proxies.max_retries == 0 {
        return Err(ConfigError::ValidationError(
            "proxies.max_retries cannot be 0".to_string(),
        ));
    }
    if proxies.retry_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "proxies.retry_interval_ms cannot be 0".to_string(),
        ));
    }
    if proxies.swap_timeout_ms == 0 {
        return Err(ConfigError::ValidationError(
            "proxies.swap_timeout_ms cannot be 0".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for (i, site) in config.sites.iter().enumerate() {
        if site.name.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "sites[{}].name cannot be empty",
                i
            )));
        }
        if site.url.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "sites[{}].url cannot be empty",
                i
            )));
        }
        if !seen.insert(site_key(&site.url)) {
            return Err(ConfigError::ValidationError(format!(
                "sites[{}]: duplicate url {}",
                i, site.url
            )));
        }
    }

    Ok(())
}
