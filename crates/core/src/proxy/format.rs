//! Normalization of user-supplied proxy strings.

/// Convert a proxy string into a connection URL.
///
/// Accepted forms:
/// - `ip:port`
/// - `ip:port:user:pass`
/// - `scheme://ip:port`
/// - `scheme://ip:port:user:pass`
///
/// Returns `None` for empty, loopback or malformed input.
pub fn format_proxy(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let (scheme, rest) = match raw.split_once("://") {
        Some((scheme, rest)) if !scheme.is_empty() => (scheme.to_ascii_lowercase(), rest),
        Some(_) => return None,
        None => ("http".to_string(), raw),
    };

    let parts: Vec<&str> = rest.split(':').collect();
    let (host, port, credentials) = match parts.as_slice() {
        [host, port] => (*host, *port, None),
        [host, port, user, pass] => (*host, *port, Some((*user, *pass))),
        _ => return None,
    };

    // Subnet notation may carry stray slashes around the host.
    let host = host.trim_matches('/');
    let port = port.trim_end_matches('/');
    if host.is_empty() || is_loopback(host) {
        return None;
    }
    let port: u16 = port.parse().ok()?;

    match credentials {
        Some((user, pass)) if !user.is_empty() => {
            Some(format!("{}://{}:{}@{}:{}", scheme, user, pass, host, port))
        }
        Some(_) => None,
        None => Some(format!("{}://{}:{}", scheme, host, port)),
    }
}

fn is_loopback(host: &str) -> bool {
    host.starts_with("127.") || host.eq_ignore_ascii_case("localhost")
}
