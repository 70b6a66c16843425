//! Failure taxonomy shared by the monitor and checkout runners.
//!
//! Classification is a pure function of what came back from the network;
//! the runners decide the resulting transition.

use serde::{Deserialize, Serialize};

use crate::proxy::BanLevel;

/// Low-level transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkErrorKind {
    Reset,
    Timeout,
    Refused,
    Dns,
    Other,
}

impl NetworkErrorKind {
    /// Best-effort mapping of a reqwest error.
    pub fn from_reqwest(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            return NetworkErrorKind::Timeout;
        }
        let text = error.to_string().to_lowercase();
        if text.contains("dns") || text.contains("resolve") {
            NetworkErrorKind::Dns
        } else if text.contains("refused") {
            NetworkErrorKind::Refused
        } else if text.contains("reset") || error.is_connect() {
            NetworkErrorKind::Reset
        } else {
            NetworkErrorKind::Other
        }
    }
}

/// Where a failure sits in the retry/ban policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Connection reset, timeout, refused, DNS. Retry after the error delay.
    RetryableNetwork,
    /// HTTP 429/430. Soft ban and swap.
    RateLimited,
    /// HTTP 403. Hard ban and swap.
    Blocked,
    /// HTTP 303 or a throttle redirect. Poll the queue.
    Queue,
    /// HTTP 5xx. Retry after the error delay.
    ServerError,
    NotFound,
    NotLive,
    PasswordWall,
    /// Requested size does not exist. Fatal for the task.
    SelectorUnsatisfiable,
    /// Requested size exists but is sold out. Wait for restock.
    OutOfStock,
    /// Abort observed. Wins over everything else.
    Cancelled,
    /// Anything not covered above.
    Unexpected,
}

impl FailureClass {
    /// Ban to apply to the current proxy for this site.
    pub fn ban_level(&self) -> BanLevel {
        match self {
            FailureClass::RateLimited => BanLevel::Soft,
            FailureClass::Blocked => BanLevel::Hard,
            _ => BanLevel::None,
        }
    }

    /// Whether the runner should move to its proxy-swap state.
    pub fn requires_swap(&self) -> bool {
        self.ban_level() > BanLevel::None
    }

    /// Ordering used when several failures compete, highest first.
    pub fn severity(&self) -> u8 {
        match self {
            FailureClass::Cancelled => 10,
            FailureClass::Blocked => 9,
            FailureClass::RateLimited => 8,
            FailureClass::SelectorUnsatisfiable => 7,
            FailureClass::PasswordWall => 6,
            FailureClass::Queue => 5,
            FailureClass::NotLive => 4,
            FailureClass::OutOfStock => 3,
            FailureClass::NotFound => 2,
            FailureClass::ServerError | FailureClass::RetryableNetwork => 1,
            FailureClass::Unexpected => 0,
        }
    }
}

/// Classify an HTTP status. `None` means the status is not a failure.
pub fn classify_status(status: u16) -> Option<FailureClass> {
    match status {
        429 | 430 => Some(FailureClass::RateLimited),
        403 => Some(FailureClass::Blocked),
        303 => Some(FailureClass::Queue),
        401 => Some(FailureClass::PasswordWall),
        404 => Some(FailureClass::NotFound),
        s if s >= 500 => Some(FailureClass::ServerError),
        _ => None,
    }
}

/// Where a storefront redirect points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectClass {
    Password,
    Queue,
    Challenge,
    StockProblems,
    Processing,
    Complete,
    Other,
}

/// Classify a redirect target by its path.
pub fn classify_redirect(location: &str) -> RedirectClass {
    let location = location.to_lowercase();
    if location.contains("/password") {
        RedirectClass::Password
    } else if location.contains("throttle") || location.contains("/queue") {
        RedirectClass::Queue
    } else if location.contains("checkpoint") || location.contains("challenge") {
        RedirectClass::Challenge
    } else if location.contains("stock_problems") {
        RedirectClass::StockProblems
    } else if location.contains("processing") {
        RedirectClass::Processing
    } else if location.contains("thank_you") || location.contains("/orders/") {
        RedirectClass::Complete
    } else {
        RedirectClass::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classes() {
        assert_eq!(classify_status(200), None);
        assert_eq!(classify_status(302), None);
        assert_eq!(classify_status(429), Some(FailureClass::RateLimited));
        assert_eq!(classify_status(430), Some(FailureClass::RateLimited));
        assert_eq!(classify_status(403), Some(FailureClass::Blocked));
        assert_eq!(classify_status(303), Some(FailureClass::Queue));
        assert_eq!(classify_status(503), Some(FailureClass::ServerError));
    }

    #[test]
    fn test_ban_levels() {
        assert_eq!(FailureClass::RateLimited.ban_level(), BanLevel::Soft);
        assert_eq!(FailureClass::Blocked.ban_level(), BanLevel::Hard);
        assert_eq!(FailureClass::RetryableNetwork.ban_level(), BanLevel::None);
        assert!(!FailureClass::OutOfStock.requires_swap());
    }

    #[test]
    fn test_cancellation_outranks_everything() {
        let all = [
            FailureClass::RetryableNetwork,
            FailureClass::RateLimited,
            FailureClass::Blocked,
            FailureClass::Queue,
            FailureClass::ServerError,
            FailureClass::NotFound,
            FailureClass::NotLive,
            FailureClass::PasswordWall,
            FailureClass::SelectorUnsatisfiable,
            FailureClass::OutOfStock,
            FailureClass::Unexpected,
        ];
        assert!(all
            .iter()
            .all(|c| c.severity() < FailureClass::Cancelled.severity()));
    }

    #[test]
    fn test_redirect_classes() {
        assert_eq!(classify_redirect("https://s.com/password"), RedirectClass::Password);
        assert_eq!(classify_redirect("https://s.com/throttle/queue?_ctd=1"), RedirectClass::Queue);
        assert_eq!(
            classify_redirect("https://s.com/checkpoint?return_to=x"),
            RedirectClass::Challenge
        );
        assert_eq!(
            classify_redirect("https://s.com/1/checkouts/abc/stock_problems"),
            RedirectClass::StockProblems
        );
        assert_eq!(
            classify_redirect("https://s.com/1/checkouts/abc/processing"),
            RedirectClass::Processing
        );
        assert_eq!(
            classify_redirect("https://s.com/1/checkouts/abc/thank_you"),
            RedirectClass::Complete
        );
        assert_eq!(classify_redirect("https://s.com/cart"), RedirectClass::Other);
    }
}
