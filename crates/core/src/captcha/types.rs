//! CAPTCHA broker types.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::handoff::HandoffQueue;

/// A solved CAPTCHA response.
pub type CaptchaToken = String;

/// Signal to the external solver integration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HarvestSignal {
    /// The first runner is waiting on this site key.
    Start { site_key: String, host: String },
    /// Nobody is waiting on this site key any more.
    Stop { site_key: String },
}

/// Where a runner stands with respect to harvesting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HarvestState {
    #[default]
    Idle,
    Started,
    Suspended,
    Stopped,
}

/// One runner waiting for a token.
#[derive(Clone)]
pub struct CaptchaWaiter {
    pub runner_id: String,
    pub site_key: String,
    pub host: String,
    /// Lower values are served first.
    pub priority: u32,
    /// Arrival order, used to break priority ties.
    pub seq: u64,
    pub(crate) queue: Arc<HandoffQueue<CaptchaToken>>,
}

impl std::fmt::Debug for CaptchaWaiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptchaWaiter")
            .field("runner_id", &self.runner_id)
            .field("site_key", &self.site_key)
            .field("host", &self.host)
            .field("priority", &self.priority)
            .field("seq", &self.seq)
            .finish()
    }
}
