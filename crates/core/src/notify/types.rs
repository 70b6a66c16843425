//! Notification types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::task::{Hook, TaskId};

/// Errors from delivering a notification.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Request(String),

    #[error("webhook rejected the message with status {0}")]
    Rejected(u16),
}

/// Terminal checkout result sent to a webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub task_id: TaskId,
    pub success: bool,
    pub site: String,
    pub product: Option<String>,
    pub price: Option<String>,
    pub size: Option<String>,
    pub image: Option<String>,
    /// Order or checkout reference.
    pub order: Option<String>,
    /// Buyer profile name.
    pub profile: String,
    pub message: String,
    /// Milliseconds from task start to outcome.
    pub elapsed_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Delivers outcomes to a hook.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, hook: &Hook, outcome: &Outcome) -> Result<(), NotifyError>;
}
