//! Types for the task manager.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::config::RunnerConfig;
use crate::captcha::CaptchaBroker;
use crate::checkout::CheckoutGateway;
use crate::monitor::{MonitorSettings, ParserFactory, SizeRule};
use crate::notify::Notifier;
use crate::proxy::ProxyPool;
use crate::task::TaskId;

/// Errors from task manager operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("task already running: {0}")]
    AlreadyRunning(TaskId),

    /// The addressed runner's control channel is closed.
    #[error("runner {0} is not accepting events")]
    Channel(String),
}

/// Static settings for the task manager.
#[derive(Debug, Clone, Default)]
pub struct ManagerSettings {
    pub runner: RunnerConfig,
    pub monitor: MonitorSettings,
    /// Size extraction rules keyed by normalized site URL.
    pub size_rules: HashMap<String, SizeRule>,
}

impl ManagerSettings {
    pub fn swap_timeout(&self) -> Duration {
        self.monitor.swap_timeout
    }

    pub fn size_rule(&self, site_url: &str) -> SizeRule {
        self.size_rules
            .get(&site_key(site_url))
            .cloned()
            .unwrap_or_else(|| self.monitor.size_rule.clone())
    }
}

pub(crate) fn site_key(url: &str) -> String {
    url.trim().trim_end_matches('/').to_lowercase()
}

/// Shared services the task manager hands to its runners.
#[derive(Clone)]
pub struct Collaborators {
    pub pool: Arc<ProxyPool>,
    pub broker: Arc<CaptchaBroker>,
    pub parsers: Arc<dyn ParserFactory>,
    pub gateway: Arc<dyn CheckoutGateway>,
    pub notifier: Option<Arc<dyn Notifier>>,
}

/// A running task as seen from the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    pub task_id: TaskId,
    pub runner_id: String,
    pub monitor_id: Option<String>,
    pub site: String,
    pub proxy: Option<String>,
    pub status: Option<String>,
    pub product_found: bool,
}

/// Snapshot of the task manager.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagerStatus {
    pub tasks: usize,
    pub monitors: usize,
    pub proxies: usize,
    /// Site keys with runners waiting on a CAPTCHA.
    pub harvesting: Vec<String>,
}
