//! Control-plane and status event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::monitor::{ProductFound, Resolution};
use crate::proxy::{BanLevel, ProxyLease};
use crate::task::{DelayKind, HookKind, TaskId};

/// Who a control event is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum Target {
    /// A single task, by task id.
    Task(TaskId),
    /// A single runner, by runner id.
    Runner(String),
    /// Every live runner.
    All,
}

/// Orchestrator → runner events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlEvent {
    Abort,
    /// A solved CAPTCHA token for this runner.
    Harvest { token: String },
    /// A proxy for the runner. `None` means no replacement was available.
    ///
    /// `swap` names the swap request this answers; a proxy pushed from
    /// outside carries none.
    SendProxy {
        proxy: Option<ProxyLease>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        swap: Option<u64>,
    },
    ChangeDelay { ms: u64, kind: DelayKind },
    UpdateHook { url: String, kind: HookKind },
    ProductFound { found: ProductFound },
    /// The proxy was removed from the pool.
    DeregisterProxy { proxy_id: String },
}

impl ControlEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ControlEvent::Abort => "abort",
            ControlEvent::Harvest { .. } => "harvest",
            ControlEvent::SendProxy { .. } => "send_proxy",
            ControlEvent::ChangeDelay { .. } => "change_delay",
            ControlEvent::UpdateHook { .. } => "update_hook",
            ControlEvent::ProductFound { .. } => "product_found",
            ControlEvent::DeregisterProxy { .. } => "deregister_proxy",
        }
    }
}

/// A control event and its addressee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlEnvelope {
    pub target: Target,
    pub event: ControlEvent,
}

impl ControlEnvelope {
    pub fn new(target: Target, event: ControlEvent) -> Self {
        Self { target, event }
    }
}

/// Which state machine a runner drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerKind {
    Task,
    Monitor,
}

/// Status line as emitted by a runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub runner_id: String,
    pub kind: RunnerKind,
    pub message: String,
    pub done: bool,
}

/// Status line as published to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub task_id: TaskId,
    pub runner_id: String,
    pub kind: RunnerKind,
    pub message: String,
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Runner → orchestrator messages.
#[derive(Debug, Clone)]
pub enum Upstream {
    Status(StatusUpdate),
    /// Ask for a replacement proxy, banning `old` at `ban` for this site.
    /// The reply echoes `seq`.
    SwapProxy {
        runner_id: String,
        seq: u64,
        old: Option<String>,
        ban: BanLevel,
    },
    /// Give back a lease the runner will not use.
    ReleaseProxy { runner_id: String, proxy_id: String },
    /// A monitor resolved a product for some of its subscribers.
    MonitorReport {
        runner_id: String,
        resolutions: Vec<Resolution>,
    },
    /// The runner's driver loop returned.
    Finished {
        runner_id: String,
        kind: RunnerKind,
        state: &'static str,
    },
}
