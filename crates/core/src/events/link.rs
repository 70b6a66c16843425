//! Runner side of the control plane.

use tokio::sync::mpsc;

use super::types::{RunnerKind, StatusUpdate, Upstream};
use crate::monitor::Resolution;
use crate::proxy::BanLevel;

/// Handle a runner uses to talk to the orchestrator.
///
/// Cheap to clone. Sends never block; a closed channel is logged and
/// otherwise ignored, since it only happens during shutdown.
#[derive(Debug, Clone)]
pub struct RunnerLink {
    runner_id: String,
    kind: RunnerKind,
    tx: mpsc::UnboundedSender<Upstream>,
}

impl RunnerLink {
    pub fn new(runner_id: impl Into<String>, kind: RunnerKind, tx: mpsc::UnboundedSender<Upstream>) -> Self {
        Self {
            runner_id: runner_id.into(),
            kind,
            tx,
        }
    }

    pub fn runner_id(&self) -> &str {
        &self.runner_id
    }

    pub fn kind(&self) -> RunnerKind {
        self.kind
    }

    fn send(&self, message: Upstream) -> bool {
        match self.tx.send(message) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Runner {} failed to reach orchestrator: {:?}", self.runner_id, e.0);
                false
            }
        }
    }

    pub fn status(&self, message: impl Into<String>, done: bool) -> bool {
        self.send(Upstream::Status(StatusUpdate {
            runner_id: self.runner_id.clone(),
            kind: self.kind,
            message: message.into(),
            done,
        }))
    }

    pub fn swap_proxy(&self, seq: u64, old: Option<String>, ban: BanLevel) -> bool {
        self.send(Upstream::SwapProxy {
            runner_id: self.runner_id.clone(),
            seq,
            old,
            ban,
        })
    }

    pub fn release_proxy(&self, proxy_id: impl Into<String>) -> bool {
        self.send(Upstream::ReleaseProxy {
            runner_id: self.runner_id.clone(),
            proxy_id: proxy_id.into(),
        })
    }

    pub fn report(&self, resolutions: Vec<Resolution>) -> bool {
        self.send(Upstream::MonitorReport {
            runner_id: self.runner_id.clone(),
            resolutions,
        })
    }

    pub fn finished(&self, state: &'static str) -> bool {
        self.send(Upstream::Finished {
            runner_id: self.runner_id.clone(),
            kind: self.kind,
            state,
        })
    }
}
