//! Per-runner mutable state.
//!
//! One [`RunnerContext`] is shared (behind an `Arc`) by a runner's driver
//! loop and the pump that applies control events to it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::captcha::{CaptchaToken, HarvestState};
use crate::events::{ControlEvent, RunnerKind, RunnerLink};
use crate::handoff::HandoffQueue;
use crate::monitor::ProductFound;
use crate::proxy::{BanLevel, ProxyLease};
use crate::task::{DelayKind, Hook, Task, TaskId};

/// Swap requests a runner has sent and not yet seen answered.
#[derive(Default)]
struct SwapBook {
    next_seq: u64,
    /// Proxy each outstanding request asked to replace.
    outstanding: HashMap<u64, Option<String>>,
    waiter: Option<(u64, oneshot::Sender<Option<ProxyLease>>)>,
}

/// State threaded through a monitor or checkout runner.
pub struct RunnerContext {
    task_id: TaskId,
    task: RwLock<Task>,
    proxy: Mutex<Option<ProxyLease>>,
    swaps: Mutex<SwapBook>,
    cancel: CancellationToken,
    wake: Notify,
    found: Mutex<Option<ProductFound>>,
    harvest: Mutex<HarvestState>,
    captcha: Arc<HandoffQueue<CaptchaToken>>,
    last_status: Mutex<Option<String>>,
    force_swap: AtomicBool,
    link: RunnerLink,
}

impl std::fmt::Debug for RunnerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerContext")
            .field("runner_id", &self.link.runner_id())
            .field("task_id", &self.task_id)
            .field("aborted", &self.cancel.is_cancelled())
            .finish()
    }
}

impl RunnerContext {
    pub fn new(task: Task, link: RunnerLink, proxy: Option<ProxyLease>) -> Self {
        Self {
            task_id: task.id.clone(),
            task: RwLock::new(task),
            proxy: Mutex::new(proxy),
            swaps: Mutex::new(SwapBook::default()),
            cancel: CancellationToken::new(),
            wake: Notify::new(),
            found: Mutex::new(None),
            harvest: Mutex::new(HarvestState::Idle),
            captcha: Arc::new(HandoffQueue::new()),
            last_status: Mutex::new(None),
            force_swap: AtomicBool::new(false),
            link,
        }
    }

    pub fn runner_id(&self) -> &str {
        self.link.runner_id()
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn kind(&self) -> RunnerKind {
        self.link.kind()
    }

    pub fn link(&self) -> &RunnerLink {
        &self.link
    }

    /// Snapshot of the task as currently configured.
    pub fn task(&self) -> Task {
        self.task.read().unwrap().clone()
    }

    /// Swap in an edited task and cut any pending delay short.
    ///
    /// The task id never changes; a found product is kept.
    pub fn replace_task(&self, mut task: Task) {
        task.id = self.task_id.clone();
        *self.task.write().unwrap() = task;
        self.wake.notify_waiters();
    }

    pub fn delay_for(&self, kind: DelayKind) -> Duration {
        self.task.read().unwrap().delay(kind)
    }

    pub fn hook(&self) -> Option<Hook> {
        self.task.read().unwrap().hook.clone()
    }

    pub fn proxy(&self) -> Option<ProxyLease> {
        self.proxy.lock().unwrap().clone()
    }

    pub fn set_proxy(&self, proxy: Option<ProxyLease>) {
        *self.proxy.lock().unwrap() = proxy;
    }

    pub fn product(&self) -> Option<ProductFound> {
        self.found.lock().unwrap().clone()
    }

    pub fn harvest_state(&self) -> HarvestState {
        *self.harvest.lock().unwrap()
    }

    pub fn set_harvest_state(&self, state: HarvestState) {
        *self.harvest.lock().unwrap() = state;
    }

    pub fn captcha_queue(&self) -> &Arc<HandoffQueue<CaptchaToken>> {
        &self.captcha
    }

    pub fn last_status(&self) -> Option<String> {
        self.last_status.lock().unwrap().clone()
    }

    pub fn is_aborted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Raise the abort flag and wake anything parked on this context.
    pub fn abort(&self) {
        self.cancel.cancel();
        self.wake.notify_waiters();
    }

    pub fn cancelled(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Consume a pending forced swap.
    pub fn take_force_swap(&self) -> bool {
        self.force_swap.swap(false, Ordering::SeqCst)
    }

    /// Sleep for `duration`.
    ///
    /// Returns false if the runner was aborted. A delay change or a found
    /// product cuts the sleep short.
    pub async fn delay(&self, duration: Duration) -> bool {
        let woken = self.wake.notified();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = woken => !self.is_aborted(),
            _ = tokio::time::sleep(duration) => !self.is_aborted(),
        }
    }

    /// Run `operation`, dropping it if the runner is aborted first.
    pub async fn until_aborted<F: Future>(&self, operation: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            output = operation => Some(output),
        }
    }

    /// Emit `message` unless it repeats the last one.
    pub fn emit_status(&self, message: &str) {
        let mut last = self.last_status.lock().unwrap();
        if last.as_deref() == Some(message) {
            return;
        }
        *last = Some(message.to_string());
        drop(last);
        self.link.status(message, false);
    }

    /// Emit the terminal status, keeping the last specific message.
    pub fn emit_final(&self, fallback: &str) {
        let message = self.last_status().unwrap_or_else(|| fallback.to_string());
        self.link.status(message, true);
    }

    /// Ask the orchestrator to replace `from`.
    ///
    /// Resolves to the new lease, or `None` when no proxy was free, the
    /// reply did not arrive within `timeout`, or the runner was aborted.
    /// If the runner already holds a proxy other than `from`, that proxy is
    /// returned without asking again.
    pub async fn request_swap(
        &self,
        ban: BanLevel,
        from: Option<&str>,
        timeout: Duration,
    ) -> Option<ProxyLease> {
        let (tx, rx) = oneshot::channel();
        let seq = {
            let mut book = self.swaps.lock().unwrap();
            let current = self.proxy();
            if let Some(lease) = current.as_ref().filter(|p| Some(p.id.as_str()) != from) {
                debug!("Runner {} already moved to proxy {}", self.runner_id(), lease.id);
                return Some(lease.clone());
            }

            book.next_seq += 1;
            let seq = book.next_seq;
            let old = current.map(|p| p.id);
            if !self.link.swap_proxy(seq, old.clone(), ban) {
                return None;
            }
            book.outstanding.insert(seq, old);
            book.waiter = Some((seq, tx));
            seq
        };

        let reply = self.until_aborted(tokio::time::timeout(timeout, rx)).await;
        {
            let mut book = self.swaps.lock().unwrap();
            if book.waiter.as_ref().is_some_and(|(s, _)| *s == seq) {
                book.waiter = None;
            }
        }
        match reply {
            Some(Ok(Ok(lease))) => lease,
            Some(Ok(Err(_))) => None,
            Some(Err(_)) => {
                debug!("Runner {} timed out waiting for a proxy", self.runner_id());
                None
            }
            None => None,
        }
    }

    /// Settle the answer to swap request `seq`.
    ///
    /// A lease is installed only while the runner still holds the proxy the
    /// request asked to replace, or none at all. Otherwise it goes back to
    /// the pool.
    fn settle_swap(&self, seq: u64, proxy: Option<ProxyLease>) {
        let mut book = self.swaps.lock().unwrap();
        let answered = book.waiter.as_ref().is_some_and(|(s, _)| *s == seq);
        let Some(old) = book.outstanding.remove(&seq) else {
            if let Some(lease) = proxy {
                self.link.release_proxy(lease.id);
            }
            return;
        };
        let Some(lease) = proxy else {
            if answered {
                if let Some((_, reply)) = book.waiter.take() {
                    let _ = reply.send(None);
                }
            }
            return;
        };

        let mut current = self.proxy.lock().unwrap();
        let replaceable = current.as_ref().is_none_or(|p| Some(&p.id) == old.as_ref());
        if !replaceable {
            debug!("Runner {} returning stale proxy {}", self.runner_id(), lease.id);
            let kept = current.clone();
            drop(current);
            self.link.release_proxy(lease.id);
            if answered {
                if let Some((_, reply)) = book.waiter.take() {
                    let _ = reply.send(kept);
                }
            }
            return;
        }

        *current = Some(lease.clone());
        drop(current);
        if !answered {
            debug!("Runner {} installed late proxy {}", self.runner_id(), lease.id);
        }
        // A newer request was replacing the same proxy.
        if let Some((_, reply)) = book.waiter.take() {
            let _ = reply.send(Some(lease));
        }
    }

    /// Apply one control event.
    pub fn apply(&self, event: ControlEvent) {
        debug!("Runner {} received {}", self.runner_id(), event.name());
        match event {
            ControlEvent::Abort => self.abort(),
            ControlEvent::Harvest { token } => {
                if let Err(e) = self.captcha.insert(token) {
                    warn!("Runner {} dropped captcha token: {}", self.runner_id(), e);
                }
            }
            ControlEvent::SendProxy { proxy, swap: Some(seq) } => self.settle_swap(seq, proxy),
            ControlEvent::SendProxy { proxy, swap: None } => {
                if let Some(lease) = &proxy {
                    self.set_proxy(Some(lease.clone()));
                }
                if let Some((_, reply)) = self.swaps.lock().unwrap().waiter.take() {
                    let _ = reply.send(proxy);
                }
            }
            ControlEvent::ChangeDelay { ms, kind } => {
                self.task.write().unwrap().delays.set(kind, ms);
                self.wake.notify_waiters();
            }
            ControlEvent::UpdateHook { url, kind } => {
                self.task.write().unwrap().hook = Some(Hook { url, kind });
            }
            ControlEvent::ProductFound { found } => {
                *self.found.lock().unwrap() = Some(found);
                self.wake.notify_waiters();
            }
            ControlEvent::DeregisterProxy { proxy_id } => {
                let mut proxy = self.proxy.lock().unwrap();
                if proxy.as_ref().is_some_and(|p| p.id == proxy_id) {
                    *proxy = None;
                    self.force_swap.store(true, Ordering::SeqCst);
                    drop(proxy);
                    self.wake.notify_waiters();
                }
            }
        }
    }
}

/// Feed control events into `ctx` until the sender side closes.
pub async fn pump_control(ctx: Arc<RunnerContext>, mut events: mpsc::UnboundedReceiver<ControlEvent>) {
    while let Some(event) = events.recv().await {
        ctx.apply(event);
    }
}
