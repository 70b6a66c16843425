//! Task manager implementation.
//!
//! Owns every live checkout and monitor. Runners talk back over one shared
//! upstream channel; a single router task turns that traffic into status
//! events, proxy swaps, product fan-out and cleanup.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock as StdRwLock, Weak};

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::types::{Collaborators, ManagerError, ManagerSettings, ManagerStatus, TaskSummary};
use crate::captcha::CaptchaToken;
use crate::checkout::Checkout;
use crate::context::{pump_control, RunnerContext};
use crate::events::{
    ControlEnvelope, ControlEvent, RunnerKind, RunnerLink, StatusEvent, StatusUpdate, Target,
    Upstream,
};
use crate::metrics::{MONITORS_ACTIVE, TASKS_STARTED};
use crate::monitor::{Monitor, MonitorSettings, Resolution, Subscribers, Subscription};
use crate::proxy::{BanLevel, ProxyLease, ProxySummary};
use crate::task::{Delays, MonitorKey, Task, TaskId};

/// One live checkout.
struct TaskEntry {
    runner_id: String,
    ctx: Arc<RunnerContext>,
    control: mpsc::UnboundedSender<ControlEvent>,
    monitor: MonitorKey,
}

/// One live monitor and the tasks it serves.
struct MonitorGroup {
    runner_id: String,
    ctx: Arc<RunnerContext>,
    control: mpsc::UnboundedSender<ControlEvent>,
    subscribers: Subscribers,
    served: HashSet<TaskId>,
}

impl MonitorGroup {
    fn subscriber_ids(&self) -> Vec<TaskId> {
        self.subscribers.read().unwrap().keys().cloned().collect()
    }
}

struct Inner {
    settings: ManagerSettings,
    parts: Collaborators,
    runners: RwLock<HashMap<TaskId, TaskEntry>>,
    monitors: RwLock<HashMap<MonitorKey, MonitorGroup>>,
    status_tx: broadcast::Sender<StatusEvent>,
    upstream_tx: mpsc::UnboundedSender<Upstream>,
}

/// Starts, stops and wires together checkouts and their shared monitors.
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager").finish_non_exhaustive()
    }
}

impl TaskManager {
    /// Create the manager and spawn its upstream router.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(settings: ManagerSettings, parts: Collaborators) -> Self {
        let (status_tx, _) = broadcast::channel(settings.runner.status_buffer.max(1));
        let (upstream_tx, upstream_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            settings,
            parts,
            runners: RwLock::new(HashMap::new()),
            monitors: RwLock::new(HashMap::new()),
            status_tx,
            upstream_tx,
        });

        tokio::spawn(route_upstream(Arc::downgrade(&inner), upstream_rx));
        Self { inner }
    }

    /// Live status stream.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.inner.status_tx.subscribe()
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.inner.settings
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.inner.parts
    }

    /// Start a task: reserve a proxy, join or create its monitor group and
    /// spawn the checkout. Returns the checkout's runner id.
    pub async fn start(&self, mut task: Task) -> Result<String, ManagerError> {
        let inner = &self.inner;
        if task.delays == Delays::default() {
            task.delays = inner.settings.runner.default_delays();
        }

        if inner.runners.read().await.contains_key(&task.id) {
            return Err(ManagerError::AlreadyRunning(task.id));
        }
        let proxy = inner.initial_proxy(&task.id, &task, true).await;

        let mut runners = inner.runners.write().await;
        if runners.contains_key(&task.id) {
            inner.release_proxy(&task.id, &task, proxy).await;
            return Err(ManagerError::AlreadyRunning(task.id));
        }

        let runner_id = format!("task-{}", Uuid::new_v4().simple());
        let (control, control_rx) = mpsc::unbounded_channel();
        let link = RunnerLink::new(runner_id.clone(), RunnerKind::Task, inner.upstream_tx.clone());
        let ctx = Arc::new(RunnerContext::new(task.clone(), link, proxy.clone()));

        let key = MonitorKey::for_task(&task);
        {
            let mut monitors = inner.monitors.write().await;
            inner.join_monitor(&mut monitors, &task).await;
        }

        let span = info_span!("runner", task_id = %task.id, runner_id = %runner_id);
        tokio::spawn(pump_control(Arc::clone(&ctx), control_rx));
        let checkout = Checkout::new(
            Arc::clone(&ctx),
            Arc::clone(&inner.parts.gateway),
            Arc::clone(&inner.parts.broker),
            inner.parts.notifier.clone(),
            inner
                .settings
                .runner
                .checkout_settings(inner.settings.swap_timeout()),
        );
        tokio::spawn(checkout.run().instrument(span));

        TASKS_STARTED.inc();
        info!(
            "Started task {} as {} with proxy {}",
            task.id,
            runner_id,
            proxy.as_ref().map(|p| p.id.as_str()).unwrap_or("none")
        );
        runners.insert(
            task.id.clone(),
            TaskEntry {
                runner_id: runner_id.clone(),
                ctx,
                control,
                monitor: key,
            },
        );
        Ok(runner_id)
    }

    /// Abort a task. It leaves its monitor group at once; the checkout
    /// reaches `ABORT` at its next suspension point.
    pub async fn stop(&self, task_id: &str) -> Result<(), ManagerError> {
        let key = {
            let runners = self.inner.runners.read().await;
            let entry = runners
                .get(task_id)
                .ok_or_else(|| ManagerError::TaskNotFound(task_id.to_string()))?;
            entry.ctx.abort();
            entry.monitor.clone()
        };
        info!("Stopping task {}", task_id);
        self.inner.leave_monitor(task_id, &key).await;
        Ok(())
    }

    /// Apply an edited task to a running checkout.
    ///
    /// Pending delays are cut short. A changed site or selector moves the
    /// task to the monitor group of its new target.
    pub async fn restart(&self, task: Task) -> Result<(), ManagerError> {
        let inner = &self.inner;
        let mut runners = inner.runners.write().await;
        let entry = runners
            .get_mut(&task.id)
            .ok_or_else(|| ManagerError::TaskNotFound(task.id.clone()))?;

        entry.ctx.replace_task(task.clone());
        let key = MonitorKey::for_task(&task);
        let mut monitors = inner.monitors.write().await;

        if key == entry.monitor {
            if let Some(group) = monitors.get(&key) {
                group
                    .subscribers
                    .write()
                    .unwrap()
                    .insert(task.id.clone(), Subscription::for_task(&task));
            }
            debug!("Restarted task {} in place", task.id);
            return Ok(());
        }

        info!("Task {} changed target, moving monitor group", task.id);
        let old = std::mem::replace(&mut entry.monitor, key);
        inner.leave_monitor_locked(&mut monitors, &task.id, &old).await;
        inner.join_monitor(&mut monitors, &task).await;
        Ok(())
    }

    /// Route a control event to the runners it addresses.
    ///
    /// Returns how many runners received it.
    pub async fn dispatch(&self, envelope: ControlEnvelope) -> Result<usize, ManagerError> {
        let ControlEnvelope { target, event } = envelope;
        match target {
            Target::Task(task_id) => {
                if matches!(event, ControlEvent::Abort) {
                    self.stop(&task_id).await?;
                    return Ok(1);
                }
                let runners = self.inner.runners.read().await;
                let entry = runners
                    .get(&task_id)
                    .ok_or_else(|| ManagerError::TaskNotFound(task_id.clone()))?;
                let mut delivered = 0;
                // A monitor delay change applies to the shared monitor too.
                if let ControlEvent::ChangeDelay { kind: crate::task::DelayKind::Monitor, .. } = &event {
                    let monitors = self.inner.monitors.read().await;
                    if let Some(group) = monitors.get(&entry.monitor) {
                        if group.control.send(event.clone()).is_ok() {
                            delivered += 1;
                        }
                    }
                }
                entry
                    .control
                    .send(event)
                    .map_err(|_| ManagerError::Channel(entry.runner_id.clone()))?;
                Ok(delivered + 1)
            }
            Target::Runner(runner_id) => {
                {
                    let runners = self.inner.runners.read().await;
                    if let Some(entry) = runners.values().find(|e| e.runner_id == runner_id) {
                        entry
                            .control
                            .send(event)
                            .map_err(|_| ManagerError::Channel(runner_id.clone()))?;
                        return Ok(1);
                    }
                }
                let monitors = self.inner.monitors.read().await;
                let group = monitors
                    .values()
                    .find(|g| g.runner_id == runner_id)
                    .ok_or_else(|| ManagerError::TaskNotFound(runner_id.clone()))?;
                group
                    .control
                    .send(event)
                    .map_err(|_| ManagerError::Channel(runner_id.clone()))?;
                Ok(1)
            }
            Target::All => Ok(self.inner.broadcast(event).await),
        }
    }

    /// Register raw proxies. Returns how many were accepted.
    pub async fn register_proxies<S: AsRef<str>>(&self, raws: &[S]) -> usize {
        self.inner.parts.pool.register_all(raws).await
    }

    /// Remove proxies from the pool and force their current users to swap.
    pub async fn deregister_proxies<S: AsRef<str>>(&self, raws: &[S]) -> usize {
        let mut removed = 0;
        for raw in raws {
            let Some(lease) = self.inner.parts.pool.deregister(raw.as_ref()).await else {
                continue;
            };
            removed += 1;
            self.inner
                .broadcast(ControlEvent::DeregisterProxy { proxy_id: lease.id })
                .await;
        }
        removed
    }

    pub async fn proxies(&self) -> Vec<ProxySummary> {
        self.inner.parts.pool.summaries().await
    }

    /// Hand a solved CAPTCHA to the head waiter for `site_key`.
    pub async fn harvest(&self, token: CaptchaToken, site_key: &str) -> Option<String> {
        self.inner.parts.broker.deliver(token, site_key).await
    }

    pub async fn tasks(&self) -> Vec<TaskSummary> {
        let runners = self.inner.runners.read().await;
        let monitors = self.inner.monitors.read().await;
        let mut tasks: Vec<TaskSummary> = runners
            .iter()
            .map(|(task_id, entry)| TaskSummary {
                task_id: task_id.clone(),
                runner_id: entry.runner_id.clone(),
                monitor_id: monitors.get(&entry.monitor).map(|g| g.runner_id.clone()),
                site: entry.ctx.task().site.url,
                proxy: entry.ctx.proxy().map(|p| p.display_host().to_string()),
                status: entry.ctx.last_status(),
                product_found: entry.ctx.product().is_some(),
            })
            .collect();
        tasks.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        tasks
    }

    /// Subscriber ids of the monitor group `task_id` belongs to.
    pub async fn monitor_peers(&self, task_id: &str) -> Option<Vec<TaskId>> {
        let runners = self.inner.runners.read().await;
        let key = &runners.get(task_id)?.monitor;
        let monitors = self.inner.monitors.read().await;
        monitors.get(key).map(|g| g.subscriber_ids())
    }

    pub async fn status(&self) -> ManagerStatus {
        ManagerStatus {
            tasks: self.inner.runners.read().await.len(),
            monitors: self.inner.monitors.read().await.len(),
            proxies: self.inner.parts.pool.len().await,
            harvesting: self.inner.parts.broker.active_site_keys().await,
        }
    }

    /// Abort every runner.
    pub async fn shutdown(&self) {
        let stopped = self.inner.broadcast(ControlEvent::Abort).await;
        info!("Task manager shutting down, aborted {} runner(s)", stopped);
    }
}

impl Inner {
    /// Reserve a first proxy. An empty pool means running direct.
    async fn initial_proxy(&self, holder: &str, task: &Task, wait: bool) -> Option<ProxyLease> {
        let pool = &self.parts.pool;
        if pool.is_empty().await {
            return None;
        }
        let lease = pool.reserve(holder, &task.site.url, task.platform(), wait).await;
        if lease.is_none() {
            warn!("No proxy free for {} on {}, running direct", holder, task.site.url);
        }
        lease
    }

    async fn release_proxy(&self, holder: &str, task: &Task, proxy: Option<ProxyLease>) {
        if let Some(proxy) = proxy {
            self.parts
                .pool
                .release(holder, &task.site.url, task.platform(), &proxy.id)
                .await;
        }
    }

    /// Subscribe `task` to the monitor for its target, spawning one if needed.
    async fn join_monitor(&self, monitors: &mut HashMap<MonitorKey, MonitorGroup>, task: &Task) {
        let key = MonitorKey::for_task(task);
        if let Some(group) = monitors.get(&key) {
            group
                .subscribers
                .write()
                .unwrap()
                .insert(task.id.clone(), Subscription::for_task(task));
            debug!("Task {} joined monitor {}", task.id, group.runner_id);
            return;
        }

        let mut subscribers = BTreeMap::new();
        subscribers.insert(task.id.clone(), Subscription::for_task(task));
        let group = self.spawn_monitor(task, subscribers).await;
        info!("Task {} created monitor {} for {}", task.id, group.runner_id, key);
        monitors.insert(key, group);
        MONITORS_ACTIVE.inc();
    }

    async fn spawn_monitor(
        &self,
        task: &Task,
        subscribers: BTreeMap<TaskId, Subscription>,
    ) -> MonitorGroup {
        let runner_id = format!("monitor-{}", Uuid::new_v4().simple());
        // Called under the monitors lock, so never wait here.
        let proxy = self.initial_proxy(&runner_id, task, false).await;
        let (control, control_rx) = mpsc::unbounded_channel();
        let link = RunnerLink::new(runner_id.clone(), RunnerKind::Monitor, self.upstream_tx.clone());
        let ctx = Arc::new(RunnerContext::new(task.clone(), link, proxy));
        let subscribers: Subscribers = Arc::new(StdRwLock::new(subscribers));

        let settings = MonitorSettings {
            size_rule: self.settings.size_rule(&task.site.url),
            ..self.settings.monitor.clone()
        };
        let monitor = Monitor::new(
            Arc::clone(&ctx),
            self.parts.parsers.parsers(&task.site),
            Arc::clone(&subscribers),
            settings,
        );

        let span = info_span!("runner", task_id = %task.id, runner_id = %runner_id);
        tokio::spawn(pump_control(Arc::clone(&ctx), control_rx));
        tokio::spawn(monitor.run().instrument(span));

        MonitorGroup {
            runner_id,
            ctx,
            control,
            subscribers,
            served: HashSet::new(),
        }
    }

    async fn leave_monitor(&self, task_id: &str, key: &MonitorKey) {
        let mut monitors = self.monitors.write().await;
        self.leave_monitor_locked(&mut monitors, task_id, key).await;
    }

    /// Drop `task_id` from its group. The last subscriber out cancels the
    /// monitor and frees its proxy.
    async fn leave_monitor_locked(
        &self,
        monitors: &mut HashMap<MonitorKey, MonitorGroup>,
        task_id: &str,
        key: &MonitorKey,
    ) {
        let Some(group) = monitors.get_mut(key) else {
            return;
        };
        let empty = {
            let mut subscribers = group.subscribers.write().unwrap();
            subscribers.remove(task_id);
            subscribers.is_empty()
        };
        group.served.remove(task_id);
        if !empty {
            debug!("Task {} left monitor {}", task_id, group.runner_id);
            return;
        }

        if let Some(group) = monitors.remove(key) {
            info!("Monitor {} has no subscribers left, cancelling", group.runner_id);
            group.ctx.abort();
            MONITORS_ACTIVE.dec();
            self.release_proxy(&group.runner_id, &group.ctx.task(), group.ctx.proxy())
                .await;
        }
    }

    /// Send `event` to every runner and monitor.
    async fn broadcast(&self, event: ControlEvent) -> usize {
        let mut delivered = 0;
        for entry in self.runners.read().await.values() {
            if entry.control.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        for group in self.monitors.read().await.values() {
            if group.control.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    fn publish(&self, task_id: &str, update: &StatusUpdate, proxy: Option<ProxyLease>) {
        let event = StatusEvent {
            task_id: task_id.to_string(),
            runner_id: update.runner_id.clone(),
            kind: update.kind,
            message: update.message.clone(),
            done: update.done,
            proxy: proxy.map(|p| p.display_host().to_string()),
            timestamp: Utc::now(),
        };
        // No listeners is fine.
        let _ = self.status_tx.send(event);
    }

    async fn on_status(&self, update: StatusUpdate) {
        match update.kind {
            RunnerKind::Task => {
                let runners = self.runners.read().await;
                if let Some((task_id, entry)) =
                    runners.iter().find(|(_, e)| e.runner_id == update.runner_id)
                {
                    self.publish(task_id, &update, entry.ctx.proxy());
                }
            }
            RunnerKind::Monitor => {
                let monitors = self.monitors.read().await;
                if let Some(group) = monitors.values().find(|g| g.runner_id == update.runner_id) {
                    for task_id in group.subscriber_ids() {
                        self.publish(&task_id, &update, group.ctx.proxy());
                    }
                }
            }
        }
    }

    /// Holder id, task and control channel of a live runner.
    async fn runner_parts(
        &self,
        runner_id: &str,
    ) -> Option<(String, Task, mpsc::UnboundedSender<ControlEvent>)> {
        let runners = self.runners.read().await;
        if let Some((task_id, entry)) = runners.iter().find(|(_, e)| e.runner_id == runner_id) {
            return Some((task_id.clone(), entry.ctx.task(), entry.control.clone()));
        }
        let monitors = self.monitors.read().await;
        monitors
            .values()
            .find(|g| g.runner_id == runner_id)
            .map(|group| (runner_id.to_string(), group.ctx.task(), group.control.clone()))
    }

    async fn on_swap(&self, runner_id: String, seq: u64, old: Option<String>, ban: BanLevel) {
        let Some((holder, task, control)) = self.runner_parts(&runner_id).await else {
            debug!("Swap request from retired runner {}", runner_id);
            return;
        };

        let proxy = self
            .parts
            .pool
            .swap(&holder, old.as_deref(), &task.site.url, task.platform(), ban)
            .await;
        match &proxy {
            Some(lease) => info!("Runner {} swapped to proxy {}", runner_id, lease.id),
            None => debug!("No replacement proxy for {}", runner_id),
        }
        let reply = ControlEvent::SendProxy {
            proxy,
            swap: Some(seq),
        };
        if let Err(mpsc::error::SendError(reply)) = control.send(reply) {
            warn!("Runner {} went away before its proxy arrived", runner_id);
            if let ControlEvent::SendProxy { proxy, .. } = reply {
                self.release_proxy(&holder, &task, proxy).await;
            }
        }
    }

    async fn on_release(&self, runner_id: String, proxy_id: String) {
        let Some((holder, task, _)) = self.runner_parts(&runner_id).await else {
            return;
        };
        debug!("Runner {} returned proxy {}", runner_id, proxy_id);
        self.parts
            .pool
            .release(&holder, &task.site.url, task.platform(), &proxy_id)
            .await;
    }

    async fn on_report(&self, runner_id: String, resolutions: Vec<Resolution>) {
        {
            let mut monitors = self.monitors.write().await;
            if let Some(group) = monitors.values_mut().find(|g| g.runner_id == runner_id) {
                group
                    .served
                    .extend(resolutions.iter().map(|r| r.task_id.clone()));
            }
        }

        let runners = self.runners.read().await;
        for resolution in resolutions {
            let Some(entry) = runners.get(&resolution.task_id) else {
                continue;
            };
            let event = ControlEvent::ProductFound {
                found: resolution.found,
            };
            if entry.control.send(event).is_err() {
                warn!("Task {} missed its product", resolution.task_id);
            }
        }
    }

    async fn on_task_finished(&self, runner_id: &str, state: &str) {
        let removed = {
            let mut runners = self.runners.write().await;
            let task_id = runners
                .iter()
                .find(|(_, e)| e.runner_id == runner_id)
                .map(|(id, _)| id.clone());
            task_id.and_then(|id| runners.remove(&id).map(|e| (id, e)))
        };
        let Some((task_id, entry)) = removed else {
            return;
        };

        info!("Task {} ended in {}", task_id, state);
        self.release_proxy(&task_id, &entry.ctx.task(), entry.ctx.proxy())
            .await;
        self.leave_monitor(&task_id, &entry.monitor).await;
    }

    async fn on_monitor_finished(&self, runner_id: &str, state: &str) {
        let runners = self.runners.read().await;
        let mut monitors = self.monitors.write().await;
        let Some(key) = monitors
            .iter()
            .find(|(_, g)| g.runner_id == runner_id)
            .map(|(k, _)| k.clone())
        else {
            return;
        };
        let Some(group) = monitors.remove(&key) else {
            return;
        };
        MONITORS_ACTIVE.dec();
        self.release_proxy(&group.runner_id, &group.ctx.task(), group.ctx.proxy())
            .await;

        let unserved: BTreeMap<TaskId, Subscription> = group
            .subscribers
            .read()
            .unwrap()
            .iter()
            .filter(|(id, _)| !group.served.contains(*id))
            .map(|(id, s)| (id.clone(), s.clone()))
            .collect();
        if unserved.is_empty() {
            debug!("Monitor {} ended in {}", runner_id, state);
            return;
        }

        if state == "DONE" {
            // Subscribers that joined after the last round get a fresh monitor.
            let Some(task) = unserved.keys().find_map(|id| runners.get(id).map(|e| e.ctx.task()))
            else {
                return;
            };
            let fresh = self.spawn_monitor(&task, unserved).await;
            info!(
                "Monitor {} finished with waiting subscribers, respawned as {}",
                runner_id, fresh.runner_id
            );
            monitors.insert(key, fresh);
            MONITORS_ACTIVE.inc();
            return;
        }

        error!(
            "Monitor {} ended in {} with {} waiting task(s), aborting them",
            runner_id,
            state,
            unserved.len()
        );
        for task_id in unserved.keys() {
            if let Some(entry) = runners.get(task_id) {
                entry.ctx.abort();
            }
        }
    }

    async fn route(&self, message: Upstream) {
        match message {
            Upstream::Status(update) => self.on_status(update).await,
            Upstream::SwapProxy {
                runner_id,
                seq,
                old,
                ban,
            } => self.on_swap(runner_id, seq, old, ban).await,
            Upstream::ReleaseProxy { runner_id, proxy_id } => {
                self.on_release(runner_id, proxy_id).await
            }
            Upstream::MonitorReport {
                runner_id,
                resolutions,
            } => self.on_report(runner_id, resolutions).await,
            Upstream::Finished {
                runner_id,
                kind: RunnerKind::Task,
                state,
            } => self.on_task_finished(&runner_id, state).await,
            Upstream::Finished {
                runner_id,
                kind: RunnerKind::Monitor,
                state,
            } => self.on_monitor_finished(&runner_id, state).await,
        }
    }
}

async fn route_upstream(inner: Weak<Inner>, mut upstream: mpsc::UnboundedReceiver<Upstream>) {
    while let Some(message) = upstream.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.route(message).await;
    }
    debug!("Upstream router stopped");
}
