//! Shared harness for task manager integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use cartrunner_core::{
    testing::{MockGateway, MockNotifier, MockParserFactory},
    CaptchaBroker, CheckoutGateway, Collaborators, ManagerSettings, Notifier, ParserFactory,
    ProxyConfig, ProxyPool, RunnerConfig, RunnerKind, StatusEvent, TaskManager,
};

/// A task manager wired to mocks, with fast timings and a status recorder.
pub struct TestHarness {
    pub manager: TaskManager,
    pub parsers: Arc<MockParserFactory>,
    pub gateway: Arc<MockGateway>,
    pub notifier: Arc<MockNotifier>,
    pub pool: Arc<ProxyPool>,
    pub broker: Arc<CaptchaBroker>,
    events: Arc<Mutex<Vec<StatusEvent>>>,
}

impl TestHarness {
    pub fn new() -> Self {
        let parsers = Arc::new(MockParserFactory::new());
        let gateway = Arc::new(MockGateway::new());
        let notifier = Arc::new(MockNotifier::new());
        let broker = Arc::new(CaptchaBroker::default());
        let pool = Arc::new(ProxyPool::new(ProxyConfig {
            retry_interval_ms: 10,
            max_retries: 2,
            swap_timeout_ms: 1000,
            ..Default::default()
        }));

        let mut settings = ManagerSettings {
            runner: RunnerConfig {
                monitor_delay_ms: 20,
                error_delay_ms: 20,
                captcha_poll_ms: 10,
                wait_for_product_poll_ms: 10,
                queue_retry_ms: 20,
                ..Default::default()
            },
            ..Default::default()
        };
        settings.monitor.swap_timeout = Duration::from_secs(1);

        let parts = Collaborators {
            pool: Arc::clone(&pool),
            broker: Arc::clone(&broker),
            parsers: Arc::clone(&parsers) as Arc<dyn ParserFactory>,
            gateway: Arc::clone(&gateway) as Arc<dyn CheckoutGateway>,
            notifier: Some(Arc::clone(&notifier) as Arc<dyn Notifier>),
        };
        let manager = TaskManager::new(settings, parts);

        let events = Arc::new(Mutex::new(Vec::new()));
        let mut rx = manager.subscribe();
        let sink = Arc::clone(&events);
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                sink.lock().await.push(event);
            }
        });

        Self {
            manager,
            parsers,
            gateway,
            notifier,
            pool,
            broker,
            events,
        }
    }

    /// Every status event seen so far.
    pub async fn events(&self) -> Vec<StatusEvent> {
        self.events.lock().await.clone()
    }

    /// Task-kind messages for `task_id`, in order.
    pub async fn messages(&self, task_id: &str) -> Vec<String> {
        self.events()
            .await
            .into_iter()
            .filter(|e| e.task_id == task_id && e.kind == RunnerKind::Task)
            .map(|e| e.message)
            .collect()
    }

    /// Poll until an event for `task_id` satisfies `predicate`.
    pub async fn wait_for_status<F>(&self, task_id: &str, predicate: F, timeout: Duration) -> bool
    where
        F: Fn(&StatusEvent) -> bool,
    {
        let start = std::time::Instant::now();
        let poll_interval = Duration::from_millis(10);

        while start.elapsed() < timeout {
            if self
                .events
                .lock()
                .await
                .iter()
                .any(|e| e.task_id == task_id && predicate(e))
            {
                return true;
            }
            tokio::time::sleep(poll_interval).await;
        }
        false
    }

    /// Poll until the task's checkout has reported its final status.
    pub async fn wait_for_done(&self, task_id: &str, timeout: Duration) -> Option<String> {
        let finished = self
            .wait_for_status(task_id, |e| e.done && e.kind == RunnerKind::Task, timeout)
            .await;
        if !finished {
            return None;
        }
        self.events()
            .await
            .into_iter()
            .find(|e| e.task_id == task_id && e.done && e.kind == RunnerKind::Task)
            .map(|e| e.message)
    }

    /// Poll until no task is left running.
    pub async fn wait_until_idle(&self, timeout: Duration) -> bool {
        self.wait_for_tasks(0, timeout).await
    }

    /// Poll until exactly `count` tasks are running.
    pub async fn wait_for_tasks(&self, count: usize, timeout: Duration) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            if self.manager.status().await.tasks == count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}
