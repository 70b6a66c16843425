//! Priority queue of runners waiting for CAPTCHA tokens.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use super::types::{CaptchaToken, CaptchaWaiter, HarvestSignal};
use crate::handoff::HandoffQueue;
use crate::metrics::{CAPTCHA_TOKENS_DELIVERED, CAPTCHA_TOKENS_DROPPED};

/// Pairs solved tokens with waiting runners, per site key.
///
/// Waiters are ordered by ascending priority, then by arrival.
pub struct CaptchaBroker {
    queues: Mutex<HashMap<String, Vec<CaptchaWaiter>>>,
    next_seq: AtomicU64,
    signals: broadcast::Sender<HarvestSignal>,
}

impl std::fmt::Debug for CaptchaBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptchaBroker")
            .field("queues", &"<queues>")
            .field("next_seq", &self.next_seq)
            .finish()
    }
}

impl Default for CaptchaBroker {
    fn default() -> Self {
        Self::new(64)
    }
}

impl CaptchaBroker {
    /// Create a broker whose signal channel buffers `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        let (signals, _) = broadcast::channel(capacity);
        Self {
            queues: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            signals,
        }
    }

    /// Subscribe to start/stop harvest signals.
    pub fn subscribe(&self) -> broadcast::Receiver<HarvestSignal> {
        self.signals.subscribe()
    }

    fn signal(&self, signal: HarvestSignal) {
        // No solver listening is not an error.
        let _ = self.signals.send(signal);
    }

    /// Enqueue `runner_id` for a token on `site_key`.
    ///
    /// Returns false when the runner is already waiting on that key.
    pub async fn start_harvest(
        &self,
        runner_id: &str,
        site_key: &str,
        host: &str,
        priority: u32,
        queue: Arc<HandoffQueue<CaptchaToken>>,
    ) -> bool {
        let mut queues = self.queues.lock().await;
        let waiters = queues.entry(site_key.to_string()).or_default();

        if waiters.iter().any(|w| w.runner_id == runner_id) {
            return false;
        }

        let first = waiters.is_empty();
        let waiter = CaptchaWaiter {
            runner_id: runner_id.to_string(),
            site_key: site_key.to_string(),
            host: host.to_string(),
            priority,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            queue,
        };

        let position = waiters
            .iter()
            .position(|w| w.priority > priority)
            .unwrap_or(waiters.len());
        waiters.insert(position, waiter);

        debug!(
            "Runner {} waiting for captcha on {} (priority {}, position {})",
            runner_id, site_key, priority, position
        );

        if first {
            info!("Starting harvest for {}", site_key);
            self.signal(HarvestSignal::Start {
                site_key: site_key.to_string(),
                host: host.to_string(),
            });
        }
        true
    }

    /// Remove `runner_id` from the `site_key` queue.
    ///
    /// Emits a stop signal when the queue empties. Returns false if the
    /// runner was not waiting.
    pub async fn stop_harvest(&self, runner_id: &str, site_key: &str) -> bool {
        let mut queues = self.queues.lock().await;
        let Some(waiters) = queues.get_mut(site_key) else {
            return false;
        };
        let Some(index) = waiters.iter().position(|w| w.runner_id == runner_id) else {
            return false;
        };

        waiters.remove(index);
        if waiters.is_empty() {
            queues.remove(site_key);
            info!("Stopping harvest for {}", site_key);
            self.signal(HarvestSignal::Stop {
                site_key: site_key.to_string(),
            });
        }
        true
    }

    /// Hand `token` to the head waiter of `site_key`.
    ///
    /// Returns the runner that received it. Waiters whose queue has been
    /// destroyed are dropped and the token moves on to the next one.
    pub async fn deliver(&self, token: CaptchaToken, site_key: &str) -> Option<String> {
        let mut queues = self.queues.lock().await;
        let Some(waiters) = queues.get_mut(site_key) else {
            CAPTCHA_TOKENS_DROPPED.inc();
            debug!("Captcha token for {} arrived with nobody waiting", site_key);
            return None;
        };

        let mut receiver = None;
        while !waiters.is_empty() {
            let waiter = waiters.remove(0);
            match waiter.queue.insert(token.clone()) {
                Ok(()) => {
                    receiver = Some(waiter.runner_id);
                    break;
                }
                Err(e) => warn!(
                    "Dropping captcha waiter {} on {}: {}",
                    waiter.runner_id, site_key, e
                ),
            }
        }

        if waiters.is_empty() {
            queues.remove(site_key);
            info!("Stopping harvest for {}", site_key);
            self.signal(HarvestSignal::Stop {
                site_key: site_key.to_string(),
            });
        }

        match &receiver {
            Some(runner_id) => {
                CAPTCHA_TOKENS_DELIVERED.inc();
                info!("Delivered captcha token on {} to {}", site_key, runner_id);
            }
            None => CAPTCHA_TOKENS_DROPPED.inc(),
        }
        receiver
    }

    /// Runner ids waiting on `site_key`, in service order.
    pub async fn waiting(&self, site_key: &str) -> Vec<String> {
        let queues = self.queues.lock().await;
        queues
            .get(site_key)
            .map(|w| w.iter().map(|w| w.runner_id.clone()).collect())
            .unwrap_or_default()
    }

    /// Site keys that currently have waiters.
    pub async fn active_site_keys(&self) -> Vec<String> {
        let queues = self.queues.lock().await;
        let mut keys: Vec<String> = queues.keys().cloned().collect();
        keys.sort();
        keys
    }
}
