//! Mock notifier for testing.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::notify::{NotifyError, Notifier, Outcome};
use crate::task::Hook;

/// Records outcomes instead of posting them.
#[derive(Debug, Default)]
pub struct MockNotifier {
    sent: Mutex<Vec<(Hook, Outcome)>>,
    fail: Mutex<bool>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later delivery fail.
    pub async fn fail(&self) {
        *self.fail.lock().await = true;
    }

    /// Outcomes delivered so far.
    pub async fn sent(&self) -> Vec<Outcome> {
        self.sent.lock().await.iter().map(|(_, o)| o.clone()).collect()
    }

    /// Hooks delivered to so far.
    pub async fn hooks(&self) -> Vec<Hook> {
        self.sent.lock().await.iter().map(|(h, _)| h.clone()).collect()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn notify(&self, hook: &Hook, outcome: &Outcome) -> Result<(), NotifyError> {
        if *self.fail.lock().await {
            return Err(NotifyError::Rejected(500));
        }
        self.sent.lock().await.push((hook.clone(), outcome.clone()));
        Ok(())
    }
}
