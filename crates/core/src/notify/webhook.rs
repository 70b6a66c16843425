//! Discord and Slack webhook delivery.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use super::types::{NotifyError, Notifier, Outcome};
use crate::task::{Hook, HookKind};

const SUCCESS_COLOR: u32 = 0x2ecc71;
const DECLINE_COLOR: u32 = 0xe74c3c;

fn title(outcome: &Outcome) -> &'static str {
    if outcome.success {
        "Successful checkout"
    } else {
        "Payment declined"
    }
}

fn fields(outcome: &Outcome) -> Vec<(&'static str, String)> {
    let mut fields = vec![("Site", outcome.site.clone())];
    if let Some(product) = &outcome.product {
        fields.push(("Product", product.clone()));
    }
    if let Some(size) = &outcome.size {
        fields.push(("Size", size.clone()));
    }
    if let Some(price) = &outcome.price {
        fields.push(("Price", price.clone()));
    }
    if !outcome.profile.is_empty() {
        fields.push(("Profile", outcome.profile.clone()));
    }
    if let Some(order) = &outcome.order {
        fields.push(("Order", order.clone()));
    }
    fields.push(("Time", format!("{}ms", outcome.elapsed_ms)));
    fields
}

/// Discord embed body.
pub fn discord_payload(outcome: &Outcome) -> Value {
    let mut embed = json!({
        "title": title(outcome),
        "description": outcome.message,
        "color": if outcome.success { SUCCESS_COLOR } else { DECLINE_COLOR },
        "timestamp": outcome.timestamp.to_rfc3339(),
        "fields": fields(outcome)
            .into_iter()
            .map(|(name, value)| json!({ "name": name, "value": value, "inline": true }))
            .collect::<Vec<_>>(),
    });
    if let Some(image) = &outcome.image {
        embed["thumbnail"] = json!({ "url": image });
    }
    json!({ "embeds": [embed] })
}

/// Slack message body.
pub fn slack_payload(outcome: &Outcome) -> Value {
    let lines: Vec<String> = fields(outcome)
        .into_iter()
        .map(|(name, value)| format!("*{}:* {}", name, value))
        .collect();
    json!({
        "text": format!("{}\n{}\n{}", title(outcome), outcome.message, lines.join("\n")),
    })
}

/// Posts outcomes to Discord or Slack webhooks.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
}

impl WebhookNotifier {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, hook: &Hook, outcome: &Outcome) -> Result<(), NotifyError> {
        let body = match hook.kind {
            HookKind::Discord => discord_payload(outcome),
            HookKind::Slack => slack_payload(outcome),
        };
        debug!("Task {} posting outcome to {:?} hook", outcome.task_id, hook.kind);

        let response = self
            .client
            .post(&hook.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| NotifyError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected(status.as_u16()));
        }
        Ok(())
    }
}
