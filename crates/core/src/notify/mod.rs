//! Outcome notifications.
//!
//! The checkout hands a terminal [`Outcome`] to a [`Notifier`]; delivery
//! failures are logged by the caller and never change the task's state.

mod types;
mod webhook;

pub use types::{NotifyError, Notifier, Outcome};
pub use webhook::{discord_payload, slack_payload, WebhookNotifier};
