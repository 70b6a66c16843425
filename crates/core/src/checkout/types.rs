//! Checkout types.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::failure::NetworkErrorKind;
use crate::proxy::ProxyLease;
use crate::task::Task;

/// Checkout state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckoutState {
    Login,
    GetSiteData,
    CreateCheckout,
    SubmitCustomer,
    Queue,
    WaitForProduct,
    AddToCart,
    ShippingRates,
    Captcha,
    SubmitPayment,
    CompletePayment,
    ProcessPayment,
    Swap,
    Done,
    Error,
    Abort,
}

impl CheckoutState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutState::Login => "LOGIN",
            CheckoutState::GetSiteData => "GET_SITE_DATA",
            CheckoutState::CreateCheckout => "CREATE_CHECKOUT",
            CheckoutState::SubmitCustomer => "SUBMIT_CUSTOMER",
            CheckoutState::Queue => "QUEUE",
            CheckoutState::WaitForProduct => "WAIT_FOR_PRODUCT",
            CheckoutState::AddToCart => "ADD_TO_CART",
            CheckoutState::ShippingRates => "SHIPPING_RATES",
            CheckoutState::Captcha => "CAPTCHA",
            CheckoutState::SubmitPayment => "SUBMIT_PAYMENT",
            CheckoutState::CompletePayment => "COMPLETE_PAYMENT",
            CheckoutState::ProcessPayment => "PROCESS_PAYMENT",
            CheckoutState::Swap => "SWAP",
            CheckoutState::Done => "DONE",
            CheckoutState::Error => "ERROR",
            CheckoutState::Abort => "ABORT",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CheckoutState::Done | CheckoutState::Error | CheckoutState::Abort
        )
    }

    /// Status line shown while this step's request is in flight.
    pub fn label(&self) -> Option<&'static str> {
        match self {
            CheckoutState::Login => Some("Logging in"),
            CheckoutState::GetSiteData => Some("Fetching site data"),
            CheckoutState::CreateCheckout => Some("Creating checkout"),
            CheckoutState::SubmitCustomer => Some("Submitting information"),
            CheckoutState::Queue => Some("Polling queue"),
            CheckoutState::AddToCart => Some("Adding to cart"),
            CheckoutState::ShippingRates => Some("Fetching shipping rates"),
            CheckoutState::SubmitPayment => Some("Submitting payment"),
            CheckoutState::CompletePayment => Some("Completing payment"),
            CheckoutState::ProcessPayment => Some("Processing payment"),
            _ => None,
        }
    }
}

/// What the checkout has learned so far.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub api_key: Option<String>,
    pub logged_in: bool,
    pub checkout_url: Option<String>,
    pub variant_id: Option<String>,
    pub product_title: Option<String>,
    pub size: Option<String>,
    pub carted: bool,
    pub shipping_rate: Option<String>,
    pub payment_session: Option<String>,
    /// Solved CAPTCHA token, consumed by the next request.
    pub captcha_token: Option<String>,
    /// Queue ticket from a throttle redirect.
    pub queue_ticket: Option<String>,
}

/// One checkout step handed to the gateway.
#[derive(Debug, Clone)]
pub struct StepRequest {
    pub step: CheckoutState,
    pub task: Task,
    pub proxy: Option<ProxyLease>,
    pub session: CheckoutSession,
}

/// What came back from a step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepResponse {
    pub status: u16,
    /// `Location` header, if any.
    pub redirect: Option<String>,
    pub body: Value,
    pub retry_after: Option<Duration>,
}

impl StepResponse {
    pub fn ok(body: Value) -> Self {
        Self {
            status: 200,
            body,
            ..Default::default()
        }
    }

    pub fn redirect(status: u16, location: impl Into<String>) -> Self {
        Self {
            status,
            redirect: Some(location.into()),
            body: Value::Null,
            retry_after: None,
        }
    }

    /// String at a JSON pointer, e.g. `/checkout/web_url`.
    pub fn text(&self, pointer: &str) -> Option<String> {
        match self.body.pointer(pointer)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Errors from the checkout gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Transport failure. Retried.
    #[error("network error: {0:?}")]
    Network(NetworkErrorKind),

    /// The response could not be read. Retried.
    #[error("invalid response: {0}")]
    Response(String),

    /// The request could not be built from the session. Fatal.
    #[error("invalid request: {0}")]
    Request(String),
}

/// Timing knobs for the checkout runner.
#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub captcha_poll: Duration,
    pub wait_for_product_poll: Duration,
    pub queue_retry: Duration,
    pub swap_timeout: Duration,
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        Self {
            captcha_poll: Duration::from_millis(500),
            wait_for_product_poll: Duration::from_millis(500),
            queue_retry: Duration::from_millis(2500),
            swap_timeout: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_state_names_and_terminals() {
        assert_eq!(CheckoutState::GetSiteData.as_str(), "GET_SITE_DATA");
        assert_eq!(
            serde_json::to_string(&CheckoutState::WaitForProduct).unwrap(),
            r#""WAIT_FOR_PRODUCT""#
        );
        assert!(CheckoutState::Abort.is_terminal());
        assert!(!CheckoutState::Swap.is_terminal());
        assert_eq!(CheckoutState::Captcha.label(), None);
    }

    #[test]
    fn test_response_text_lookup() {
        let response = StepResponse::ok(json!({
            "checkout": { "web_url": "https://shop.example/1/checkouts/abc" },
            "shipping_rates": [{ "id": 42 }],
            "empty": ""
        }));
        assert_eq!(
            response.text("/checkout/web_url").as_deref(),
            Some("https://shop.example/1/checkouts/abc")
        );
        assert_eq!(response.text("/shipping_rates/0/id").as_deref(), Some("42"));
        assert_eq!(response.text("/empty"), None);
        assert_eq!(response.text("/missing"), None);
    }
}
