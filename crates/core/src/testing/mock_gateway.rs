//! Mock checkout gateway for testing.

use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;

use crate::checkout::{CheckoutGateway, CheckoutState, GatewayError, StepRequest, StepResponse};

/// Mock implementation of the CheckoutGateway trait.
///
/// Each step answers from its own queue of scripted responses and falls
/// back to a successful default once the queue is empty, so a test only
/// scripts the steps it cares about.
#[derive(Debug, Default)]
pub struct MockGateway {
    scripted: Mutex<HashMap<CheckoutState, VecDeque<Result<StepResponse, GatewayError>>>>,
    requests: Mutex<Vec<StepRequest>>,
    released: Mutex<Vec<String>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for the next `step` request.
    pub async fn push(&self, step: CheckoutState, response: Result<StepResponse, GatewayError>) {
        self.scripted
            .lock()
            .await
            .entry(step)
            .or_default()
            .push_back(response);
    }

    /// Steps requested so far, in order.
    pub async fn calls(&self) -> Vec<CheckoutState> {
        self.requests.lock().await.iter().map(|r| r.step).collect()
    }

    /// Every request seen so far.
    pub async fn requests(&self) -> Vec<StepRequest> {
        self.requests.lock().await.clone()
    }

    /// Task ids whose connection state was released.
    pub async fn released(&self) -> Vec<String> {
        self.released.lock().await.clone()
    }

    fn default_response(step: CheckoutState) -> StepResponse {
        let body = match step {
            CheckoutState::GetSiteData => json!({ "api_key": "key" }),
            CheckoutState::CreateCheckout => json!({
                "checkout": { "web_url": "https://shop.example/1/checkouts/abc" }
            }),
            CheckoutState::ShippingRates => json!({ "shipping_rates": [{ "id": "rate-1" }] }),
            CheckoutState::SubmitPayment => json!({ "id": "session-1" }),
            CheckoutState::ProcessPayment => json!({ "status": "success" }),
            _ => json!({}),
        };
        StepResponse::ok(body)
    }
}

#[async_trait]
impl CheckoutGateway for MockGateway {
    async fn execute(&self, request: StepRequest) -> Result<StepResponse, GatewayError> {
        let step = request.step;
        self.requests.lock().await.push(request);
        let scripted = self
            .scripted
            .lock()
            .await
            .get_mut(&step)
            .and_then(|queue| queue.pop_front());
        scripted.unwrap_or_else(|| Ok(Self::default_response(step)))
    }

    async fn release(&self, task_id: &str) {
        self.released.lock().await.push(task_id.to_string());
    }
}
