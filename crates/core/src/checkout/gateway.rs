//! Checkout gateway: turns a step into an HTTP exchange.
//!
//! [`Forms`] decides what a step sends; [`HttpGateway`] sends it through
//! the runner's proxy and reports what came back without following
//! redirects.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, LOCATION, RETRY_AFTER};
use reqwest::{redirect, Client, Method};
use serde_json::{json, Value};
use tracing::debug;

use super::types::{CheckoutState, GatewayError, StepRequest, StepResponse};
use crate::failure::NetworkErrorKind;

/// Executes checkout steps.
#[async_trait]
pub trait CheckoutGateway: Send + Sync {
    async fn execute(&self, request: StepRequest) -> Result<StepResponse, GatewayError>;

    /// Drop any per-task connection state.
    async fn release(&self, _task_id: &str) {}
}

/// A request ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl PreparedRequest {
    fn new(method: Method, url: String) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: None,
        }
    }

    fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Builds the request for a step.
pub trait Forms: Send + Sync {
    fn prepare(&self, request: &StepRequest) -> Result<PreparedRequest, GatewayError>;
}

/// Generic storefront forms.
#[derive(Debug, Clone, Default)]
pub struct StorefrontForms;

fn address(a: &crate::task::Address) -> Value {
    json!({
        "first_name": a.first_name,
        "last_name": a.last_name,
        "address1": a.address1,
        "address2": a.address2,
        "city": a.city,
        "province": a.province,
        "zip": a.zip,
        "country": a.country,
        "phone": a.phone,
    })
}

impl Forms for StorefrontForms {
    fn prepare(&self, request: &StepRequest) -> Result<PreparedRequest, GatewayError> {
        let base = request.task.site.url.trim_end_matches('/');
        let session = &request.session;
        let checkout = || {
            session
                .checkout_url
                .clone()
                .ok_or_else(|| GatewayError::Request("no checkout yet".into()))
        };

        let prepared = match request.step {
            CheckoutState::GetSiteData => {
                PreparedRequest::new(Method::GET, format!("{}/payments/config.json", base))
            }
            CheckoutState::Login => {
                let account = request
                    .task
                    .account
                    .as_ref()
                    .ok_or_else(|| GatewayError::Request("task has no account".into()))?;
                PreparedRequest::new(Method::POST, format!("{}/account/login", base)).json(json!({
                    "customer": { "email": account.username, "password": account.password },
                }))
            }
            CheckoutState::CreateCheckout => {
                let mut prepared =
                    PreparedRequest::new(Method::POST, format!("{}/api/checkouts.json", base))
                        .json(json!({ "checkout": {} }));
                if let Some(key) = &session.api_key {
                    prepared = prepared.header("X-Shopify-Storefront-Access-Token", key.clone());
                }
                prepared
            }
            CheckoutState::SubmitCustomer => {
                let profile = &request.task.profile;
                PreparedRequest::new(Method::PATCH, format!("{}.json", checkout()?)).json(json!({
                    "checkout": {
                        "email": profile.email,
                        "shipping_address": address(&profile.shipping),
                        "billing_address": address(profile.billing_address()),
                    },
                }))
            }
            CheckoutState::Queue => {
                let mut url = format!("{}/checkout/poll?js_poll=1", base);
                if let Some(ticket) = &session.queue_ticket {
                    url.push_str(&format!("&_ctd={}", ticket));
                }
                PreparedRequest::new(Method::GET, url)
            }
            CheckoutState::AddToCart => {
                let variant = session
                    .variant_id
                    .clone()
                    .ok_or_else(|| GatewayError::Request("no variant selected".into()))?;
                PreparedRequest::new(Method::POST, format!("{}/cart/add.js", base))
                    .json(json!({ "id": variant, "quantity": 1 }))
            }
            CheckoutState::ShippingRates => {
                PreparedRequest::new(Method::GET, format!("{}/shipping_rates.json", checkout()?))
            }
            CheckoutState::SubmitPayment => {
                let payment = &request.task.profile.payment;
                PreparedRequest::new(Method::POST, format!("{}/payments/sessions", base)).json(json!({
                    "credit_card": {
                        "number": payment.number,
                        "name": payment.holder,
                        "month": payment.exp_month,
                        "year": payment.exp_year,
                        "verification_value": payment.cvv,
                    },
                }))
            }
            CheckoutState::CompletePayment => {
                let payment_session = session
                    .payment_session
                    .clone()
                    .ok_or_else(|| GatewayError::Request("no payment session".into()))?;
                PreparedRequest::new(Method::POST, format!("{}/payments.json", checkout()?)).json(json!({
                    "payment": {
                        "session_id": payment_session,
                        "shipping_rate": session.shipping_rate,
                    },
                }))
            }
            CheckoutState::ProcessPayment => {
                PreparedRequest::new(Method::GET, format!("{}/payments.json", checkout()?))
            }
            other => {
                return Err(GatewayError::Request(format!(
                    "{} has no request",
                    other.as_str()
                )))
            }
        };

        Ok(match &session.captcha_token {
            Some(token) => prepared.header("X-Captcha-Response", token.clone()),
            None => prepared,
        })
    }
}

fn network(error: reqwest::Error) -> GatewayError {
    GatewayError::Network(NetworkErrorKind::from_reqwest(&error))
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// reqwest-backed gateway. Keeps one cookie-carrying client per task and
/// proxy.
pub struct HttpGateway {
    forms: Box<dyn Forms>,
    timeout: Duration,
    clients: Mutex<HashMap<(String, Option<String>), Client>>,
}

impl std::fmt::Debug for HttpGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGateway")
            .field("timeout", &self.timeout)
            .field("clients", &self.clients.lock().unwrap().len())
            .finish()
    }
}

impl HttpGateway {
    pub fn new(forms: Box<dyn Forms>, timeout: Duration) -> Self {
        Self {
            forms,
            timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client(&self, request: &StepRequest) -> Result<Client, GatewayError> {
        let proxy_url = request.proxy.as_ref().map(|p| p.url.clone());
        let key = (request.task.id.clone(), proxy_url.clone());
        let mut clients = self.clients.lock().unwrap();
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = Client::builder()
            .timeout(self.timeout)
            .cookie_store(true)
            .redirect(redirect::Policy::none());
        if let Some(url) = &proxy_url {
            let proxy = reqwest::Proxy::all(url)
                .map_err(|e| GatewayError::Request(format!("invalid proxy: {}", e)))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| GatewayError::Request(format!("failed to build client: {}", e)))?;
        clients.insert(key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl CheckoutGateway for HttpGateway {
    async fn execute(&self, request: StepRequest) -> Result<StepResponse, GatewayError> {
        let prepared = self.forms.prepare(&request)?;
        let client = self.client(&request)?;
        debug!(
            "Task {} {} {} {}",
            request.task.id,
            request.step.as_str(),
            prepared.method,
            prepared.url
        );

        let mut builder = client.request(prepared.method, &prepared.url);
        for (name, value) in &prepared.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &prepared.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(network)?;
        let status = response.status().as_u16();
        let redirect = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let retry_after = retry_after(response.headers());
        let text = response.text().await.map_err(network)?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        Ok(StepResponse {
            status,
            redirect,
            body,
            retry_after,
        })
    }

    async fn release(&self, task_id: &str) {
        self.clients
            .lock()
            .unwrap()
            .retain(|(owner, _), _| owner != task_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkout::CheckoutSession;
    use crate::testing::fixtures;

    fn request(step: CheckoutState, session: CheckoutSession) -> StepRequest {
        StepRequest {
            step,
            task: fixtures::keyword_task("t1"),
            proxy: None,
            session,
        }
    }

    #[test]
    fn test_add_to_cart_needs_variant() {
        let forms = StorefrontForms;
        let err = forms
            .prepare(&request(CheckoutState::AddToCart, CheckoutSession::default()))
            .unwrap_err();
        assert!(matches!(err, GatewayError::Request(_)));

        let session = CheckoutSession {
            variant_id: Some("11".into()),
            ..Default::default()
        };
        let prepared = forms.prepare(&request(CheckoutState::AddToCart, session)).unwrap();
        assert_eq!(prepared.method, Method::POST);
        assert!(prepared.url.ends_with("/cart/add.js"));
        assert_eq!(prepared.body.unwrap()["id"], "11");
    }

    #[test]
    fn test_checkout_steps_use_checkout_url() {
        let session = CheckoutSession {
            checkout_url: Some("https://shop.example/1/checkouts/abc".into()),
            ..Default::default()
        };
        let prepared = StorefrontForms
            .prepare(&request(CheckoutState::ShippingRates, session))
            .unwrap();
        assert_eq!(
            prepared.url,
            "https://shop.example/1/checkouts/abc/shipping_rates.json"
        );
    }

    #[test]
    fn test_captcha_token_is_attached() {
        let session = CheckoutSession {
            checkout_url: Some("https://shop.example/1/checkouts/abc".into()),
            payment_session: Some("ps".into()),
            captcha_token: Some("tok".into()),
            ..Default::default()
        };
        let prepared = StorefrontForms
            .prepare(&request(CheckoutState::CompletePayment, session))
            .unwrap();
        assert!(prepared
            .headers
            .contains(&("X-Captcha-Response".to_string(), "tok".to_string())));
    }

    #[test]
    fn test_control_states_have_no_request() {
        for step in [CheckoutState::Captcha, CheckoutState::Swap, CheckoutState::WaitForProduct] {
            assert!(StorefrontForms
                .prepare(&request(step, CheckoutSession::default()))
                .is_err());
        }
    }

    #[test]
    fn test_retry_after_header() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, "3".parse().unwrap());
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(3)));
        headers.insert(RETRY_AFTER, "Wed, 21 Oct 2015 07:28:00 GMT".parse().unwrap());
        assert_eq!(retry_after(&headers), None);
    }
}
