//! Checkout state machine.
//!
//! Each protocol step is one gateway exchange. Responses are classified
//! once in [`Checkout::exchange`]: bans route to `SWAP`, throttles to
//! `QUEUE`, challenges to `CAPTCHA`, and only ordinary responses reach the
//! per-step handler.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;
use tracing::{info, warn};

use super::flow::{captcha_priority, first_step, start_state, successor};
use super::gateway::CheckoutGateway;
use super::types::{
    CheckoutSession, CheckoutSettings, CheckoutState, GatewayError, StepRequest, StepResponse,
};
use crate::captcha::{CaptchaBroker, CaptchaToken, HarvestState};
use crate::context::RunnerContext;
use crate::failure::{classify_redirect, classify_status, FailureClass, RedirectClass};
use crate::handoff::{TakeRequest, TakeStatus};
use crate::machine::{drive, Cursor, Pause, RunnerError, StateMachine, Transition};
use crate::metrics::{CHECKOUT_STEP_DURATION, TASKS_FINISHED};
use crate::notify::{Notifier, Outcome};
use crate::task::{DelayKind, Task};

/// What an exchange produced.
enum Exchange {
    /// An ordinary response for the step handler.
    Response(StepResponse),
    /// The response was already routed.
    Routed(Transition<CheckoutState>),
}

pub struct Checkout {
    ctx: Arc<RunnerContext>,
    gateway: Arc<dyn CheckoutGateway>,
    broker: Arc<CaptchaBroker>,
    notifier: Option<Arc<dyn Notifier>>,
    settings: CheckoutSettings,
    session: CheckoutSession,
    /// Step that was sent to the queue.
    queued_from: Option<CheckoutState>,
    /// Step that raised the pending captcha.
    challenged_from: Option<CheckoutState>,
    captcha: Option<(String, TakeRequest<CaptchaToken>)>,
    /// Proxy being replaced while in `SWAP`.
    swap_from: Option<Option<String>>,
    started: Instant,
}

impl Checkout {
    pub fn new(
        ctx: Arc<RunnerContext>,
        gateway: Arc<dyn CheckoutGateway>,
        broker: Arc<CaptchaBroker>,
        notifier: Option<Arc<dyn Notifier>>,
        settings: CheckoutSettings,
    ) -> Self {
        let session = CheckoutSession {
            api_key: ctx.task().site.api_key,
            ..Default::default()
        };
        Self {
            ctx,
            gateway,
            broker,
            notifier,
            settings,
            session,
            queued_from: None,
            challenged_from: None,
            captcha: None,
            swap_from: None,
            started: Instant::now(),
        }
    }

    /// Drive the checkout to a terminal state and release what it holds.
    pub async fn run(mut self) -> CheckoutState {
        let start = start_state(&self.ctx.task());
        let cursor = drive(&mut self, start).await;

        let outcome = match cursor.current {
            CheckoutState::Done => "done",
            CheckoutState::Abort => "abort",
            _ => "error",
        };
        TASKS_FINISHED.with_label_values(&[outcome]).inc();
        info!(
            "Task {} finished in {} after {:?}",
            self.ctx.task_id(),
            cursor.current.as_str(),
            cursor.history
        );
        cursor.current
    }

    pub fn session(&self) -> &CheckoutSession {
        &self.session
    }

    fn delay_ms(&self, kind: DelayKind) -> u128 {
        self.ctx.delay_for(kind).as_millis()
    }

    /// Re-enter `step` after the task delay of `kind`.
    fn retry(&self, step: CheckoutState, message: &str, kind: DelayKind) -> Transition<CheckoutState> {
        Transition::to(step)
            .message(format!("{} Delaying {}ms", message, self.delay_ms(kind)))
            .pause(Pause::Delay(kind))
    }

    fn rejected(&self, step: CheckoutState, response: &StepResponse) -> Transition<CheckoutState> {
        self.retry(
            step,
            &format!("Request failed ({}).", response.status),
            DelayKind::Error,
        )
    }

    fn advance(&self, step: CheckoutState) -> Transition<CheckoutState> {
        Transition::to(successor(step, &self.ctx.task()))
    }

    async fn exchange(&mut self, step: CheckoutState) -> Result<Exchange, RunnerError> {
        if let Some(label) = step.label() {
            self.ctx.emit_status(label);
        }

        let request = StepRequest {
            step,
            task: self.ctx.task(),
            proxy: self.ctx.proxy(),
            session: self.session.clone(),
        };
        let timer = CHECKOUT_STEP_DURATION
            .with_label_values(&[step.as_str()])
            .start_timer();
        let result = self.ctx.until_aborted(self.gateway.execute(request)).await;
        timer.observe_duration();

        let response = match result {
            None => return Ok(Exchange::Routed(Transition::to(CheckoutState::Abort))),
            Some(Ok(response)) => response,
            Some(Err(GatewayError::Network(kind))) => {
                warn!("Task {} {} network error: {:?}", self.ctx.task_id(), step.as_str(), kind);
                return Ok(Exchange::Routed(self.retry(step, "Connection issues.", DelayKind::Error)));
            }
            Some(Err(GatewayError::Response(reason))) => {
                warn!("Task {} {} bad response: {}", self.ctx.task_id(), step.as_str(), reason);
                return Ok(Exchange::Routed(self.retry(step, "Invalid response.", DelayKind::Error)));
            }
            Some(Err(GatewayError::Request(reason))) => return Err(RunnerError::new(step, reason)),
        };

        self.session.captcha_token = None;
        Ok(self.route(step, response))
    }

    fn route(&mut self, step: CheckoutState, response: StepResponse) -> Exchange {
        match classify_status(response.status) {
            Some(class @ (FailureClass::RateLimited | FailureClass::Blocked)) => {
                return Exchange::Routed(
                    Transition::to(CheckoutState::Swap)
                        .message("Proxy banned!")
                        .ban(class.ban_level()),
                );
            }
            Some(FailureClass::Queue) => return Exchange::Routed(self.queued(step, &response)),
            Some(FailureClass::PasswordWall) => {
                return Exchange::Routed(self.retry(step, "Password page.", DelayKind::Monitor))
            }
            Some(FailureClass::ServerError) => {
                return Exchange::Routed(self.retry(step, "Site error.", DelayKind::Error))
            }
            _ => {}
        }

        let location = match response.redirect.clone() {
            Some(location) => location,
            None => return Exchange::Response(response),
        };
        let transition = match classify_redirect(&location) {
            RedirectClass::Password => self.retry(step, "Password page.", DelayKind::Monitor),
            RedirectClass::Queue => self.queued(step, &response),
            RedirectClass::Challenge => {
                self.challenged_from = Some(step);
                Transition::to(CheckoutState::Captcha)
            }
            RedirectClass::StockProblems => self.retry(step, "Out of stock!", DelayKind::Monitor),
            RedirectClass::Processing if step == CheckoutState::ProcessPayment => {
                self.still_processing()
            }
            RedirectClass::Processing => Transition::to(CheckoutState::ProcessPayment),
            RedirectClass::Complete => {
                Transition::to(CheckoutState::Done).message("Payment successful")
            }
            RedirectClass::Other => return Exchange::Response(response),
        };
        Exchange::Routed(transition)
    }

    fn queued(&mut self, step: CheckoutState, response: &StepResponse) -> Transition<CheckoutState> {
        if let Some(ticket) = response.redirect.as_deref().and_then(queue_ticket) {
            self.session.queue_ticket = Some(ticket);
        }
        if step == CheckoutState::Queue {
            let wait = response.retry_after.unwrap_or(self.settings.queue_retry);
            return Transition::to(CheckoutState::Queue)
                .message(format!("Waiting in queue. Delaying {}ms", wait.as_millis()))
                .pause(Pause::Fixed(wait));
        }
        self.queued_from = Some(step);
        Transition::to(CheckoutState::Queue)
    }

    fn still_processing(&self) -> Transition<CheckoutState> {
        Transition::to(CheckoutState::ProcessPayment)
            .message("Processing payment")
            .pause(Pause::Fixed(self.settings.queue_retry))
    }

    async fn notify(&self, success: bool, message: &str) {
        let (Some(notifier), Some(hook)) = (&self.notifier, self.ctx.hook()) else {
            return;
        };
        let task = self.ctx.task();
        let found = self.ctx.product();
        let variant = found.as_ref().and_then(|f| {
            f.variants
                .iter()
                .find(|v| Some(&v.id) == self.session.variant_id.as_ref())
        });

        let outcome = Outcome {
            task_id: task.id.clone(),
            success,
            site: task.site.name.clone(),
            product: self.session.product_title.clone(),
            price: variant.and_then(|v| v.price.clone()),
            size: self.session.size.clone(),
            image: found.as_ref().and_then(|f| f.product.image.clone()),
            order: self.session.checkout_url.clone(),
            profile: task.profile.name.clone(),
            message: message.to_string(),
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        };
        if let Err(e) = notifier.notify(&hook, &outcome).await {
            warn!("Task {} failed to deliver notification: {}", task.id, e);
        }
    }

    async fn handle_site_data(&mut self) -> Result<Transition<CheckoutState>, RunnerError> {
        let step = CheckoutState::GetSiteData;
        let response = match self.exchange(step).await? {
            Exchange::Response(r) => r,
            Exchange::Routed(t) => return Ok(t),
        };
        if !is_success(&response) {
            return Ok(self.rejected(step, &response));
        }
        match response.text("/api_key") {
            Some(key) => {
                self.session.api_key = Some(key);
                Ok(self.advance(step))
            }
            None => Err(RunnerError::new(step, "site data carried no api key")),
        }
    }

    async fn handle_login(&mut self) -> Result<Transition<CheckoutState>, RunnerError> {
        let step = CheckoutState::Login;
        let response = match self.exchange(step).await? {
            Exchange::Response(r) => r,
            Exchange::Routed(t) => return Ok(t),
        };
        if response.redirect.as_deref().is_some_and(|l| l.contains("/login")) {
            return Ok(Transition::to(CheckoutState::Error).message("Invalid account credentials"));
        }
        if !is_success(&response) {
            return Ok(self.rejected(step, &response));
        }
        self.session.logged_in = true;
        Ok(self.advance(step))
    }

    async fn handle_create_checkout(&mut self) -> Result<Transition<CheckoutState>, RunnerError> {
        let step = CheckoutState::CreateCheckout;
        let response = match self.exchange(step).await? {
            Exchange::Response(r) => r,
            Exchange::Routed(t) => return Ok(t),
        };
        let url = response
            .redirect
            .clone()
            .or_else(|| response.text("/checkout/web_url"));
        match url {
            Some(url) if is_success(&response) => {
                self.session.checkout_url = Some(url);
                Ok(self.advance(step))
            }
            _ => Ok(self.rejected(step, &response)),
        }
    }

    async fn handle_submit_customer(&mut self) -> Result<Transition<CheckoutState>, RunnerError> {
        let step = CheckoutState::SubmitCustomer;
        match self.exchange(step).await? {
            Exchange::Routed(t) => Ok(t),
            Exchange::Response(r) if is_success(&r) => Ok(self.advance(step)),
            Exchange::Response(r) => Ok(self.rejected(step, &r)),
        }
    }

    fn handle_wait_for_product(&mut self) -> Transition<CheckoutState> {
        let step = CheckoutState::WaitForProduct;
        let Some(found) = self.ctx.product() else {
            return Transition::to(step)
                .message("Waiting for product")
                .pause(Pause::Fixed(self.settings.wait_for_product_poll));
        };

        let variant = found
            .variants
            .iter()
            .find(|v| v.available)
            .or_else(|| found.variants.first());
        let Some(variant) = variant else {
            return Transition::to(CheckoutState::Error).message("No variants matched");
        };

        self.session.variant_id = Some(variant.id.clone());
        self.session.size = variant
            .option1
            .clone()
            .or_else(|| Some(variant.title.clone()).filter(|t| !t.is_empty()));
        self.session.product_title = Some(found.product.title.clone());
        info!(
            "Task {} selected variant {} of '{}'",
            self.ctx.task_id(),
            variant.id,
            found.product.title
        );
        self.advance(step)
            .message(format!("Product found: {}", found.product.title))
    }

    async fn handle_add_to_cart(&mut self) -> Result<Transition<CheckoutState>, RunnerError> {
        let step = CheckoutState::AddToCart;
        let response = match self.exchange(step).await? {
            Exchange::Response(r) => r,
            Exchange::Routed(t) => return Ok(t),
        };
        match response.status {
            404 => Ok(self.retry(step, "Variant not live.", DelayKind::Monitor)),
            422 => Ok(self.retry(step, "Out of stock!", DelayKind::Monitor)),
            _ if is_success(&response) => {
                self.session.carted = true;
                Ok(self.advance(step))
            }
            _ => Ok(self.rejected(step, &response)),
        }
    }

    async fn handle_queue(&mut self) -> Result<Transition<CheckoutState>, RunnerError> {
        let step = CheckoutState::Queue;
        let response = match self.exchange(step).await? {
            Exchange::Response(r) => r,
            Exchange::Routed(t) => return Ok(t),
        };
        if !is_success(&response) {
            return Ok(self.rejected(step, &response));
        }
        if response.body.pointer("/passed") == Some(&serde_json::Value::Bool(false)) {
            return Ok(self.queued(step, &response));
        }

        if let Some(url) = response.text("/checkout/web_url") {
            self.session.checkout_url = Some(url);
        }
        self.session.queue_ticket = None;
        let queued = self
            .queued_from
            .take()
            .unwrap_or_else(|| first_step(self.ctx.task().mode));
        // A checkout still has to be created if the queue did not hand one out.
        if queued == CheckoutState::CreateCheckout && self.session.checkout_url.is_none() {
            return Ok(Transition::to(queued));
        }
        Ok(self.advance(queued))
    }

    async fn handle_shipping_rates(&mut self) -> Result<Transition<CheckoutState>, RunnerError> {
        let step = CheckoutState::ShippingRates;
        let response = match self.exchange(step).await? {
            Exchange::Response(r) => r,
            Exchange::Routed(t) => return Ok(t),
        };
        if !is_success(&response) {
            return Ok(self.rejected(step, &response));
        }
        match response.text("/shipping_rates/0/id") {
            Some(rate) => {
                self.session.shipping_rate = Some(rate);
                Ok(self.advance(step))
            }
            None => Ok(Transition::to(step)
                .message("Waiting for shipping rates")
                .pause(Pause::Fixed(self.settings.wait_for_product_poll))),
        }
    }

    async fn handle_submit_payment(&mut self) -> Result<Transition<CheckoutState>, RunnerError> {
        let step = CheckoutState::SubmitPayment;
        let response = match self.exchange(step).await? {
            Exchange::Response(r) => r,
            Exchange::Routed(t) => return Ok(t),
        };
        match response.text("/id") {
            Some(id) if is_success(&response) => {
                self.session.payment_session = Some(id);
                Ok(self.advance(step))
            }
            _ => Ok(self.rejected(step, &response)),
        }
    }

    async fn handle_complete_payment(&mut self) -> Result<Transition<CheckoutState>, RunnerError> {
        let step = CheckoutState::CompletePayment;
        match self.exchange(step).await? {
            Exchange::Routed(t) => Ok(t),
            Exchange::Response(r) if is_success(&r) => Ok(self.advance(step)),
            Exchange::Response(r) => Ok(self.rejected(step, &r)),
        }
    }

    async fn handle_process_payment(&mut self) -> Result<Transition<CheckoutState>, RunnerError> {
        let step = CheckoutState::ProcessPayment;
        let response = match self.exchange(step).await? {
            Exchange::Response(r) => r,
            Exchange::Routed(t) => return Ok(t),
        };
        if !is_success(&response) {
            return Ok(self.rejected(step, &response));
        }

        let status = response
            .text("/payment/status")
            .or_else(|| response.text("/status"))
            .unwrap_or_default()
            .to_lowercase();
        match status.as_str() {
            "success" | "paid" => Ok(Transition::to(CheckoutState::Done).message("Payment successful")),
            "failure" | "failed" | "declined" => {
                self.notify(false, "Payment failed").await;
                Ok(Transition::to(CheckoutState::Error).message("Payment failed"))
            }
            _ => Ok(self.still_processing()),
        }
    }

    async fn handle_captcha(&mut self) -> Transition<CheckoutState> {
        if self.captcha.is_none() {
            let task = self.ctx.task();
            let site_key = captcha_key(&task);
            let priority = captcha_priority(self.challenged_from.unwrap_or(CheckoutState::Captcha));
            // Tokens left from an earlier challenge are stale.
            self.ctx.captcha_queue().clear();
            self.broker
                .start_harvest(
                    self.ctx.runner_id(),
                    &site_key,
                    &task.site.url,
                    priority,
                    Arc::clone(self.ctx.captcha_queue()),
                )
                .await;
            self.ctx.set_harvest_state(HarvestState::Started);
            let request = self.ctx.captcha_queue().take();
            self.captcha = Some((site_key, request));
        }

        let status = match &mut self.captcha {
            Some((_, request)) => request.try_take(),
            None => TakeStatus::Pending,
        };
        match status {
            TakeStatus::Pending => Transition::to(CheckoutState::Captcha)
                .message("Waiting for captcha")
                .pause(Pause::Fixed(self.settings.captcha_poll)),
            TakeStatus::Fulfilled(token) => {
                self.captcha = None;
                self.session.captcha_token = Some(token);
                self.ctx.set_harvest_state(HarvestState::Suspended);
                let resume = self
                    .challenged_from
                    .take()
                    .unwrap_or_else(|| start_state(&self.ctx.task()));
                info!("Task {} received captcha token", self.ctx.task_id());
                Transition::to(resume)
            }
            TakeStatus::Failed(e) => {
                if let Some((site_key, _)) = self.captcha.take() {
                    self.broker.stop_harvest(self.ctx.runner_id(), &site_key).await;
                }
                self.ctx.set_harvest_state(HarvestState::Stopped);
                Transition::to(CheckoutState::Error).message(format!("Captcha failed: {}", e))
            }
        }
    }

    async fn handle_swap(&mut self, cursor: &mut Cursor<CheckoutState>) -> Transition<CheckoutState> {
        let back = cursor
            .previous
            .filter(|s| *s != CheckoutState::Swap)
            .unwrap_or_else(|| start_state(&self.ctx.task()));
        let had_proxy = self.ctx.proxy().is_some();
        let from = self
            .swap_from
            .get_or_insert_with(|| self.ctx.proxy().map(|p| p.id))
            .clone();

        let transition = match self
            .ctx
            .request_swap(cursor.pending_ban, from.as_deref(), self.settings.swap_timeout)
            .await
        {
            Some(lease) => {
                cursor.pending_ban = Default::default();
                Transition::to(back).message(format!("Swapped proxy to: {}", lease.display_host()))
            }
            None if self.ctx.is_aborted() => Transition::to(CheckoutState::Abort),
            None if !had_proxy => {
                cursor.pending_ban = Default::default();
                Transition::to(back).message("Swapped proxy to: localhost")
            }
            None => Transition::to(CheckoutState::Swap)
                .message(format!(
                    "No open proxy! Delaying {}ms",
                    self.delay_ms(DelayKind::Error)
                ))
                .pause(Pause::Delay(DelayKind::Error)),
        };
        if transition.next != CheckoutState::Swap {
            self.swap_from = None;
        }
        transition
    }
}

fn is_success(response: &StepResponse) -> bool {
    (200..400).contains(&response.status)
}

fn captcha_key(task: &Task) -> String {
    task.site
        .captcha_site_key
        .clone()
        .unwrap_or_else(|| task.site.url.clone())
}

fn queue_ticket(location: &str) -> Option<String> {
    let (_, query) = location.split_once('?')?;
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("_ctd="))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl StateMachine for Checkout {
    type State = CheckoutState;

    const ABORT: CheckoutState = CheckoutState::Abort;
    const ERROR: CheckoutState = CheckoutState::Error;
    const SWAP: CheckoutState = CheckoutState::Swap;

    fn context(&self) -> &RunnerContext {
        &self.ctx
    }

    fn is_terminal(state: CheckoutState) -> bool {
        state.is_terminal()
    }

    fn state_name(state: CheckoutState) -> &'static str {
        state.as_str()
    }

    fn final_message(state: CheckoutState) -> &'static str {
        match state {
            CheckoutState::Done => "Task has finished",
            CheckoutState::Abort => "Task has aborted",
            _ => "Task has errored out",
        }
    }

    async fn step(
        &mut self,
        cursor: &mut Cursor<CheckoutState>,
    ) -> Result<Transition<CheckoutState>, RunnerError> {
        let transition = match cursor.current {
            CheckoutState::GetSiteData => self.handle_site_data().await?,
            CheckoutState::Login => self.handle_login().await?,
            CheckoutState::CreateCheckout => self.handle_create_checkout().await?,
            CheckoutState::SubmitCustomer => self.handle_submit_customer().await?,
            CheckoutState::Queue => self.handle_queue().await?,
            CheckoutState::WaitForProduct => self.handle_wait_for_product(),
            CheckoutState::AddToCart => self.handle_add_to_cart().await?,
            CheckoutState::ShippingRates => self.handle_shipping_rates().await?,
            CheckoutState::Captcha => self.handle_captcha().await,
            CheckoutState::SubmitPayment => self.handle_submit_payment().await?,
            CheckoutState::CompletePayment => self.handle_complete_payment().await?,
            CheckoutState::ProcessPayment => self.handle_process_payment().await?,
            CheckoutState::Swap => self.handle_swap(cursor).await,
            state => return Err(RunnerError::new(state, "no handler for terminal state")),
        };

        if transition.next == CheckoutState::Done {
            let message = transition.message.as_deref().unwrap_or("Payment successful");
            self.notify(true, message).await;
        }
        Ok(transition)
    }

    async fn finish(&mut self, _state: CheckoutState) {
        if let Some((site_key, request)) = self.captcha.take() {
            request.cancel();
            self.broker.stop_harvest(self.ctx.runner_id(), &site_key).await;
            self.ctx.set_harvest_state(HarvestState::Stopped);
        }
        self.ctx.captcha_queue().destroy();
        self.gateway.release(self.ctx.task_id()).await;
    }
}
