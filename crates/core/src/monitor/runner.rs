//! Monitor state machine.
//!
//! One monitor serves every task subscribed to its [`MonitorKey`]. Each
//! round it looks the product up, resolves variants per subscriber and
//! reports the subscribers it could serve. It finishes once nobody is left
//! waiting.
//!
//! [`MonitorKey`]: crate::task::MonitorKey

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use super::config::MonitorConfig;
use super::parser::{ParseRequest, ParserSet};
use super::types::{MonitorState, ParseFailure, Product, ProductFound, Resolution, Variant};
use super::variants::{resolve_variants, SizeRule};
use crate::context::RunnerContext;
use crate::failure::FailureClass;
use crate::machine::{drive, Cursor, Pause, RunnerError, StateMachine, Transition};
use crate::metrics::MONITOR_PARSES;
use crate::race::race_first_success;
use crate::task::{DelayKind, ProductSelector, SelectorKind, Task, TaskId};

/// One task waiting on a monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub task_id: TaskId,
    pub sizes: Vec<String>,
    pub random_in_stock: bool,
}

impl Subscription {
    pub fn for_task(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            sizes: task.sizes.clone(),
            random_in_stock: task.random_in_stock,
        }
    }
}

/// Subscriber set shared between a monitor and the orchestrator.
pub type Subscribers = Arc<RwLock<BTreeMap<TaskId, Subscription>>>;

/// Static settings for a monitor.
#[derive(Debug, Clone, Default)]
pub struct MonitorSettings {
    pub config: MonitorConfig,
    pub size_rule: SizeRule,
    pub swap_timeout: Duration,
}

pub struct Monitor {
    ctx: Arc<RunnerContext>,
    parsers: ParserSet,
    subscribers: Subscribers,
    served: HashSet<TaskId>,
    settings: MonitorSettings,
    /// Proxy being replaced while in `SWAP`.
    swap_from: Option<Option<String>>,
}

impl Monitor {
    pub fn new(
        ctx: Arc<RunnerContext>,
        parsers: ParserSet,
        subscribers: Subscribers,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            ctx,
            parsers,
            subscribers,
            served: HashSet::new(),
            settings,
            swap_from: None,
        }
    }

    /// Drive the monitor to a terminal state.
    pub async fn run(mut self) -> MonitorState {
        let cursor = drive(&mut self, MonitorState::Parse).await;
        info!(
            "Monitor {} finished in {} after {:?}",
            self.ctx.runner_id(),
            cursor.current.as_str(),
            cursor.history
        );
        cursor.current
    }

    fn kind(&self, task: &Task) -> SelectorKind {
        match &task.selector {
            ProductSelector::Variant { .. } => SelectorKind::Variant,
            _ if self.parsers.special.is_some() => SelectorKind::Special,
            selector => selector.kind(),
        }
    }

    fn pending(&self) -> Vec<Subscription> {
        self.subscribers
            .read()
            .unwrap()
            .values()
            .filter(|s| !self.served.contains(&s.task_id))
            .cloned()
            .collect()
    }

    async fn lookup(&self, task: &Task, kind: SelectorKind) -> Result<Product, ParseFailure> {
        let request = ParseRequest {
            site: task.site.clone(),
            selector: task.selector.clone(),
            proxy: self.ctx.proxy(),
            config: self.settings.config.clone(),
        };

        match (kind, &task.selector) {
            (SelectorKind::Variant, ProductSelector::Variant { id }) => Ok(Product {
                title: format!("Variant {}", id),
                variants: vec![Variant {
                    id: id.clone(),
                    available: true,
                    ..Default::default()
                }],
                ..Default::default()
            }),
            (SelectorKind::Special, _) => match &self.parsers.special {
                Some(parser) => parser.run(&request).await,
                None => Err(ParseFailure::Other("no site adapter configured".into())),
            },
            (SelectorKind::Url, _) => match &self.parsers.detail {
                Some(parser) => parser.run(&request).await,
                None => self.race_feeds(&request).await,
            },
            _ => self.race_feeds(&request).await,
        }
    }

    async fn race_feeds(&self, request: &ParseRequest) -> Result<Product, ParseFailure> {
        let attempts = self.parsers.feeds.iter().map(|p| p.run(request));
        race_first_success(attempts).await.map_err(|e| {
            debug!("Monitor {} lost every feed: {}", self.ctx.runner_id(), e);
            ParseFailure::dominant(e.errors())
                .cloned()
                .unwrap_or(ParseFailure::ProductMissing)
        })
    }

    fn delay_ms(&self, kind: DelayKind) -> u128 {
        self.ctx.delay_for(kind).as_millis()
    }

    fn publish(&mut self, product: Product, kind: SelectorKind) -> Transition<MonitorState> {
        let mut rng = rand::thread_rng();
        let mut resolutions = Vec::new();
        let mut waiting = 0usize;

        for subscription in self.pending() {
            let resolved = if kind == SelectorKind::Variant {
                Ok(product.variants.clone())
            } else {
                resolve_variants(
                    &product.variants,
                    &subscription.sizes,
                    &self.settings.size_rule,
                    subscription.random_in_stock,
                    &mut rng,
                )
            };

            let variants = match resolved {
                Ok(variants) => variants,
                // The size does not exist; the task fails on an empty list.
                Err(ParseFailure::VariantsNotMatched) => Vec::new(),
                Err(_) => {
                    waiting += 1;
                    continue;
                }
            };
            resolutions.push(Resolution {
                task_id: subscription.task_id,
                found: ProductFound {
                    product: product.clone(),
                    variants,
                    kind,
                },
            });
        }

        if !resolutions.is_empty() {
            MONITOR_PARSES.with_label_values(&["found"]).inc();
            for resolution in &resolutions {
                self.served.insert(resolution.task_id.clone());
            }
            info!(
                "Monitor {} found '{}' for {} task(s)",
                self.ctx.runner_id(),
                product.title,
                resolutions.len()
            );
            self.ctx.link().report(resolutions);
        }

        if waiting > 0 {
            MONITOR_PARSES.with_label_values(&["out_of_stock"]).inc();
            return Transition::to(MonitorState::Parse)
                .message(format!("Out of stock! Delaying {}ms", self.delay_ms(DelayKind::Monitor)))
                .pause(Pause::Delay(DelayKind::Monitor));
        }
        Transition::to(MonitorState::Done).message(format!("Product found: {}", product.title))
    }

    fn on_failure(&self, failure: ParseFailure) -> Transition<MonitorState> {
        let class = failure.class();
        let retry = |message: &str, kind: DelayKind| {
            Transition::to(MonitorState::Parse)
                .message(format!("{} Delaying {}ms", message, self.delay_ms(kind)))
                .pause(Pause::Delay(kind))
        };

        let result = match class {
            FailureClass::Cancelled => "aborted",
            FailureClass::RateLimited | FailureClass::Blocked => "swap",
            FailureClass::NotFound | FailureClass::NotLive | FailureClass::PasswordWall => "not_found",
            FailureClass::OutOfStock => "out_of_stock",
            _ => "error",
        };
        MONITOR_PARSES.with_label_values(&[result]).inc();

        match class {
            FailureClass::Cancelled => Transition::to(MonitorState::Abort),
            FailureClass::RateLimited | FailureClass::Blocked => Transition::to(MonitorState::Swap)
                .message("Proxy banned!")
                .ban(class.ban_level()),
            FailureClass::NotFound => retry("No product found.", DelayKind::Monitor),
            FailureClass::NotLive => retry("Product not live.", DelayKind::Monitor),
            FailureClass::PasswordWall => retry("Password page.", DelayKind::Monitor),
            FailureClass::OutOfStock => retry("Out of stock!", DelayKind::Monitor),
            FailureClass::SelectorUnsatisfiable => {
                Transition::to(MonitorState::Error).message("No variants matched")
            }
            FailureClass::RetryableNetwork => retry("Connection issues.", DelayKind::Error),
            FailureClass::ServerError | FailureClass::Queue | FailureClass::Unexpected => {
                retry(&format!("Monitor error: {}.", failure), DelayKind::Error)
            }
        }
    }

    async fn handle_parse(&mut self) -> Transition<MonitorState> {
        let task = self.ctx.task();
        let kind = self.kind(&task);

        if self.pending().is_empty() {
            return Transition::to(MonitorState::Done);
        }

        let result = match self.ctx.until_aborted(self.lookup(&task, kind)).await {
            Some(result) => result,
            None => Err(ParseFailure::Aborted),
        };
        match result {
            Ok(product) => self.publish(product, kind),
            Err(failure) => self.on_failure(failure),
        }
    }

    async fn handle_swap(&mut self, cursor: &mut Cursor<MonitorState>) -> Transition<MonitorState> {
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
                Transition::to(MonitorState::Parse)
                    .message(format!("Swapped proxy to: {}", lease.display_host()))
            }
            None if self.ctx.is_aborted() => Transition::to(MonitorState::Abort),
            None if !had_proxy => {
                cursor.pending_ban = Default::default();
                Transition::to(MonitorState::Parse).message("Swapped proxy to: localhost")
            }
            None => Transition::to(MonitorState::Swap)
                .message(format!(
                    "No open proxy! Delaying {}ms",
                    self.delay_ms(DelayKind::Error)
                ))
                .pause(Pause::Delay(DelayKind::Error)),
        };
        if transition.next != MonitorState::Swap {
            self.swap_from = None;
        }
        transition
    }
}

#[async_trait]
impl StateMachine for Monitor {
    type State = MonitorState;

    const ABORT: MonitorState = MonitorState::Abort;
    const ERROR: MonitorState = MonitorState::Error;
    const SWAP: MonitorState = MonitorState::Swap;

    fn context(&self) -> &RunnerContext {
        &self.ctx
    }

    fn is_terminal(state: MonitorState) -> bool {
        matches!(
            state,
            MonitorState::Done | MonitorState::Error | MonitorState::Abort
        )
    }

    fn state_name(state: MonitorState) -> &'static str {
        state.as_str()
    }

    fn final_message(state: MonitorState) -> &'static str {
        match state {
            MonitorState::Done => "Monitor has finished",
            MonitorState::Abort => "Monitor has aborted",
            _ => "Monitor has errored out",
        }
    }

    async fn step(
        &mut self,
        cursor: &mut Cursor<MonitorState>,
    ) -> Result<Transition<MonitorState>, RunnerError> {
        match cursor.current {
            MonitorState::Parse => Ok(self.handle_parse().await),
            MonitorState::Swap => Ok(self.handle_swap(cursor).await),
            state => Err(RunnerError::new(state, "no handler for terminal state")),
        }
    }
}
