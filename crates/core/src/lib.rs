pub mod captcha;
pub mod checkout;
pub mod config;
pub mod context;
pub mod events;
pub mod failure;
pub mod handoff;
pub mod machine;
pub mod manager;
pub mod metrics;
pub mod monitor;
pub mod notify;
pub mod proxy;
pub mod race;
pub mod task;
pub mod testing;

pub use captcha::{CaptchaBroker, CaptchaToken, HarvestSignal, HarvestState};
pub use checkout::{
    Checkout, CheckoutGateway, CheckoutState, GatewayError, HttpGateway, StorefrontForms,
};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use context::RunnerContext;
pub use events::{ControlEnvelope, ControlEvent, RunnerKind, StatusEvent, Target};
pub use handoff::{HandoffError, HandoffQueue};
pub use manager::{
    Collaborators, ManagerError, ManagerSettings, ManagerStatus, RunnerConfig, TaskManager,
    TaskSummary,
};
pub use monitor::{HttpParserFactory, Monitor, Parser, ParserFactory, Product, ProductFound};
pub use notify::{Notifier, Outcome, WebhookNotifier};
pub use proxy::{BanLevel, ProxyConfig, ProxyError, ProxyLease, ProxyPool, ProxySummary};
pub use race::{race_first_success, RaceError};
pub use task::{Delays, MonitorKey, Platform, ProductSelector, Site, Task, TaskId};
