//! CAPTCHA harvest brokering.
//!
//! Runners that hit a CAPTCHA register as waiters for the site key. The
//! external solver integration listens for [`HarvestSignal`]s and posts
//! solved tokens back through [`CaptchaBroker::deliver`].

mod broker;
mod types;

pub use broker::CaptchaBroker;
pub use types::{CaptchaToken, CaptchaWaiter, HarvestSignal, HarvestState};
