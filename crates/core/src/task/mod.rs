//! Purchase tasks and their product selectors.

mod key;
mod types;

pub use key::{MonitorKey, NormalizedSelector};
pub use types::{
    Account, Address, CheckoutMode, Delays, DelayKind, Hook, HookKind, Payment, Platform,
    ProductSelector, Profile, SelectorKind, Site, Task, TaskId,
};
