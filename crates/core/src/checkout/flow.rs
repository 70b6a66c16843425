//! Step ordering for the two checkout modes.

use super::types::CheckoutState;
use crate::task::{CheckoutMode, Task};

/// First protocol step once site data and login are out of the way.
pub fn first_step(mode: CheckoutMode) -> CheckoutState {
    match mode {
        CheckoutMode::Fast => CheckoutState::CreateCheckout,
        CheckoutMode::Safe => CheckoutState::WaitForProduct,
    }
}

/// Where a task's checkout begins.
pub fn start_state(task: &Task) -> CheckoutState {
    if task.site.api_key.is_none() {
        CheckoutState::GetSiteData
    } else if task.account.is_some() {
        CheckoutState::Login
    } else {
        first_step(task.mode)
    }
}

/// The step that follows a successful `state`.
///
/// Control states (queue, captcha, swap) and terminals map to themselves;
/// the runner resumes them explicitly.
pub fn successor(state: CheckoutState, task: &Task) -> CheckoutState {
    use CheckoutMode::{Fast, Safe};
    use CheckoutState::*;

    match (state, task.mode) {
        (GetSiteData, mode) if task.account.is_none() => first_step(mode),
        (GetSiteData, _) => Login,
        (Login, mode) => first_step(mode),
        (CreateCheckout, _) => SubmitCustomer,
        (SubmitCustomer, Fast) => WaitForProduct,
        (SubmitCustomer, Safe) => ShippingRates,
        (WaitForProduct, _) => AddToCart,
        (AddToCart, Fast) => ShippingRates,
        (AddToCart, Safe) => CreateCheckout,
        (ShippingRates, _) => SubmitPayment,
        (SubmitPayment, _) => CompletePayment,
        (CompletePayment, _) => ProcessPayment,
        (ProcessPayment, _) => Done,
        (other, _) => other,
    }
}

/// CAPTCHA priority for a challenge raised in `state`. Lower is served first.
pub fn captcha_priority(state: CheckoutState) -> u32 {
    match state {
        CheckoutState::SubmitPayment | CheckoutState::CompletePayment => 0,
        _ => 1,
    }
}
