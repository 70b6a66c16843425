//! Checkout runners.
//!
//! A [`Checkout`] walks one task through the storefront's purchase steps.
//! Requests go through a [`CheckoutGateway`]; the runner only decides what
//! each response means.

mod flow;
mod gateway;
mod runner;
mod types;

pub use flow::{captcha_priority, first_step, start_state, successor};
pub use gateway::{CheckoutGateway, Forms, HttpGateway, PreparedRequest, StorefrontForms};
pub use runner::Checkout;
pub use types::{
    CheckoutSession, CheckoutSettings, CheckoutState, GatewayError, StepRequest, StepResponse,
};
