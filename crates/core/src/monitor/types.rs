//! Product and monitor types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::failure::{FailureClass, NetworkErrorKind};
use crate::task::{SelectorKind, TaskId};

/// One purchasable variant of a product.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub available: bool,
    #[serde(default)]
    pub option1: Option<String>,
    #[serde(default)]
    pub option2: Option<String>,
    #[serde(default)]
    pub option3: Option<String>,
    #[serde(default)]
    pub option4: Option<String>,
}

impl Variant {
    /// Option value by 1-based index.
    pub fn option(&self, index: usize) -> Option<&str> {
        match index {
            1 => self.option1.as_deref(),
            2 => self.option2.as_deref(),
            3 => self.option3.as_deref(),
            4 => self.option4.as_deref(),
            _ => None,
        }
    }
}

/// A product as reported by a storefront.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub title: String,
    #[serde(default)]
    pub handle: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub variants: Vec<Variant>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

impl Product {
    pub fn has_available(&self) -> bool {
        self.variants.iter().any(|v| v.available)
    }
}

/// A discovered product, resolved for one task.
///
/// An empty `variants` list means none of the task's sizes exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductFound {
    pub product: Product,
    pub variants: Vec<Variant>,
    pub kind: SelectorKind,
}

/// Per-subscriber result of one monitor round.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub task_id: TaskId,
    pub found: ProductFound,
}

/// Why a parse (or variant resolution) did not yield a usable product.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseFailure {
    #[error("network error: {kind:?}")]
    Network { kind: NetworkErrorKind },

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("No product found")]
    ProductMissing,

    #[error("Product not live")]
    ProductNotLive,

    #[error("Password page")]
    PasswordPage,

    #[error("Out of stock")]
    VariantsNotAvailable,

    #[error("No variants matched")]
    VariantsNotMatched,

    #[error("aborted")]
    Aborted,

    #[error("{0}")]
    Other(String),
}

impl ParseFailure {
    pub fn class(&self) -> FailureClass {
        match self {
            ParseFailure::Network { .. } => FailureClass::RetryableNetwork,
            ParseFailure::Status(status) => {
                crate::failure::classify_status(*status).unwrap_or(FailureClass::Unexpected)
            }
            ParseFailure::ProductMissing => FailureClass::NotFound,
            ParseFailure::ProductNotLive => FailureClass::NotLive,
            ParseFailure::PasswordPage => FailureClass::PasswordWall,
            ParseFailure::VariantsNotAvailable => FailureClass::OutOfStock,
            ParseFailure::VariantsNotMatched => FailureClass::SelectorUnsatisfiable,
            ParseFailure::Aborted => FailureClass::Cancelled,
            ParseFailure::Other(_) => FailureClass::Unexpected,
        }
    }

    /// The failure that should drive the transition when several compete.
    pub fn dominant<'a, I>(failures: I) -> Option<&'a ParseFailure>
    where
        I: IntoIterator<Item = &'a ParseFailure>,
    {
        failures
            .into_iter()
            .fold(None, |best: Option<&ParseFailure>, next| match best {
                Some(b) if b.class().severity() >= next.class().severity() => Some(b),
                _ => Some(next),
            })
    }
}

/// Monitor state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitorState {
    Parse,
    Swap,
    Done,
    Error,
    Abort,
}

impl MonitorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorState::Parse => "PARSE",
            MonitorState::Swap => "SWAP",
            MonitorState::Done => "DONE",
            MonitorState::Error => "ERROR",
            MonitorState::Abort => "ABORT",
        }
    }
}
