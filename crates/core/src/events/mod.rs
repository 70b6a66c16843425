//! Messages between the orchestrator and its runners.
//!
//! Control events flow down to a runner over its own channel. Status
//! lines, swap requests and monitor reports flow up over one shared
//! channel that the orchestrator drains.

mod link;
mod types;

pub use link::RunnerLink;
pub use types::{
    ControlEnvelope, ControlEvent, RunnerKind, StatusEvent, StatusUpdate, Target, Upstream,
};
