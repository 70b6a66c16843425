//! Task manager.
//!
//! Starts and stops checkouts, groups equivalent tasks behind one shared
//! monitor, serves proxy swaps from the pool and republishes runner status.

mod config;
mod runner;
mod types;

pub use config::RunnerConfig;
pub use runner::TaskManager;
pub use types::{
    Collaborators, ManagerError, ManagerSettings, ManagerStatus, TaskSummary,
};
pub(crate) use types::site_key;
