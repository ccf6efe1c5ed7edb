//! Migration orchestrator.
//!
//! Runs a bounded pool of workers over the pending items, relays their
//! messages to and from the relay broker, and checkpoints finished items.

mod config;
mod runner;
mod types;

pub use config::OrchestratorConfig;
pub use runner::{Collaborators, Orchestrator};
pub use types::{
    estimate_remaining, format_duration, format_remaining, OrchestratorError, RunSummary,
    StatusCallback, StopHandle,
};
