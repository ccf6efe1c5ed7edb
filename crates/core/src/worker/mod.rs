//! Worker units.
//!
//! One worker runs per in-flight content item: fetch, extract, transcode,
//! request uploads, then report the assembled manifest.

mod config;
mod entries;
mod error;
mod unit;

pub use config::WorkerConfig;
pub use entries::{parse_entry_name, UnitKey};
pub use error::WorkerError;
pub use unit::{Worker, WorkerContext};
