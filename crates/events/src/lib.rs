//! Sync progress reporting.
//!
//! One event model, [`ProgressEvent`], consumed through the [`ProgressSink`]
//! trait by three sinks:
//!
//! - [`ProgressBus`] fans events out over a `tokio::sync::broadcast` channel
//!   for interactive push delivery. Publishing never waits on consumers.
//! - [`ConsoleProgress`] drives an `indicatif` progress bar for bulk syncs.
//! - `()` discards everything.

pub mod bus;
pub mod console;
pub mod progress;

pub use bus::ProgressBus;
pub use console::ConsoleProgress;
pub use progress::{EtaEstimator, Phase, ProgressEvent, ProgressSink};
