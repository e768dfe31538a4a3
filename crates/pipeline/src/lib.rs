//! Incremental synchronisation of the media roots with the index.
//!
//! A pass enumerates the roots ([`scan`]), diffs them against the stored
//! change-detection state ([`diff`]), processes new and modified files on a
//! bounded worker pool ([`file_worker`]) and persists the results in batches
//! ([`sync::SyncEngine`]).

pub mod diff;
pub mod error;
pub mod file_worker;
pub mod lock;
pub mod scan;
pub mod sync;

pub use error::SyncError;
pub use sync::{RescanMode, SyncEngine, SyncReport};
