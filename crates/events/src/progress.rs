//! The progress event model and the sink trait.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ProgressEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Enumerating the filesystem and diffing against the index.
    Scanning,
    /// Workers are processing changed files.
    Processing,
    /// Terminal marker. No further events follow for this pass.
    Complete,
}

/// A snapshot of how far a sync pass has progressed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub processed: usize,
    pub total: usize,
    pub phase: Phase,
    /// Estimated seconds remaining, once a rate is known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_secs: Option<u64>,
    /// The folder or root the pass covers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
}

impl ProgressEvent {
    pub fn new(phase: Phase, processed: usize, total: usize) -> Self {
        Self {
            processed,
            total,
            phase,
            eta_secs: None,
            root: None,
        }
    }

    /// The terminal event of a pass.
    pub fn complete(total: usize) -> Self {
        Self::new(Phase::Complete, total, total)
    }

    pub fn with_eta(mut self, eta_secs: Option<u64>) -> Self {
        self.eta_secs = eta_secs;
        self
    }

    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Complete
    }
}

// ---------------------------------------------------------------------------
// ProgressSink
// ---------------------------------------------------------------------------

/// Receives progress events from the sync orchestrator.
///
/// Implementations must return quickly and must not fail: progress is
/// best-effort and never stalls file processing.
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

impl ProgressSink for () {
    fn report(&self, _event: ProgressEvent) {}
}

impl<S: ProgressSink + ?Sized> ProgressSink for Arc<S> {
    fn report(&self, event: ProgressEvent) {
        (**self).report(event);
    }
}

impl<S: ProgressSink + ?Sized> ProgressSink for &S {
    fn report(&self, event: ProgressEvent) {
        (**self).report(event);
    }
}

// ---------------------------------------------------------------------------
// EtaEstimator
// ---------------------------------------------------------------------------

/// Estimates remaining time from the average rate since the pass started.
#[derive(Debug, Clone, Copy)]
pub struct EtaEstimator {
    started: Instant,
}

impl EtaEstimator {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    /// Seconds remaining for `total - processed` items at the observed rate.
    pub fn eta_secs(&self, processed: usize, total: usize) -> Option<u64> {
        estimate(self.started.elapsed(), processed, total)
    }
}

fn estimate(elapsed: Duration, processed: usize, total: usize) -> Option<u64> {
    if processed == 0 {
        return None;
    }
    let remaining = total.saturating_sub(processed);
    let per_item = elapsed.as_secs_f64() / processed as f64;
    Some((per_item * remaining as f64).ceil() as u64)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
