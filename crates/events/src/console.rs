//! Terminal progress bar for bulk syncs.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::progress::{Phase, ProgressEvent, ProgressSink};

const TEMPLATE: &str = "{spinner} {msg:>10} [{bar:40}] {pos}/{len} eta {eta}";

/// Renders [`ProgressEvent`]s on stderr with `indicatif`.
pub struct ConsoleProgress {
    bar: ProgressBar,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self::with_bar(ProgressBar::new(0))
    }

    /// A bar that draws nowhere. Used when stderr is not a terminal.
    pub fn hidden() -> Self {
        Self::with_bar(ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::hidden()))
    }

    fn with_bar(bar: ProgressBar) -> Self {
        let style = ProgressStyle::with_template(TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        bar.set_style(style);
        Self { bar }
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn is_finished(&self) -> bool {
        self.bar.is_finished()
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for ConsoleProgress {
    fn report(&self, event: ProgressEvent) {
        self.bar.set_length(event.total as u64);
        self.bar.set_position(event.processed as u64);
        match event.phase {
            Phase::Scanning => self.bar.set_message("scanning"),
            Phase::Processing => self.bar.set_message("processing"),
            Phase::Complete => self.bar.finish_with_message("done"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_position_and_finishes() {
        let console = ConsoleProgress::hidden();
        console.report(ProgressEvent::new(Phase::Processing, 3, 10));
        assert_eq!(console.position(), 3);
        assert!(!console.is_finished());

        console.report(ProgressEvent::complete(10));
        assert_eq!(console.position(), 10);
        assert!(console.is_finished());
    }
}
