//! indicatif-backed progress reporting for the CLI.

use std::io::Write as _;
use std::sync::atomic::{AtomicUsize, Ordering};

use indicatif::{ProgressBar, ProgressStyle};
use specter_core::{CacheSnapshot, EnrichmentProgress, PipelineProgress, StreamObserver};
use specter_shared::{CandidateMatch, EnrichmentContext};

/// CLI progress reporter using an indicatif spinner.
///
/// With `echo` set, streamed draft text is written to stdout as it arrives.
pub(crate) struct CliProgress {
    spinner: ProgressBar,
    pending: AtomicUsize,
    echo: bool,
    echoed: AtomicUsize,
}

impl CliProgress {
    pub(crate) fn new(echo: bool) -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .expect("valid template")
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self {
            spinner,
            pending: AtomicUsize::new(0),
            echo,
            echoed: AtomicUsize::new(0),
        }
    }

    pub(crate) fn finish(&self) {
        self.spinner.finish_and_clear();
    }

    /// Write the part of `text` not yet echoed.
    fn echo_new_text(&self, text: &str) {
        let from = self.echoed.swap(text.len(), Ordering::SeqCst);
        if let Some(delta) = text.get(from..) {
            self.spinner.suspend(|| {
                let mut stdout = std::io::stdout().lock();
                let _ = stdout.write_all(delta.as_bytes());
                let _ = stdout.flush();
            });
        }
    }
}

impl EnrichmentProgress for CliProgress {
    fn started(&self, pending: usize) {
        self.pending.store(pending, Ordering::SeqCst);
        self.spinner.set_message(format!("Enriching [0/{pending}]"));
    }

    fn settled(&self, match_id: &str, context: &EnrichmentContext, remaining: usize) {
        let total = self.pending.load(Ordering::SeqCst);
        let marker = if context.is_error() { "failed" } else { "ok" };
        self.spinner.set_message(format!(
            "Enriching [{}/{total}] {match_id} ({marker})",
            total.saturating_sub(remaining)
        ));
    }

    fn done(&self, snapshot: &CacheSnapshot) {
        self.spinner
            .set_message(format!("Enrichment settled ({} cached)", snapshot.len()));
    }
}

impl PipelineProgress for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn matches_found(&self, matches: &[CandidateMatch]) {
        self.spinner
            .set_message(format!("Found {} related cases", matches.len()));
    }

    fn draft_snapshot(&self, text: &str) {
        if self.echo {
            self.echo_new_text(text);
        } else {
            self.spinner
                .set_message(format!("Drafting complaint ({} chars)", text.len()));
        }
    }
}

/// Forwards regeneration snapshots to a [`CliProgress`].
pub(crate) struct SnapshotForwarder<'a>(pub &'a CliProgress);

impl StreamObserver for SnapshotForwarder<'_> {
    fn on_snapshot(&mut self, text: &str) {
        self.0.draft_snapshot(text);
    }
}
