//! Token stream aggregation.
//!
//! [`consume`] drains a [`TokenStream`] fragment by fragment, appending each
//! one verbatim to a [`GenerationSession`] and handing the updated buffer to a
//! [`StreamObserver`] after every fragment.

use futures::StreamExt;
use specter_generation::TokenStream;
use specter_shared::{DraftSection, HeadingSpec, Result, SpecterError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::splitter;

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Lifecycle of one generation session.
///
/// `Pending -> Streaming -> Complete -> Split`; `Failed` is reachable from
/// `Pending` or `Streaming`. `Split` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Pending,
    Streaming,
    Complete,
    Split,
    Failed,
}

/// Accumulated text of one generation call.
#[derive(Debug, Clone)]
pub struct GenerationSession {
    accumulated: String,
    state: SessionState,
    fragments: usize,
}

impl GenerationSession {
    pub fn new() -> Self {
        Self {
            accumulated: String::new(),
            state: SessionState::Pending,
            fragments: 0,
        }
    }

    /// Append one fragment verbatim.
    pub fn push(&mut self, fragment: &str) -> Result<()> {
        match self.state {
            SessionState::Pending | SessionState::Streaming => {
                self.accumulated.push_str(fragment);
                self.fragments += 1;
                self.state = SessionState::Streaming;
                Ok(())
            }
            other => Err(SpecterError::validation(format!(
                "cannot append to a {other:?} generation session"
            ))),
        }
    }

    /// Mark the stream exhausted.
    pub fn complete(&mut self) -> Result<()> {
        match self.state {
            SessionState::Pending | SessionState::Streaming => {
                self.state = SessionState::Complete;
                Ok(())
            }
            other => Err(SpecterError::validation(format!(
                "cannot complete a {other:?} generation session"
            ))),
        }
    }

    /// Mark the stream failed. No-op once the session is terminal.
    pub fn fail(&mut self) {
        if matches!(self.state, SessionState::Pending | SessionState::Streaming) {
            self.state = SessionState::Failed;
        }
    }

    /// Split the completed text into sections.
    pub fn split(&mut self, headings: &[HeadingSpec]) -> Result<Vec<DraftSection>> {
        if self.state != SessionState::Complete {
            return Err(SpecterError::validation(format!(
                "cannot split a {:?} generation session",
                self.state
            )));
        }
        let sections = splitter::split(&self.accumulated, headings);
        self.state = SessionState::Split;
        Ok(sections)
    }

    pub fn text(&self) -> &str {
        &self.accumulated
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn fragments(&self) -> usize {
        self.fragments
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, SessionState::Complete | SessionState::Split)
    }

    pub fn into_text(self) -> String {
        self.accumulated
    }
}

impl Default for GenerationSession {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

/// Receives the live buffer while a stream is consumed.
pub trait StreamObserver: Send {
    /// Called after every fragment with the whole accumulated text.
    fn on_snapshot(&mut self, text: &str);
    /// Called once when the stream ends normally, with the final text.
    fn on_complete(&mut self, _text: &str) {}
}

impl<F> StreamObserver for F
where
    F: FnMut(&str) + Send,
{
    fn on_snapshot(&mut self, text: &str) {
        self(text)
    }
}

/// Observer that ignores every snapshot.
pub struct NoopObserver;

impl StreamObserver for NoopObserver {
    fn on_snapshot(&mut self, _text: &str) {}
}

// ---------------------------------------------------------------------------
// Consumption
// ---------------------------------------------------------------------------

/// Drain `stream` into a completed [`GenerationSession`].
///
/// A stream error yields [`SpecterError::Generation`] and cancellation yields
/// [`SpecterError::Cancelled`]; both carry the text accumulated so far.
#[instrument(skip_all)]
pub async fn consume(
    mut stream: TokenStream,
    observer: &mut dyn StreamObserver,
    cancel: &CancellationToken,
) -> Result<GenerationSession> {
    let mut session = GenerationSession::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                session.fail();
                warn!(fragments = session.fragments(), "generation cancelled");
                return Err(SpecterError::Cancelled {
                    partial: session.into_text(),
                });
            }
            next = stream.next() => next,
        };

        match next {
            Some(Ok(fragment)) => {
                session.push(&fragment)?;
                observer.on_snapshot(session.text());
            }
            Some(Err(e)) => {
                session.fail();
                warn!(fragments = session.fragments(), error = %e, "generation stream failed");
                let message = match e {
                    SpecterError::Generation { message, .. } => message,
                    other => other.to_string(),
                };
                return Err(SpecterError::Generation {
                    message,
                    partial: session.into_text(),
                });
            }
            None => break,
        }
    }

    session.complete()?;
    observer.on_complete(session.text());
    debug!(
        fragments = session.fragments(),
        chars = session.text().len(),
        "generation stream complete"
    );
    Ok(session)
}
