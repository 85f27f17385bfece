//! Error types for Specter.
//!
//! Library crates use [`SpecterError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all Specter operations.
#[derive(Debug, thiserror::Error)]
pub enum SpecterError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transport-level failure talking to a collaborator.
    #[error("network error: {0}")]
    Network(String),

    /// A context fetch returned a non-success status or failed in flight.
    #[error("fetch failed for {url}{}: {message}", status_suffix(.status))]
    Fetch {
        url: String,
        status: Option<u16>,
        message: String,
    },

    /// A collaborator payload had an unexpected shape.
    #[error("mapping error: {0}")]
    Mapping(String),

    /// The generation stream failed before completing.
    #[error("generation error: {message}")]
    Generation {
        message: String,
        /// Text accumulated before the failure.
        partial: String,
    },

    /// A generation or enrichment run was cancelled by its caller.
    #[error("operation cancelled")]
    Cancelled {
        /// Text accumulated before cancellation (empty for enrichment).
        partial: String,
    },

    /// A regeneration for this section is already running.
    #[error("section {section_id} is already being regenerated")]
    Busy { section_id: String },

    /// Database or key-value store error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (unknown section, malformed input, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// HTML-to-Markdown conversion error.
    #[error("conversion error: {0}")]
    Conversion(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SpecterError>;

impl SpecterError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a generation error with no partial output.
    pub fn generation(msg: impl Into<String>) -> Self {
        Self::Generation {
            message: msg.into(),
            partial: String::new(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Partial generated text carried by generation failures, if any.
    pub fn partial_text(&self) -> Option<&str> {
        match self {
            Self::Generation { partial, .. } | Self::Cancelled { partial } => Some(partial),
            _ => None,
        }
    }
}
