//! Error types for DeepResearch.
//!
//! Library crates use [`DeepResearchError`] via `thiserror`.
//! The CLI wraps this with `color-eyre`; the HTTP server maps it to status codes.

use std::path::PathBuf;

/// Top-level error type for all DeepResearch operations.
#[derive(Debug, thiserror::Error)]
pub enum DeepResearchError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Connection failure or timeout talking to a collaborator service.
    #[error("network error: {0}")]
    Network(String),

    /// A collaborator service answered with a non-success HTTP status.
    #[error("upstream error: HTTP {status}: {message}")]
    Upstream { status: u16, message: String },

    /// Malformed response from a collaborator service.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// LLM generation error (empty completion, refused prompt, etc.).
    #[error("llm error: {0}")]
    Llm(String),

    /// History store error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (empty question, out-of-order stage output, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// No task is registered under the given id.
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// The task's progress channel already has a consumer.
    #[error("task {0} already has a subscriber")]
    TaskBusy(String),

    /// The worker pool and its admission queue are full.
    #[error("research queue is full ({capacity} tasks in flight)")]
    Overloaded { capacity: usize },

    /// Unexpected internal failure (panicked worker, closed channel).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DeepResearchError>;

impl DeepResearchError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether retrying the same call could plausibly succeed.
    ///
    /// Only connection-level failures, rate limiting and server-side errors
    /// are transient. Everything else fails the same way twice.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Upstream { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
