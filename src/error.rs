//! Error types shared by the bisection core.

use std::time::Duration;
use thiserror::Error;

/// Errors raised while listing, downloading, running or bisecting builds.
#[derive(Debug, Error)]
pub enum BisectError {
    /// Bad flag combination or unusable option value.
    #[error("{0}")]
    CliUsage(String),

    #[error(
        "not enough builds to bisect between {good} and {bad} for {key} ({found} revisions in range)"
    )]
    EmptyRevisionRange {
        good: String,
        bad: String,
        key: String,
        found: usize,
    },

    /// Listing or download endpoint failed in a way that may succeed later.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The artifact for one revision does not exist (404/403).
    #[error("artifact missing: {0}")]
    ArtifactMissing(String),

    #[error("launch timed out after {}s", .0.as_secs())]
    LaunchTimeout(Duration),

    #[error("bisection aborted by user")]
    UserQuit,

    #[error("internal invariant violated: {0}")]
    InternalInvariantViolation(String),

    #[error("invalid revision {0:?}")]
    InvalidRevision(String),

    #[error("launching args are not supported for {0}")]
    ArgsUnsupported(String),

    #[error("gsutil credential error: {0}")]
    Credentials(String),

    #[error("expected revision {revision} to be {expected} but got {actual}")]
    RangeVerification {
        revision: String,
        expected: String,
        actual: String,
    },

    #[error("download of revision {0} was stopped")]
    Cancelled(String),

    #[error("bisection interrupted")]
    Interrupted,

    #[error("{tool} failed: {message}")]
    Tool { tool: String, message: String },

    #[error("archive error: {0}")]
    Archive(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl BisectError {
    /// Whether a retry with backoff may help.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BisectError::BackendUnavailable(_) | BisectError::Http(_) | BisectError::Io(_)
        )
    }

    /// Errors that end the whole bisection instead of failing a single run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BisectError::CliUsage(_)
                | BisectError::UserQuit
                | BisectError::Interrupted
                | BisectError::InternalInvariantViolation(_)
                | BisectError::ArgsUnsupported(_)
                | BisectError::Credentials(_)
        )
    }

    pub(crate) fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        BisectError::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

impl From<zip::result::ZipError> for BisectError {
    fn from(err: zip::result::ZipError) -> Self {
        BisectError::Archive(err.to_string())
    }
}

/// Result type for bisection operations.
pub type Result<T> = std::result::Result<T, BisectError>;
