use std::path::PathBuf;

use thiserror::Error;

/// Core error type for Roundtable.
///
/// Only stage-level failures live here: anything in this enum aborts the
/// whole research run. Per-session and per-section failures use
/// [`InterviewError`] and [`SectionError`] and are absorbed at the
/// orchestrator's fan-in boundary.
#[derive(Debug, Error)]
pub enum RoundtableError {
    #[error("configuration error: {0}")]
    InvalidConfiguration(String),
    #[error("missing environment variable: {0}")]
    MissingSecret(String),
    #[error("I/O error while reading {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("persona generation failed: {0}")]
    Generation(String),
    #[error("report compilation failed: {0}")]
    Compilation(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RoundtableError {
    pub fn config_io(path: PathBuf, source: std::io::Error) -> Self {
        Self::ConfigIo { path, source }
    }
}

/// Failure of a single Completion Service invocation.
#[derive(Debug, Clone, Error)]
pub enum CompletionError {
    #[error("completion timed out")]
    Timeout,
    #[error("completion service failure: {0}")]
    Service(String),
    #[error("structured output violated schema: {0}")]
    Schema(String),
}

impl CompletionError {
    /// Transient failures (timeouts, transport trouble) are worth a
    /// backed-off retry; schema violations are handled by the caller with a
    /// corrective prompt instead.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Service(_))
    }
}

/// Failure of a single Evidence Provider query. Sessions degrade gracefully
/// on these rather than aborting.
#[derive(Debug, Clone, Error)]
#[error("evidence retrieval failed: {0}")]
pub struct EvidenceError(pub String);

/// One interview session's failure. Recorded at fan-in, never propagated to
/// sibling sessions.
#[derive(Debug, Clone, Error)]
pub enum InterviewError {
    #[error("interview completion exhausted retries: {0}")]
    Completion(#[from] CompletionError),
    #[error("interview cut off by run deadline")]
    DeadlineExceeded,
}

/// One section condensation's failure, after its retry budget.
#[derive(Debug, Clone, Error)]
#[error("section writing failed: {0}")]
pub struct SectionError(#[from] pub CompletionError);
