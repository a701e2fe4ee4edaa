//! Boundary to the external language-model completion capability.
//!
//! The core never speaks a vendor wire protocol; it consumes this trait and
//! treats every call as a suspension point that may time out or fail.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::warn;

use crate::config::ResearchConfig;
use crate::error::CompletionError;

/// A single completion request: a system prompt establishing the role and a
/// user message to respond to.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

/// External text/structured-output generation capability.
///
/// Implementations must be safe for concurrent invocation; every interview
/// session holds the same shared handle.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Generate free-form text.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError>;

    /// Generate a JSON object. Implementations guarantee the returned value
    /// parsed as JSON; a malformed payload surfaces as
    /// [`CompletionError::Schema`], never as a silently bad object.
    /// Field-level validation happens at the caller boundary via serde.
    async fn complete_structured(
        &self,
        request: &CompletionRequest,
    ) -> Result<serde_json::Value, CompletionError>;
}

/// Invoke `call` with bounded retries and exponential backoff.
///
/// Only transient failures are retried; the retry never escapes the single
/// call it wraps, so a failed step is re-attempted as that step.
pub async fn with_retry<T, F, Fut>(
    config: &ResearchConfig,
    operation: &str,
    mut call: F,
) -> Result<T, CompletionError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CompletionError>>,
{
    let mut attempt = 0;
    let mut backoff_ms = config.initial_backoff_ms;

    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < config.retry_count && err.is_retryable() => {
                attempt += 1;
                warn!(
                    operation,
                    attempt,
                    backoff_ms,
                    error = %err,
                    "completion call failed, retrying"
                );
                sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(config.max_backoff_ms);
            }
            Err(err) => return Err(err),
        }
    }
}
