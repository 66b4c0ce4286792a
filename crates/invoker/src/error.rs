//! Invocation error type.

use thiserror::Error;

/// Errors returned by [`ServiceInvoker::invoke`](crate::ServiceInvoker::invoke).
///
/// The variant tells a retry wrapper what to do:
/// - `Retryable`: timeouts, connection failures, 5xx and 429 responses.
/// - `Fatal`    : the call can never succeed as configured (bad method,
///   bad URL, 4xx response).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvokeError {
    /// Transient failure; repeating the call may succeed.
    #[error("retryable invocation error: {0}")]
    Retryable(String),

    /// Permanent failure; no retry should be attempted.
    #[error("fatal invocation error: {0}")]
    Fatal(String),
}

impl InvokeError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    /// The bare failure message, without the classification prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(msg) | Self::Fatal(msg) => msg,
        }
    }
}
