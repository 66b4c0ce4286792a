//! Configured retry wrapper around any [`ServiceInvoker`].
//!
//! The engine itself never retries a step. When a deployment wants transient
//! failures absorbed, it wraps its invoker in a [`RetryingInvoker`]; only
//! [`InvokeError::Retryable`] failures are repeated, with exponential
//! back-off.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{InvokeError, Payload, Service, ServiceInvoker};

/// Tuning knobs for the retry wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of times a retryable failure will be retried.
    pub max_retries: u32,
    /// Base delay in milliseconds, doubled after each attempt.
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 100,
        }
    }
}

/// Upper bound on a single back-off delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), capped at
    /// [`MAX_RETRY_DELAY`].
    pub fn delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms)
            .checked_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
            .map_or(MAX_RETRY_DELAY, |delay| delay.min(MAX_RETRY_DELAY))
    }
}

pub struct RetryingInvoker {
    inner: Arc<dyn ServiceInvoker>,
    policy: RetryPolicy,
}

impl RetryingInvoker {
    pub fn new(inner: Arc<dyn ServiceInvoker>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl ServiceInvoker for RetryingInvoker {
    async fn invoke(&self, service: &Service, request: Payload) -> Result<Payload, InvokeError> {
        let mut attempts = 0u32;

        loop {
            match self.inner.invoke(service, request.clone()).await {
                Ok(reply) => return Ok(reply),

                Err(InvokeError::Retryable(msg)) if attempts < self.policy.max_retries => {
                    attempts += 1;
                    let delay = self.policy.delay(attempts);

                    warn!(
                        "service '{}' retryable error (attempt {}/{}), retrying in {:?}: {}",
                        service.name, attempts, self.policy.max_retries, delay, msg
                    );

                    tokio::time::sleep(delay).await;
                }

                Err(err) => return Err(err),
            }
        }
    }
}
