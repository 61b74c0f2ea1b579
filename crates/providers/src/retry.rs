//! Bounded retry wrapper for completion providers.
//!
//! Retries only transient failures (rate limit, overload, timeout, network,
//! 5xx) with exponential backoff plus jitter. Auth failures and 4xx errors
//! surface immediately.

use async_trait::async_trait;
use maitred_config::RetryConfig;
use maitred_core::error::ProviderError;
use maitred_core::provider::{CompletionProvider, CompletionRequest, CompletionResponse};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff parameters for [`RetryProvider`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }
}

impl RetryPolicy {
    /// Backoff before attempt `attempt` (1-based; attempt 1 has no delay).
    /// Doubles per attempt, capped, with up to 25% added jitter.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let base = self
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms);
        let jitter = {
            use rand::Rng;
            let mut rng = rand::rng();
            rng.random_range(0..=base / 4)
        };
        Duration::from_millis((base + jitter).min(self.max_delay_ms))
    }
}

/// Wraps a provider with transient-failure retries.
pub struct RetryProvider {
    inner: Arc<dyn CompletionProvider>,
    policy: RetryPolicy,
}

impl RetryProvider {
    pub fn new(inner: Arc<dyn CompletionProvider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// Build from the `[retry]` configuration block.
    pub fn from_config(inner: Arc<dyn CompletionProvider>, config: &RetryConfig) -> Self {
        Self::new(inner, RetryPolicy::from(config))
    }
}

#[async_trait]
impl CompletionProvider for RetryProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.inner.complete(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempt < self.policy.max_attempts => {
                    let delay = match e {
                        ProviderError::RateLimited { retry_after_secs } => Duration::from_millis(
                            (retry_after_secs * 1000).min(self.policy.max_delay_ms),
                        ),
                        _ => self.policy.delay_for(attempt + 1),
                    };
                    warn!(
                        provider = self.inner.name(),
                        attempt,
                        max = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient provider failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if attempt > 1 {
                        debug!(
                            provider = self.inner.name(),
                            attempt, "Giving up after retries"
                        );
                    }
                    return Err(e);
                }
            }
        }
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        self.inner.health_check().await
    }
}
