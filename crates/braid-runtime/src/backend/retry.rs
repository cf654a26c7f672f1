//! Retrying wrapper for model backends.

use async_trait::async_trait;
use braid_config::RetryConfig;
use tokio::time::sleep;
use tracing::warn;

use super::{BackendError, ModelBackend, ModelRequest};

/// Retries transient failures of the wrapped backend.
///
/// Transport errors and statuses listed in the policy are retried with
/// exponential backoff until `attempts` is exhausted; anything else is
/// returned immediately.
pub struct RetryingBackend<B> {
  inner: B,
  config: RetryConfig,
}

impl<B: ModelBackend> RetryingBackend<B> {
  pub fn new(inner: B, config: RetryConfig) -> Self {
    Self { inner, config }
  }

  pub fn inner(&self) -> &B {
    &self.inner
  }

  fn is_retryable(&self, error: &BackendError) -> bool {
    match error {
      BackendError::Transport(_) => true,
      BackendError::Status { status, .. } => self.config.is_retryable_status(*status),
      BackendError::InvalidResponse(_) => false,
    }
  }
}

#[async_trait]
impl<B: ModelBackend> ModelBackend for RetryingBackend<B> {
  async fn generate(&self, request: ModelRequest) -> Result<String, BackendError> {
    let attempts = self.config.attempts.max(1);
    let mut attempt = 0;

    loop {
      match self.inner.generate(request.clone()).await {
        Ok(text) => return Ok(text),
        Err(e) if attempt + 1 < attempts && self.is_retryable(&e) => {
          let delay = self.config.delay_for_attempt(attempt);
          warn!(
            unit = %request.unit,
            attempt = attempt + 1,
            attempts,
            error = %e,
            delay_ms = delay.as_millis() as u64,
            "backend request failed, retrying"
          );
          sleep(delay).await;
          attempt += 1;
        }
        Err(e) => return Err(e),
      }
    }
  }
}
