//! Model backends.
//!
//! Prompt units hand their rendered instruction to a [`ModelBackend`]. The
//! backend owns transport concerns, including retries; the workflow core never
//! retries on its own.

mod http;
mod retry;

use async_trait::async_trait;

pub use http::HttpBackend;
pub use retry::RetryingBackend;

/// A single generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
  /// Unit issuing the request.
  pub unit: String,
  pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
  #[error("backend returned status {status}: {message}")]
  Status { status: u16, message: String },

  #[error("transport error: {0}")]
  Transport(String),

  #[error("invalid backend response: {0}")]
  InvalidResponse(String),
}

#[async_trait]
pub trait ModelBackend: Send + Sync {
  async fn generate(&self, request: ModelRequest) -> Result<String, BackendError>;
}

/// Returns the rendered prompt unchanged. Used for dry runs.
#[derive(Debug, Clone, Default)]
pub struct EchoBackend;

#[async_trait]
impl ModelBackend for EchoBackend {
  async fn generate(&self, request: ModelRequest) -> Result<String, BackendError> {
    Ok(request.prompt)
  }
}
