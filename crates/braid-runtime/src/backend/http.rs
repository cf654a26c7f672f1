//! OpenAI-compatible chat completions backend.

use std::time::Duration;

use async_trait::async_trait;
use braid_config::BackendConfig;
use serde_json::{Value, json};

use super::{BackendError, ModelBackend, ModelRequest};

/// Sends each prompt as a single user message to `{endpoint}/chat/completions`.
pub struct HttpBackend {
  client: reqwest::Client,
  url: String,
  model: String,
  api_key: String,
}

impl HttpBackend {
  /// Create a backend. The API key is passed in explicitly; reading it from
  /// the environment is the caller's business.
  pub fn new(config: &BackendConfig, api_key: impl Into<String>) -> Result<Self, BackendError> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_millis(config.request_timeout_ms))
      .build()
      .map_err(|e| BackendError::Transport(e.to_string()))?;

    Ok(Self {
      client,
      url: format!("{}/chat/completions", config.endpoint.trim_end_matches('/')),
      model: config.model.clone(),
      api_key: api_key.into(),
    })
  }

  pub fn url(&self) -> &str {
    &self.url
  }
}

#[async_trait]
impl ModelBackend for HttpBackend {
  async fn generate(&self, request: ModelRequest) -> Result<String, BackendError> {
    let body = json!({
      "model": self.model,
      "messages": [{ "role": "user", "content": request.prompt }],
    });

    let response = self
      .client
      .post(&self.url)
      .bearer_auth(&self.api_key)
      .json(&body)
      .send()
      .await
      .map_err(|e| BackendError::Transport(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
      let message = response.text().await.unwrap_or_default();
      return Err(BackendError::Status {
        status: status.as_u16(),
        message,
      });
    }

    let payload: Value = response
      .json()
      .await
      .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

    extract_content(&payload)
  }
}

/// Pull `choices[0].message.content` out of a chat completions response.
fn extract_content(payload: &Value) -> Result<String, BackendError> {
  payload
    .pointer("/choices/0/message/content")
    .and_then(Value::as_str)
    .map(str::to_string)
    .ok_or_else(|| BackendError::InvalidResponse(format!("no message content in {}", payload)))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_extract_content() {
    let payload = json!({
      "choices": [{ "message": { "role": "assistant", "content": "APPROVED" } }]
    });
    assert_eq!(extract_content(&payload).unwrap(), "APPROVED");
  }

  #[test]
  fn test_extract_content_missing() {
    assert!(matches!(
      extract_content(&json!({ "choices": [] })),
      Err(BackendError::InvalidResponse(_))
    ));
  }

  #[test]
  fn test_url_joins_endpoint() {
    let config: BackendConfig = serde_json::from_value(json!({
      "endpoint": "http://localhost:8080/v1/",
      "model": "test"
    }))
    .unwrap();

    let backend = HttpBackend::new(&config, "key").unwrap();
    assert_eq!(backend.url(), "http://localhost:8080/v1/chat/completions");
  }
}
