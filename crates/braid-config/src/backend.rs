use serde::{Deserialize, Serialize};

use crate::retry::RetryConfig;

/// Connection settings for an OpenAI-compatible chat completions endpoint.
///
/// The API key itself is never stored here, only the name of the environment
/// variable the binary reads it from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
  /// Base URL, e.g. `https://api.openai.com/v1`.
  pub endpoint: String,
  pub model: String,
  #[serde(default = "default_api_key_env")]
  pub api_key_env: String,
  #[serde(default = "default_request_timeout_ms")]
  pub request_timeout_ms: u64,
  #[serde(default)]
  pub retry: RetryConfig,
}

fn default_api_key_env() -> String {
  "BRAID_API_KEY".to_string()
}

fn default_request_timeout_ms() -> u64 {
  60_000
}
