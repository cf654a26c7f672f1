use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry policy for a model backend.
///
/// Delay before retry `n` (0-based) is `initial_delay_ms * exp_base^n`, capped
/// at `max_delay_ms`. Only failures whose HTTP status is in
/// `http_status_codes` (or transport errors) are retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
  /// Total attempts including the first one.
  pub attempts: u32,
  pub exp_base: u32,
  pub initial_delay_ms: u64,
  pub max_delay_ms: u64,
  pub http_status_codes: Vec<u16>,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      attempts: 5,
      exp_base: 7,
      initial_delay_ms: 1_000,
      max_delay_ms: 60_000,
      http_status_codes: vec![429, 500, 503, 504],
    }
  }
}

impl RetryConfig {
  /// A policy that never retries.
  pub fn none() -> Self {
    Self {
      attempts: 1,
      ..Self::default()
    }
  }

  /// Delay to wait after the failed attempt `attempt` (0-based).
  pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
    let factor = (self.exp_base as u64).saturating_pow(attempt);
    let delay = self.initial_delay_ms.saturating_mul(factor);
    Duration::from_millis(delay.min(self.max_delay_ms))
  }

  /// Whether a failure with this HTTP status should be retried.
  pub fn is_retryable_status(&self, status: u16) -> bool {
    self.http_status_codes.contains(&status)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_delays() {
    let config = RetryConfig::default();
    assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
    assert_eq!(config.delay_for_attempt(1), Duration::from_secs(7));
    assert_eq!(config.delay_for_attempt(2), Duration::from_secs(49));
    // 343s is capped
    assert_eq!(config.delay_for_attempt(3), Duration::from_secs(60));
  }

  #[test]
  fn test_delay_saturates() {
    let config = RetryConfig::default();
    assert_eq!(config.delay_for_attempt(u32::MAX), Duration::from_secs(60));
  }

  #[test]
  fn test_retryable_status() {
    let config = RetryConfig::default();
    assert!(config.is_retryable_status(429));
    assert!(config.is_retryable_status(503));
    assert!(!config.is_retryable_status(400));
    assert!(!config.is_retryable_status(502));
  }

  #[test]
  fn test_partial_config_uses_defaults() {
    let config: RetryConfig = serde_json::from_str(r#"{ "attempts": 2 }"#).unwrap();
    assert_eq!(config.attempts, 2);
    assert_eq!(config.exp_base, 7);
    assert_eq!(config.http_status_codes, vec![429, 500, 503, 504]);
  }
}
