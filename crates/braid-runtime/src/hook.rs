//! Post-run hooks.

use async_trait::async_trait;

use crate::result::WorkflowResult;

pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// A step the execution runs explicitly on the final result, after the root
/// node has finished and before `wait` returns.
///
/// Hooks run in registration order for every terminal status; it is up to the
/// hook to skip statuses it does not care about.
#[async_trait]
pub trait PostRunHook: Send + Sync {
  /// Name used in logs and errors.
  fn name(&self) -> &str;

  async fn after_run(&self, result: &WorkflowResult) -> Result<(), HookError>;
}
