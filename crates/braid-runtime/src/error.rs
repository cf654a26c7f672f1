//! Runtime errors.

use braid_workflow::WorkflowError;

use crate::hook::HookError;

/// Errors raised while building a runtime or around a run.
///
/// Unit failures are not errors: they are reported through
/// [`crate::WorkflowResult::status`].
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
  /// The workflow violates a composition invariant.
  #[error(transparent)]
  Workflow(#[from] WorkflowError),

  /// A handler unit names a handler that was never registered.
  #[error("unit '{unit}' uses unregistered handler '{handler}'")]
  UnknownHandler { unit: String, handler: String },

  /// A prompt unit exists but no model backend was configured.
  #[error("unit '{unit}' needs a model backend but none was configured")]
  MissingBackend { unit: String },

  /// A unit's instruction or hint template does not compile.
  #[error("invalid template in unit '{unit}': {message}")]
  InvalidTemplate { unit: String, message: String },

  /// The initial state was not a JSON object.
  #[error("initial state must be a JSON object, got {found}")]
  InvalidInitialState { found: String },

  /// A post-run hook failed after the run finished.
  #[error("post-run hook '{hook}' failed: {source}")]
  PostRun {
    hook: String,
    #[source]
    source: HookError,
  },
}
