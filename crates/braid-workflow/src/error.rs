use thiserror::Error;

/// Composition invariant violations.
///
/// These are configuration bugs, raised while building a [`crate::Workflow`]
/// and never at run time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
  #[error("node not found: {0}")]
  UnknownNode(String),

  #[error("duplicate node name: {0}")]
  DuplicateName(String),

  #[error("cycle detected through node '{0}'")]
  CycleDetected(String),

  #[error("node '{node}' is referenced by more than one composer")]
  SharedNode { node: String },

  #[error("node '{0}' is not reachable from the root")]
  UnreachableNode(String),

  #[error("composer '{0}' has no children")]
  EmptyComposer(String),

  #[error("loop '{0}' must allow at least one iteration")]
  ZeroIterationCap(String),

  #[error("parallel '{composer}' children '{first}' and '{second}' both write '{key}'")]
  OverlappingOutputKeys {
    composer: String,
    key: String,
    first: String,
    second: String,
  },

  #[error("unit '{unit}' reads '{key}' but nothing upstream writes it")]
  MissingInput { unit: String, key: String },

  #[error("loop '{node}' exits on '{key}' but no unit in its body writes it")]
  InvalidExitKey { node: String, key: String },
}
