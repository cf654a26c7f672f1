use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;
use crate::node::Node;
use crate::validate;

/// A validated workflow ready for execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
  pub workflow_id: String,
  pub name: String,
  pub root: Node,
  /// State keys the caller supplies in the initial payload.
  pub inputs: Vec<String>,
}

impl Workflow {
  /// Build a workflow, checking every composition invariant.
  pub fn new(
    workflow_id: impl Into<String>,
    name: impl Into<String>,
    root: Node,
    inputs: Vec<String>,
  ) -> Result<Self, WorkflowError> {
    validate::validate(&root, &inputs)?;

    Ok(Self {
      workflow_id: workflow_id.into(),
      name: name.into(),
      root,
      inputs,
    })
  }

  /// Get a node by name.
  pub fn get_node(&self, name: &str) -> Option<&Node> {
    self.root.find(name)
  }
}
