use serde::{Deserialize, Serialize};

use crate::node::NodeDef;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDef {
  pub workflow_id: String,
  pub name: String,
  /// Node ID of the root composer or unit.
  pub root: String,
  /// State keys the caller supplies in the initial payload.
  #[serde(default)]
  pub inputs: Vec<String>,
  pub nodes: Vec<NodeDef>,
}

impl WorkflowDef {
  /// Look up a node definition by ID.
  pub fn node(&self, node_id: &str) -> Option<&NodeDef> {
    self.nodes.iter().find(|n| n.node_id == node_id)
  }
}
