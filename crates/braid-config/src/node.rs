use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
  pub node_id: String,
  #[serde(flatten)]
  pub node_type: NodeType,
}

/// Wiring shared by every unit node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitDef {
  /// State key the unit's value is written to.
  pub output_key: String,
  /// State keys the unit is allowed to read.
  #[serde(default)]
  pub input_keys: Vec<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
}

/// Exit condition of a loop: the loop is approved once `key` holds exactly `sentinel`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitDef {
  pub key: String,
  pub sentinel: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeType {
  /// Render `instruction` against the inputs and send it to the model backend.
  Prompt {
    instruction: String,
    #[serde(flatten)]
    unit: UnitDef,
  },
  /// Render `template` against the inputs; no backend call.
  Template {
    template: String,
    #[serde(flatten)]
    unit: UnitDef,
  },
  /// A unit implemented in code and registered under `handler`.
  Handler {
    handler: String,
    #[serde(flatten)]
    unit: UnitDef,
  },
  /// Suspend until a human approves or rejects; writes a boolean.
  Approval {
    hint: String,
    #[serde(flatten)]
    unit: UnitDef,
  },
  Sequential {
    children: Vec<String>,
  },
  Parallel {
    children: Vec<String>,
  },
  Loop {
    children: Vec<String>,
    max_iterations: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exit: Option<ExitDef>,
  },
}

impl NodeType {
  /// Child node IDs for composers, empty for units.
  pub fn children(&self) -> &[String] {
    match self {
      NodeType::Sequential { children }
      | NodeType::Parallel { children }
      | NodeType::Loop { children, .. } => children,
      _ => &[],
    }
  }

  /// Unit wiring, if this is a unit node.
  pub fn unit(&self) -> Option<&UnitDef> {
    match self {
      NodeType::Prompt { unit, .. }
      | NodeType::Template { unit, .. }
      | NodeType::Handler { unit, .. }
      | NodeType::Approval { unit, .. } => Some(unit),
      _ => None,
    }
  }
}
