use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Keys with this prefix are step-scoped: they are dropped when the
/// sequential or parallel invocation that wrote them exits.
pub const STEP_SCOPE_PREFIX: &str = "temp:";

/// Keys with this prefix belong to the user rather than the session. A
/// session store shares them across every session of the same user.
pub const USER_SCOPE_PREFIX: &str = "user:";

/// A node of the composition tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
  pub name: String,
  pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
  Unit(UnitSpec),
  Sequential(Vec<Node>),
  Parallel(Vec<Node>),
  Loop(LoopSpec),
}

/// A leaf step: what it reads, where it writes, and how it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSpec {
  pub kind: UnitKind,
  pub input_keys: Vec<String>,
  pub output_key: String,
  pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UnitKind {
  Prompt { instruction: String },
  Template { template: String },
  Handler { handler: String },
  Approval { hint: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopSpec {
  pub children: Vec<Node>,
  pub max_iterations: u32,
  pub exit: Option<ExitCondition>,
}

/// Loop exit condition.
///
/// Approval requires the value under `key` to equal `sentinel` exactly.
/// `"APPROVED."` or `"Looks good, APPROVED"` do not match `"APPROVED"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitCondition {
  pub key: String,
  pub sentinel: serde_json::Value,
}

impl ExitCondition {
  pub fn new(key: impl Into<String>, sentinel: impl Into<serde_json::Value>) -> Self {
    Self {
      key: key.into(),
      sentinel: sentinel.into(),
    }
  }

  pub fn is_approved(&self, value: Option<&serde_json::Value>) -> bool {
    value == Some(&self.sentinel)
  }
}

impl UnitSpec {
  fn new(kind: UnitKind, output_key: impl Into<String>) -> Self {
    Self {
      kind,
      input_keys: Vec::new(),
      output_key: output_key.into(),
      timeout_ms: None,
    }
  }

  pub fn prompt(instruction: impl Into<String>, output_key: impl Into<String>) -> Self {
    Self::new(
      UnitKind::Prompt {
        instruction: instruction.into(),
      },
      output_key,
    )
  }

  pub fn template(template: impl Into<String>, output_key: impl Into<String>) -> Self {
    Self::new(
      UnitKind::Template {
        template: template.into(),
      },
      output_key,
    )
  }

  pub fn handler(handler: impl Into<String>, output_key: impl Into<String>) -> Self {
    Self::new(
      UnitKind::Handler {
        handler: handler.into(),
      },
      output_key,
    )
  }

  pub fn approval(hint: impl Into<String>, output_key: impl Into<String>) -> Self {
    Self::new(UnitKind::Approval { hint: hint.into() }, output_key)
  }

  /// Declare the state keys this unit reads.
  pub fn inputs<I, S>(mut self, keys: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.input_keys = keys.into_iter().map(Into::into).collect();
    self
  }

  pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
    self.timeout_ms = Some(timeout_ms);
    self
  }
}

impl Node {
  pub fn unit(name: impl Into<String>, spec: UnitSpec) -> Self {
    Self {
      name: name.into(),
      kind: NodeKind::Unit(spec),
    }
  }

  pub fn sequential(name: impl Into<String>, children: Vec<Node>) -> Self {
    Self {
      name: name.into(),
      kind: NodeKind::Sequential(children),
    }
  }

  pub fn parallel(name: impl Into<String>, children: Vec<Node>) -> Self {
    Self {
      name: name.into(),
      kind: NodeKind::Parallel(children),
    }
  }

  pub fn looping(
    name: impl Into<String>,
    children: Vec<Node>,
    max_iterations: u32,
    exit: Option<ExitCondition>,
  ) -> Self {
    Self {
      name: name.into(),
      kind: NodeKind::Loop(LoopSpec {
        children,
        max_iterations,
        exit,
      }),
    }
  }

  /// Direct children of this node.
  pub fn children(&self) -> &[Node] {
    match &self.kind {
      NodeKind::Unit(_) => &[],
      NodeKind::Sequential(children) | NodeKind::Parallel(children) => children,
      NodeKind::Loop(spec) => &spec.children,
    }
  }

  /// Every state key written by a unit in this subtree.
  pub fn output_keys(&self) -> BTreeSet<String> {
    let mut keys = BTreeSet::new();
    self.collect_output_keys(&mut keys);
    keys
  }

  fn collect_output_keys(&self, keys: &mut BTreeSet<String>) {
    match &self.kind {
      NodeKind::Unit(spec) => {
        keys.insert(spec.output_key.clone());
      }
      _ => {
        for child in self.children() {
          child.collect_output_keys(keys);
        }
      }
    }
  }

  /// All units in this subtree, depth first in declared order.
  pub fn units(&self) -> Vec<(&str, &UnitSpec)> {
    let mut units = Vec::new();
    self.collect_units(&mut units);
    units
  }

  fn collect_units<'a>(&'a self, units: &mut Vec<(&'a str, &'a UnitSpec)>) {
    match &self.kind {
      NodeKind::Unit(spec) => units.push((self.name.as_str(), spec)),
      _ => {
        for child in self.children() {
          child.collect_units(units);
        }
      }
    }
  }

  /// Find a node by name in this subtree.
  pub fn find(&self, name: &str) -> Option<&Node> {
    if self.name == name {
      return Some(self);
    }
    self.children().iter().find_map(|c| c.find(name))
  }
}
