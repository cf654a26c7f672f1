//! Resolution of a [`WorkflowDef`] into a validated [`Workflow`].

use std::collections::{HashMap, HashSet};

use braid_config::{NodeDef, NodeType, UnitDef, WorkflowDef};

use crate::error::WorkflowError;
use crate::node::{ExitCondition, Node, UnitKind, UnitSpec};
use crate::workflow::Workflow;

/// Resolve a workflow definition into a validated workflow.
///
/// This process:
/// 1. Checks node IDs are unique and every child reference exists
/// 2. Rejects cycles and nodes shared between composers
/// 3. Builds the owned composition tree from the root
/// 4. Runs the composition invariant checks of [`Workflow::new`]
pub fn resolve(def: WorkflowDef) -> Result<Workflow, WorkflowError> {
  let mut nodes: HashMap<&str, &NodeDef> = HashMap::new();
  for node in &def.nodes {
    if nodes.insert(node.node_id.as_str(), node).is_some() {
      return Err(WorkflowError::DuplicateName(node.node_id.clone()));
    }
  }

  if !nodes.contains_key(def.root.as_str()) {
    return Err(WorkflowError::UnknownNode(def.root.clone()));
  }

  validate_references(&nodes)?;
  detect_cycle(&nodes)?;
  check_single_parent(&def)?;

  let root = build_node(def.root.as_str(), &nodes)?;
  Workflow::new(def.workflow_id, def.name, root, def.inputs)
}

fn validate_references(nodes: &HashMap<&str, &NodeDef>) -> Result<(), WorkflowError> {
  for node in nodes.values() {
    if let Some(missing) = node
      .node_type
      .children()
      .iter()
      .find(|c| !nodes.contains_key(c.as_str()))
    {
      return Err(WorkflowError::UnknownNode(missing.clone()));
    }
  }
  Ok(())
}

/// Check for cycles using DFS.
fn detect_cycle(nodes: &HashMap<&str, &NodeDef>) -> Result<(), WorkflowError> {
  // 0 = unvisited, 1 = in progress, 2 = done
  let mut color: HashMap<&str, u8> = nodes.keys().map(|id| (*id, 0u8)).collect();

  fn dfs<'a>(
    node: &'a str,
    nodes: &HashMap<&'a str, &'a NodeDef>,
    color: &mut HashMap<&'a str, u8>,
  ) -> Option<&'a str> {
    color.insert(node, 1);

    if let Some(def) = nodes.get(node).copied() {
      for child in def.node_type.children() {
        match color.get(child.as_str()) {
          Some(1) => return Some(child.as_str()),
          Some(0) => {
            if let Some(found) = dfs(child.as_str(), nodes, color) {
              return Some(found);
            }
          }
          _ => {}
        }
      }
    }

    color.insert(node, 2);
    None
  }

  let mut ids: Vec<&str> = nodes.keys().copied().collect();
  ids.sort_unstable();

  for id in ids {
    if color.get(id) != Some(&0) {
      continue;
    }
    if let Some(found) = dfs(id, nodes, &mut color) {
      return Err(WorkflowError::CycleDetected(found.to_string()));
    }
  }

  Ok(())
}

/// Every node except the root has exactly one parent.
fn check_single_parent(def: &WorkflowDef) -> Result<(), WorkflowError> {
  let mut seen: HashSet<&str> = HashSet::new();
  seen.insert(def.root.as_str());

  for node in &def.nodes {
    for child in node.node_type.children() {
      if !seen.insert(child.as_str()) {
        return Err(WorkflowError::SharedNode {
          node: child.clone(),
        });
      }
    }
  }

  if let Some(orphan) = def
    .nodes
    .iter()
    .find(|n| !seen.contains(n.node_id.as_str()))
  {
    return Err(WorkflowError::UnreachableNode(orphan.node_id.clone()));
  }

  Ok(())
}

fn build_node(node_id: &str, nodes: &HashMap<&str, &NodeDef>) -> Result<Node, WorkflowError> {
  let def = nodes
    .get(node_id)
    .ok_or_else(|| WorkflowError::UnknownNode(node_id.to_string()))?;

  let children = |ids: &[String]| -> Result<Vec<Node>, WorkflowError> {
    ids.iter().map(|id| build_node(id, nodes)).collect()
  };

  let node = match &def.node_type {
    NodeType::Prompt { instruction, unit } => Node::unit(
      node_id,
      unit_spec(
        UnitKind::Prompt {
          instruction: instruction.clone(),
        },
        unit,
      ),
    ),
    NodeType::Template { template, unit } => Node::unit(
      node_id,
      unit_spec(
        UnitKind::Template {
          template: template.clone(),
        },
        unit,
      ),
    ),
    NodeType::Handler { handler, unit } => Node::unit(
      node_id,
      unit_spec(
        UnitKind::Handler {
          handler: handler.clone(),
        },
        unit,
      ),
    ),
    NodeType::Approval { hint, unit } => Node::unit(
      node_id,
      unit_spec(UnitKind::Approval { hint: hint.clone() }, unit),
    ),
    NodeType::Sequential { children: ids } => Node::sequential(node_id, children(ids)?),
    NodeType::Parallel { children: ids } => Node::parallel(node_id, children(ids)?),
    NodeType::Loop {
      children: ids,
      max_iterations,
      exit,
    } => Node::looping(
      node_id,
      children(ids)?,
      *max_iterations,
      exit
        .as_ref()
        .map(|e| ExitCondition::new(e.key.clone(), e.sentinel.clone())),
    ),
  };

  Ok(node)
}

fn unit_spec(kind: UnitKind, unit: &UnitDef) -> UnitSpec {
  UnitSpec {
    kind,
    input_keys: unit.input_keys.clone(),
    output_key: unit.output_key.clone(),
    timeout_ms: unit.timeout_ms,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::NodeKind;
  use serde_json::json;

  fn parse(value: serde_json::Value) -> WorkflowDef {
    serde_json::from_value(value).unwrap()
  }

  fn story_pipeline() -> serde_json::Value {
    json!({
      "workflow_id": "story",
      "name": "Story Pipeline",
      "root": "pipeline",
      "inputs": ["prompt"],
      "nodes": [
        { "node_id": "pipeline", "type": "sequential", "children": ["writer", "refine"] },
        {
          "node_id": "writer", "type": "prompt",
          "instruction": "Write a short story about {{ prompt }}",
          "input_keys": ["prompt"], "output_key": "current_story"
        },
        {
          "node_id": "refine", "type": "loop", "children": ["critic", "refiner"],
          "max_iterations": 2,
          "exit": { "key": "critique", "sentinel": "APPROVED" }
        },
        {
          "node_id": "critic", "type": "prompt",
          "instruction": "Review: {{ current_story }}",
          "input_keys": ["current_story"], "output_key": "critique"
        },
        {
          "node_id": "refiner", "type": "prompt",
          "instruction": "Rewrite {{ current_story }} using {{ critique }}",
          "input_keys": ["current_story", "critique"], "output_key": "current_story"
        }
      ]
    })
  }

  #[test]
  fn test_resolve_story_pipeline() {
    let workflow = resolve(parse(story_pipeline())).unwrap();

    assert_eq!(workflow.workflow_id, "story");
    assert_eq!(workflow.root.name, "pipeline");
    let refine = workflow.get_node("refine").unwrap();
    match &refine.kind {
      NodeKind::Loop(spec) => {
        assert_eq!(spec.max_iterations, 2);
        let names: Vec<_> = spec.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["critic", "refiner"]);
      }
      other => panic!("expected loop, got {:?}", other),
    }
  }

  #[test]
  fn test_unknown_root() {
    let mut def = parse(story_pipeline());
    def.root = "missing".to_string();
    assert_eq!(
      resolve(def).unwrap_err(),
      WorkflowError::UnknownNode("missing".to_string())
    );
  }

  #[test]
  fn test_unknown_child() {
    let def = parse(json!({
      "workflow_id": "w", "name": "w", "root": "s",
      "nodes": [{ "node_id": "s", "type": "sequential", "children": ["ghost"] }]
    }));
    assert_eq!(
      resolve(def).unwrap_err(),
      WorkflowError::UnknownNode("ghost".to_string())
    );
  }

  #[test]
  fn test_cycle_detected() {
    let def = parse(json!({
      "workflow_id": "w", "name": "w", "root": "a",
      "nodes": [
        { "node_id": "a", "type": "sequential", "children": ["b"] },
        { "node_id": "b", "type": "parallel", "children": ["a"] }
      ]
    }));
    assert!(matches!(
      resolve(def),
      Err(WorkflowError::CycleDetected(_))
    ));
  }

  #[test]
  fn test_self_reference_is_a_cycle() {
    let def = parse(json!({
      "workflow_id": "w", "name": "w", "root": "l",
      "nodes": [{ "node_id": "l", "type": "loop", "children": ["l"], "max_iterations": 2 }]
    }));
    assert_eq!(
      resolve(def).unwrap_err(),
      WorkflowError::CycleDetected("l".to_string())
    );
  }

  #[test]
  fn test_shared_child_rejected() {
    let def = parse(json!({
      "workflow_id": "w", "name": "w", "root": "s",
      "nodes": [
        { "node_id": "s", "type": "sequential", "children": ["u", "u"] },
        { "node_id": "u", "type": "template", "template": "x", "output_key": "x" }
      ]
    }));
    assert_eq!(
      resolve(def).unwrap_err(),
      WorkflowError::SharedNode {
        node: "u".to_string()
      }
    );
  }

  #[test]
  fn test_unreachable_node_rejected() {
    let def = parse(json!({
      "workflow_id": "w", "name": "w", "root": "s",
      "nodes": [
        { "node_id": "s", "type": "sequential", "children": ["u"] },
        { "node_id": "u", "type": "template", "template": "x", "output_key": "x" },
        { "node_id": "stray", "type": "template", "template": "y", "output_key": "y" }
      ]
    }));
    assert_eq!(
      resolve(def).unwrap_err(),
      WorkflowError::UnreachableNode("stray".to_string())
    );
  }

  #[test]
  fn test_duplicate_node_id() {
    let def = parse(json!({
      "workflow_id": "w", "name": "w", "root": "u",
      "nodes": [
        { "node_id": "u", "type": "template", "template": "x", "output_key": "x" },
        { "node_id": "u", "type": "template", "template": "y", "output_key": "y" }
      ]
    }));
    assert_eq!(
      resolve(def).unwrap_err(),
      WorkflowError::DuplicateName("u".to_string())
    );
  }

  #[test]
  fn test_composition_checks_run_after_resolution() {
    let def = parse(json!({
      "workflow_id": "w", "name": "w", "root": "p",
      "nodes": [
        { "node_id": "p", "type": "parallel", "children": ["a", "b"] },
        { "node_id": "a", "type": "template", "template": "1", "output_key": "out" },
        { "node_id": "b", "type": "template", "template": "2", "output_key": "out" }
      ]
    }));
    assert!(matches!(
      resolve(def),
      Err(WorkflowError::OverlappingOutputKeys { .. })
    ));
  }
}
