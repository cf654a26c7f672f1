//! Construction-time checks for composition trees.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::WorkflowError;
use crate::node::{Node, NodeKind, STEP_SCOPE_PREFIX};

pub(crate) fn validate(root: &Node, inputs: &[String]) -> Result<(), WorkflowError> {
  let mut names = HashSet::new();
  check_structure(root, &mut names)?;

  let mut available: BTreeSet<String> = inputs.iter().cloned().collect();
  check_wiring(root, &mut available)
}

/// Names, empty composers, loop caps, exit keys and parallel key overlap.
fn check_structure<'a>(node: &'a Node, names: &mut HashSet<&'a str>) -> Result<(), WorkflowError> {
  if !names.insert(node.name.as_str()) {
    return Err(WorkflowError::DuplicateName(node.name.clone()));
  }

  match &node.kind {
    NodeKind::Unit(_) => return Ok(()),
    NodeKind::Sequential(children) | NodeKind::Parallel(children) if children.is_empty() => {
      return Err(WorkflowError::EmptyComposer(node.name.clone()));
    }
    NodeKind::Parallel(children) => check_disjoint_outputs(&node.name, children)?,
    NodeKind::Loop(spec) => {
      if spec.children.is_empty() {
        return Err(WorkflowError::EmptyComposer(node.name.clone()));
      }
      if spec.max_iterations == 0 {
        return Err(WorkflowError::ZeroIterationCap(node.name.clone()));
      }
      if let Some(exit) = &spec.exit {
        let written = spec.children.iter().any(|c| c.output_keys().contains(&exit.key));
        if !written || exit.key.starts_with(STEP_SCOPE_PREFIX) {
          return Err(WorkflowError::InvalidExitKey {
            node: node.name.clone(),
            key: exit.key.clone(),
          });
        }
      }
    }
    NodeKind::Sequential(_) => {}
  }

  for child in node.children() {
    check_structure(child, names)?;
  }
  Ok(())
}

fn check_disjoint_outputs(composer: &str, children: &[Node]) -> Result<(), WorkflowError> {
  let mut owners: HashMap<String, &str> = HashMap::new();

  for child in children {
    for key in child.output_keys() {
      if let Some(first) = owners.get(&key) {
        return Err(WorkflowError::OverlappingOutputKeys {
          composer: composer.to_string(),
          key,
          first: first.to_string(),
          second: child.name.clone(),
        });
      }
      owners.insert(key, &child.name);
    }
  }
  Ok(())
}

/// Walk the tree in execution order tracking which keys are guaranteed to be
/// present. Parallel siblings never see each other's keys, and a loop body is
/// checked in first-iteration order.
fn check_wiring(node: &Node, available: &mut BTreeSet<String>) -> Result<(), WorkflowError> {
  match &node.kind {
    NodeKind::Unit(spec) => {
      if let Some(key) = spec.input_keys.iter().find(|k| !available.contains(*k)) {
        return Err(WorkflowError::MissingInput {
          unit: node.name.clone(),
          key: key.clone(),
        });
      }
      available.insert(spec.output_key.clone());
    }
    NodeKind::Sequential(children) => {
      let before = available.clone();
      for child in children {
        check_wiring(child, available)?;
      }
      drop_step_scoped(available, &before);
    }
    NodeKind::Parallel(children) => {
      let before = available.clone();
      for child in children {
        let mut view = before.clone();
        check_wiring(child, &mut view)?;
        available.extend(view);
      }
      drop_step_scoped(available, &before);
    }
    NodeKind::Loop(spec) => {
      let before = available.clone();
      for child in &spec.children {
        check_wiring(child, available)?;
      }
      drop_step_scoped(available, &before);
    }
  }
  Ok(())
}

fn drop_step_scoped(available: &mut BTreeSet<String>, before: &BTreeSet<String>) {
  available.retain(|k| !k.starts_with(STEP_SCOPE_PREFIX) || before.contains(k));
}

#[cfg(test)]
mod tests {
  use crate::{ExitCondition, Node, UnitSpec, Workflow, WorkflowError};

  fn unit(name: &str, output: &str) -> Node {
    Node::unit(name, UnitSpec::handler(name, output))
  }

  fn unit_reading(name: &str, output: &str, inputs: &[&str]) -> Node {
    Node::unit(name, UnitSpec::handler(name, output).inputs(inputs.iter().copied()))
  }

  fn build(root: Node, inputs: &[&str]) -> Result<Workflow, WorkflowError> {
    Workflow::new(
      "wf",
      "Test",
      root,
      inputs.iter().map(|s| s.to_string()).collect(),
    )
  }

  #[test]
  fn test_research_pipeline_is_valid() {
    let root = Node::sequential(
      "briefing",
      vec![
        Node::parallel(
          "research",
          vec![
            unit_reading("tech", "tech_research", &["topic"]),
            unit_reading("health", "health_research", &["topic"]),
            unit_reading("finance", "finance_research", &["topic"]),
          ],
        ),
        unit_reading(
          "aggregate",
          "executive_summary",
          &["tech_research", "health_research", "finance_research"],
        ),
      ],
    );

    assert!(build(root, &["topic"]).is_ok());
  }

  #[test]
  fn test_overlapping_parallel_outputs_rejected() {
    let root = Node::parallel(
      "research",
      vec![unit("tech", "research"), unit("health", "research")],
    );

    let err = build(root, &[]).unwrap_err();
    assert_eq!(
      err,
      WorkflowError::OverlappingOutputKeys {
        composer: "research".to_string(),
        key: "research".to_string(),
        first: "tech".to_string(),
        second: "health".to_string(),
      }
    );
  }

  #[test]
  fn test_overlap_inside_nested_subtrees_rejected() {
    let root = Node::parallel(
      "p",
      vec![
        Node::sequential("left", vec![unit("a", "x"), unit("b", "shared")]),
        Node::looping("right", vec![unit("c", "shared")], 2, None),
      ],
    );

    assert!(matches!(
      build(root, &[]),
      Err(WorkflowError::OverlappingOutputKeys { .. })
    ));
  }

  #[test]
  fn test_sequential_may_rewrite_a_key() {
    let root = Node::sequential(
      "story",
      vec![
        unit("writer", "current_story"),
        unit_reading("refiner", "current_story", &["current_story"]),
      ],
    );
    assert!(build(root, &[]).is_ok());
  }

  #[test]
  fn test_empty_composers_rejected() {
    assert_eq!(
      build(Node::sequential("s", vec![]), &[]).unwrap_err(),
      WorkflowError::EmptyComposer("s".to_string())
    );
    assert_eq!(
      build(Node::parallel("p", vec![]), &[]).unwrap_err(),
      WorkflowError::EmptyComposer("p".to_string())
    );
    assert_eq!(
      build(Node::looping("l", vec![], 3, None), &[]).unwrap_err(),
      WorkflowError::EmptyComposer("l".to_string())
    );
  }

  #[test]
  fn test_zero_iteration_cap_rejected() {
    let root = Node::looping("l", vec![unit("a", "x")], 0, None);
    assert_eq!(
      build(root, &[]).unwrap_err(),
      WorkflowError::ZeroIterationCap("l".to_string())
    );
  }

  #[test]
  fn test_duplicate_names_rejected() {
    let root = Node::sequential("root", vec![unit("a", "x"), unit("a", "y")]);
    assert_eq!(
      build(root, &[]).unwrap_err(),
      WorkflowError::DuplicateName("a".to_string())
    );
  }

  #[test]
  fn test_missing_input_rejected() {
    let root = Node::sequential(
      "root",
      vec![unit_reading("a", "x", &["nope"]), unit("b", "y")],
    );
    assert_eq!(
      build(root, &[]).unwrap_err(),
      WorkflowError::MissingInput {
        unit: "a".to_string(),
        key: "nope".to_string(),
      }
    );
  }

  #[test]
  fn test_parallel_siblings_cannot_read_each_other() {
    let root = Node::parallel(
      "p",
      vec![unit("a", "x"), unit_reading("b", "y", &["x"])],
    );
    assert!(matches!(
      build(root, &[]),
      Err(WorkflowError::MissingInput { .. })
    ));
  }

  #[test]
  fn test_input_must_come_before_reader() {
    let root = Node::sequential(
      "root",
      vec![unit_reading("reader", "y", &["x"]), unit("writer", "x")],
    );
    assert!(matches!(
      build(root, &[]),
      Err(WorkflowError::MissingInput { .. })
    ));
  }

  #[test]
  fn test_step_scoped_keys_do_not_leak() {
    let root = Node::sequential(
      "root",
      vec![
        Node::sequential(
          "inner",
          vec![unit("a", "temp:scratch"), unit_reading("b", "x", &["temp:scratch"])],
        ),
        unit_reading("c", "y", &["temp:scratch"]),
      ],
    );
    assert_eq!(
      build(root, &[]).unwrap_err(),
      WorkflowError::MissingInput {
        unit: "c".to_string(),
        key: "temp:scratch".to_string(),
      }
    );
  }

  #[test]
  fn test_exit_key_must_be_written_in_body() {
    let root = Node::looping(
      "refine",
      vec![unit("critic", "critique")],
      2,
      Some(ExitCondition::new("verdict", "APPROVED")),
    );
    assert_eq!(
      build(root, &[]).unwrap_err(),
      WorkflowError::InvalidExitKey {
        node: "refine".to_string(),
        key: "verdict".to_string(),
      }
    );
  }

  #[test]
  fn test_loop_wiring_follows_first_iteration() {
    let root = Node::sequential(
      "story",
      vec![
        unit_reading("writer", "current_story", &["prompt"]),
        Node::looping(
          "refine",
          vec![
            unit_reading("critic", "critique", &["current_story"]),
            unit_reading("refiner", "current_story", &["current_story", "critique"]),
          ],
          2,
          Some(ExitCondition::new("critique", "APPROVED")),
        ),
      ],
    );
    assert!(build(root, &["prompt"]).is_ok());
  }
}
