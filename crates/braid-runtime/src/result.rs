//! Execution result types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::state::StateBus;

/// Terminal status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
  Succeeded,
  Failed,
  /// Finished without failure, but at least one loop stopped at its
  /// iteration cap instead of being approved.
  CapReached,
  Cancelled,
}

impl RunStatus {
  /// Whether the run finished without failing or being cancelled.
  pub fn is_success(self) -> bool {
    matches!(self, RunStatus::Succeeded | RunStatus::CapReached)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
  Succeeded,
  Failed,
  TimedOut,
  Cancelled,
}

/// What happened to a unit, as of its latest invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitRecord {
  pub unit: String,
  pub invocations: u32,
  pub status: UnitStatus,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub output: Option<serde_json::Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopExit {
  Approved,
  CapReached,
  Failed,
  Cancelled,
}

/// How a loop terminated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopRecord {
  pub node: String,
  /// Iterations started, including the one that terminated the loop.
  pub iterations: u32,
  pub exit: LoopExit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
  /// The unit returned a failure or panicked.
  Unit,
  /// The unit exceeded its timeout.
  Timeout,
}

/// Why a run failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionFailure {
  /// The node that decided the failure: the failing unit, or the parallel
  /// composer that collected failures from its children.
  pub node: String,
  /// Names of the failing children (the unit itself for a unit failure).
  pub failed: Vec<String>,
  pub kind: FailureKind,
  pub message: String,
}

/// Result of a workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
  pub execution_id: String,
  pub workflow_id: String,
  pub status: RunStatus,
  /// Terminal state of the bus.
  pub state: StateBus,
  /// Every invoked unit, keyed by name.
  pub unit_results: BTreeMap<String, UnitRecord>,
  /// Every loop that ran, keyed by name.
  pub loop_results: BTreeMap<String, LoopRecord>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub failure: Option<ExecutionFailure>,
}
