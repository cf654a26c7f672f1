//! Execution events and notifiers for observability.
//!
//! Events are emitted during workflow execution to allow consumers to observe
//! progress, persist state, stream to UIs, answer approval requests, etc.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::result::RunStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComposerKind {
  Sequential,
  Parallel,
  Loop,
}

/// Events emitted during workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutionEvent {
  /// Workflow execution has started.
  WorkflowStarted {
    execution_id: String,
    workflow_id: String,
  },

  /// A composer has started running its children.
  ComposerEntered {
    execution_id: String,
    node: String,
    kind: ComposerKind,
  },

  /// A composer has finished, successfully or not.
  ComposerExited {
    execution_id: String,
    node: String,
    kind: ComposerKind,
    failed: bool,
  },

  /// A loop is starting an iteration (1-based).
  LoopIteration {
    execution_id: String,
    node: String,
    iteration: u32,
  },

  /// A unit has started executing.
  UnitStarted { execution_id: String, unit: String },

  /// A unit has produced a value.
  UnitCompleted {
    execution_id: String,
    unit: String,
    output: serde_json::Value,
  },

  /// A unit has failed or timed out.
  UnitFailed {
    execution_id: String,
    unit: String,
    error: String,
  },

  /// A unit is about to call the model backend.
  ModelRequested { execution_id: String, unit: String },

  /// A unit is suspended until the approval token is resolved.
  ApprovalRequested {
    execution_id: String,
    unit: String,
    token: String,
    hint: String,
    payload: serde_json::Value,
  },

  /// Workflow execution has finished.
  WorkflowFinished {
    execution_id: String,
    status: RunStatus,
  },
}

/// Trait for receiving execution events.
///
/// The runtime calls `notify` for each event - implementations decide what
/// to do with them (persist, broadcast, log, ignore, etc.). Implementations
/// must not block.
pub trait ExecutionNotifier: Send + Sync {
  /// Called when an execution event occurs.
  fn notify(&self, event: ExecutionEvent);
}

impl<T: ExecutionNotifier + ?Sized> ExecutionNotifier for Arc<T> {
  fn notify(&self, event: ExecutionEvent) {
    (**self).notify(event)
  }
}

/// A no-op notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {}
}

/// A notifier that sends events to an unbounded channel.
///
/// Use this when you need to consume events asynchronously (e.g., persist
/// to a database, stream to a UI, answer approval requests).
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  // Unbounded so a slow consumer never stalls a unit. Volume is a handful of
  // events per unit invocation.
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Ignore send errors - receiver may have been dropped
    let _ = self.sender.send(event);
  }
}

/// Writes every event to `tracing`.
#[derive(Debug, Clone, Default)]
pub struct LoggingNotifier;

impl ExecutionNotifier for LoggingNotifier {
  fn notify(&self, event: ExecutionEvent) {
    match event {
      ExecutionEvent::WorkflowStarted {
        execution_id,
        workflow_id,
      } => info!(%execution_id, %workflow_id, "workflow started"),
      ExecutionEvent::ComposerEntered {
        execution_id,
        node,
        kind,
      } => info!(%execution_id, %node, ?kind, "composer entered"),
      ExecutionEvent::ComposerExited {
        execution_id,
        node,
        kind,
        failed,
      } => info!(%execution_id, %node, ?kind, failed, "composer exited"),
      ExecutionEvent::LoopIteration {
        execution_id,
        node,
        iteration,
      } => info!(%execution_id, %node, iteration, "loop iteration"),
      ExecutionEvent::UnitStarted { execution_id, unit } => {
        info!(%execution_id, %unit, "unit started")
      }
      ExecutionEvent::UnitCompleted {
        execution_id,
        unit,
        output,
      } => info!(%execution_id, %unit, %output, "unit completed"),
      ExecutionEvent::UnitFailed {
        execution_id,
        unit,
        error,
      } => warn!(%execution_id, %unit, %error, "unit failed"),
      ExecutionEvent::ModelRequested { execution_id, unit } => {
        info!(%execution_id, %unit, "model requested")
      }
      ExecutionEvent::ApprovalRequested {
        execution_id,
        unit,
        token,
        hint,
        ..
      } => info!(%execution_id, %unit, %token, %hint, "approval requested"),
      ExecutionEvent::WorkflowFinished {
        execution_id,
        status,
      } => info!(%execution_id, ?status, "workflow finished"),
    }
  }
}

/// Counts unit invocations, model requests and runs.
#[derive(Debug, Default)]
pub struct CountingNotifier {
  workflows: AtomicU64,
  units: AtomicU64,
  model_requests: AtomicU64,
}

impl CountingNotifier {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn workflows(&self) -> u64 {
    self.workflows.load(Ordering::Relaxed)
  }

  pub fn units(&self) -> u64 {
    self.units.load(Ordering::Relaxed)
  }

  pub fn model_requests(&self) -> u64 {
    self.model_requests.load(Ordering::Relaxed)
  }
}

impl ExecutionNotifier for CountingNotifier {
  fn notify(&self, event: ExecutionEvent) {
    let counter = match event {
      ExecutionEvent::WorkflowStarted { .. } => &self.workflows,
      ExecutionEvent::UnitStarted { .. } => &self.units,
      ExecutionEvent::ModelRequested { .. } => &self.model_requests,
      _ => return,
    };
    counter.fetch_add(1, Ordering::Relaxed);
  }
}

/// Fans events out to several notifiers in registration order.
#[derive(Clone, Default)]
pub(crate) struct Notifiers {
  inner: Vec<Arc<dyn ExecutionNotifier>>,
}

impl Notifiers {
  pub(crate) fn push(&mut self, notifier: Arc<dyn ExecutionNotifier>) {
    self.inner.push(notifier);
  }
}

impl ExecutionNotifier for Notifiers {
  fn notify(&self, event: ExecutionEvent) {
    if let Some((last, rest)) = self.inner.split_last() {
      for notifier in rest {
        notifier.notify(event.clone());
      }
      last.notify(event);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn unit_started(unit: &str) -> ExecutionEvent {
    ExecutionEvent::UnitStarted {
      execution_id: "e".to_string(),
      unit: unit.to_string(),
    }
  }

  #[test]
  fn test_counting_notifier() {
    let counter = CountingNotifier::new();
    counter.notify(ExecutionEvent::WorkflowStarted {
      execution_id: "e".to_string(),
      workflow_id: "w".to_string(),
    });
    counter.notify(unit_started("a"));
    counter.notify(unit_started("b"));
    counter.notify(ExecutionEvent::ModelRequested {
      execution_id: "e".to_string(),
      unit: "a".to_string(),
    });

    assert_eq!(counter.workflows(), 1);
    assert_eq!(counter.units(), 2);
    assert_eq!(counter.model_requests(), 1);
  }

  #[test]
  fn test_channel_notifier_ignores_dropped_receiver() {
    let (tx, rx) = mpsc::unbounded_channel();
    drop(rx);
    ChannelNotifier::new(tx).notify(unit_started("a"));
  }

  #[tokio::test]
  async fn test_fanout_reaches_every_notifier() {
    let counter = Arc::new(CountingNotifier::new());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut notifiers = Notifiers::default();
    notifiers.push(counter.clone());
    notifiers.push(Arc::new(ChannelNotifier::new(tx)));
    notifiers.notify(unit_started("a"));

    assert_eq!(counter.units(), 1);
    assert!(matches!(
      rx.recv().await,
      Some(ExecutionEvent::UnitStarted { unit, .. }) if unit == "a"
    ));
  }
}
