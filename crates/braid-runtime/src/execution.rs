//! Workflow execution.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use braid_workflow::ExitCondition;
use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use serde_json::Value;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::approval::ApprovalGate;
use crate::error::RuntimeError;
use crate::events::{ComposerKind, ExecutionEvent, ExecutionNotifier};
use crate::plan::{BoundUnit, PlanKind, PlanNode};
use crate::result::{
  ExecutionFailure, FailureKind, LoopExit, LoopRecord, RunStatus, UnitRecord, UnitStatus,
  WorkflowResult,
};
use crate::runtime::WorkflowRuntime;
use crate::state::StateBus;
use crate::unit::{Unit, UnitContext, UnitResult};

/// A handle to a workflow execution.
///
/// Call `.wait()` to run the execution and get the result.
pub struct WorkflowExecution<'a> {
  runtime: &'a WorkflowRuntime,
  execution_id: String,
  initial: StateBus,
  cancel: CancellationToken,
}

impl<'a> WorkflowExecution<'a> {
  pub(crate) fn new(
    runtime: &'a WorkflowRuntime,
    execution_id: String,
    initial: StateBus,
    cancel: CancellationToken,
  ) -> Self {
    Self {
      runtime,
      execution_id,
      initial,
      cancel,
    }
  }

  pub fn execution_id(&self) -> &str {
    &self.execution_id
  }

  /// Run the workflow to a terminal status, then the post-run hooks.
  ///
  /// Unit failures, cap-reached loops and cancellation are reported through
  /// the result's status. Only a failing post-run hook is an error.
  #[instrument(
    name = "workflow_execute",
    skip(self),
    fields(
      workflow_id = %self.runtime.workflow.workflow_id,
      execution_id = %self.execution_id,
    )
  )]
  pub async fn wait(self) -> Result<WorkflowResult, RuntimeError> {
    let workflow_id = self.runtime.workflow.workflow_id.clone();

    info!(
      execution_id = %self.execution_id,
      %workflow_id,
      state_keys = self.initial.len(),
      "workflow_started"
    );

    let shared = Arc::new(Shared {
      execution_id: self.execution_id.clone(),
      notifier: Arc::new(self.runtime.notifiers.clone()),
      approvals: self.runtime.approvals.clone(),
      cancel: self.cancel.clone(),
      default_timeout_ms: self.runtime.config.default_unit_timeout_ms,
      units: Mutex::new(BTreeMap::new()),
      loops: Mutex::new(BTreeMap::new()),
      cap_reached: AtomicBool::new(false),
    });

    shared.notify(ExecutionEvent::WorkflowStarted {
      execution_id: self.execution_id.clone(),
      workflow_id: workflow_id.clone(),
    });

    let outcome = run_node(shared.clone(), self.runtime.plan.clone(), self.initial).await;

    let (status, state, failure) = match outcome {
      NodeOutcome::Completed { bus, flow } => {
        if flow == Flow::Halt {
          info!(
            execution_id = %self.execution_id,
            "halt signal reached the root outside of any loop, finishing early"
          );
        }
        let status = if shared.cap_reached.load(Ordering::SeqCst) {
          RunStatus::CapReached
        } else {
          RunStatus::Succeeded
        };
        (status, bus, None)
      }
      NodeOutcome::Failed { bus, failure } => (RunStatus::Failed, bus, Some(failure)),
      NodeOutcome::Cancelled { bus } => (RunStatus::Cancelled, bus, None),
    };

    match (&status, &failure) {
      (RunStatus::Failed, Some(failure)) => error!(
        execution_id = %self.execution_id,
        node = %failure.node,
        failed = ?failure.failed,
        error = %failure.message,
        "workflow_failed"
      ),
      (RunStatus::Cancelled, _) => warn!(execution_id = %self.execution_id, "workflow_cancelled"),
      _ => info!(execution_id = %self.execution_id, ?status, "workflow_completed"),
    }

    self.runtime.approvals.release(&self.execution_id);

    shared.notify(ExecutionEvent::WorkflowFinished {
      execution_id: self.execution_id.clone(),
      status,
    });

    let result = WorkflowResult {
      execution_id: self.execution_id,
      workflow_id,
      status,
      state,
      unit_results: std::mem::take(&mut *lock(&shared.units)),
      loop_results: std::mem::take(&mut *lock(&shared.loops)),
      failure,
    };

    for hook in &self.runtime.hooks {
      hook
        .after_run(&result)
        .await
        .map_err(|source| RuntimeError::PostRun {
          hook: hook.name().to_string(),
          source,
        })?;
    }

    Ok(result)
  }
}

/// Run-wide context shared by every node of one execution.
struct Shared {
  execution_id: String,
  notifier: Arc<dyn ExecutionNotifier>,
  approvals: ApprovalGate,
  cancel: CancellationToken,
  default_timeout_ms: Option<u64>,
  units: Mutex<BTreeMap<String, UnitRecord>>,
  loops: Mutex<BTreeMap<String, LoopRecord>>,
  cap_reached: AtomicBool,
}

impl Shared {
  fn notify(&self, event: ExecutionEvent) {
    self.notifier.notify(event);
  }

  fn record_unit(
    &self,
    unit: &str,
    status: UnitStatus,
    output: Option<Value>,
    error: Option<String>,
  ) {
    let mut units = lock(&self.units);
    let record = units
      .entry(unit.to_string())
      .or_insert_with(|| UnitRecord {
        unit: unit.to_string(),
        invocations: 0,
        status,
        output: None,
        error: None,
      });
    record.invocations += 1;
    record.status = status;
    record.output = output;
    record.error = error;
  }

  fn record_loop(&self, node: &str, iterations: u32, exit: LoopExit) {
    lock(&self.loops).insert(
      node.to_string(),
      LoopRecord {
        node: node.to_string(),
        iterations,
        exit,
      },
    );
  }

  fn composer_event(&self, node: &str, kind: ComposerKind, exited: Option<bool>) {
    let execution_id = self.execution_id.clone();
    let node = node.to_string();
    self.notify(match exited {
      None => ExecutionEvent::ComposerEntered {
        execution_id,
        node,
        kind,
      },
      Some(failed) => ExecutionEvent::ComposerExited {
        execution_id,
        node,
        kind,
        failed,
      },
    });
  }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Whether a completed node asks its nearest loop to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
  Continue,
  Halt,
}

/// Terminal outcome of one node, carrying the bus as that node left it.
enum NodeOutcome {
  Completed { bus: StateBus, flow: Flow },
  Failed {
    bus: StateBus,
    failure: ExecutionFailure,
  },
  Cancelled { bus: StateBus },
}

impl NodeOutcome {
  fn bus_mut(&mut self) -> &mut StateBus {
    match self {
      NodeOutcome::Completed { bus, .. }
      | NodeOutcome::Failed { bus, .. }
      | NodeOutcome::Cancelled { bus } => bus,
    }
  }

  fn is_failed(&self) -> bool {
    matches!(self, NodeOutcome::Failed { .. })
  }
}

fn run_node(
  shared: Arc<Shared>,
  node: Arc<PlanNode>,
  bus: StateBus,
) -> BoxFuture<'static, NodeOutcome> {
  async move {
    match &node.kind {
      PlanKind::Unit(bound) => run_unit(&shared, &node.name, bound, bus).await,
      PlanKind::Sequential(children) => {
        shared.composer_event(&node.name, ComposerKind::Sequential, None);
        let entry = bus.step_scoped_keys();
        let mut outcome = run_sequence(&shared, children, bus).await;
        outcome.bus_mut().end_step(&entry);
        shared.composer_event(
          &node.name,
          ComposerKind::Sequential,
          Some(outcome.is_failed()),
        );
        outcome
      }
      PlanKind::Parallel(children) => {
        shared.composer_event(&node.name, ComposerKind::Parallel, None);
        let entry = bus.step_scoped_keys();
        let mut outcome = run_parallel(&shared, &node.name, children, bus).await;
        outcome.bus_mut().end_step(&entry);
        shared.composer_event(&node.name, ComposerKind::Parallel, Some(outcome.is_failed()));
        outcome
      }
      PlanKind::Loop {
        children,
        max_iterations,
        exit,
      } => {
        shared.composer_event(&node.name, ComposerKind::Loop, None);
        let outcome = run_loop(
          &shared,
          &node.name,
          children,
          *max_iterations,
          exit.as_ref(),
          bus,
        )
        .await;
        shared.composer_event(&node.name, ComposerKind::Loop, Some(outcome.is_failed()));
        outcome
      }
    }
  }
  .boxed()
}

/// Children in order, each seeing the bus left by the previous one. Stops at
/// the first child that fails, is cancelled, or halts.
async fn run_sequence(
  shared: &Arc<Shared>,
  children: &[Arc<PlanNode>],
  mut bus: StateBus,
) -> NodeOutcome {
  for child in children {
    match run_node(shared.clone(), child.clone(), bus).await {
      NodeOutcome::Completed {
        bus: next,
        flow: Flow::Continue,
      } => bus = next,
      other => return other,
    }
  }

  NodeOutcome::Completed {
    bus,
    flow: Flow::Continue,
  }
}

/// Aborts the spawned children if the round is abandoned.
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
  fn drop(&mut self) {
    for handle in &self.0 {
      handle.abort();
    }
  }
}

/// All children on copies of the same snapshot. Writes are merged in declared
/// order once every child has finished; a failing child never stops its
/// siblings.
async fn run_parallel(
  shared: &Arc<Shared>,
  name: &str,
  children: &[Arc<PlanNode>],
  bus: StateBus,
) -> NodeOutcome {
  if shared.cancel.is_cancelled() {
    return NodeOutcome::Cancelled { bus };
  }

  let handles: Vec<_> = children
    .iter()
    .map(|child| tokio::spawn(run_node(shared.clone(), child.clone(), bus.clone())))
    .collect();
  let _guard = AbortOnDrop(handles.iter().map(|h| h.abort_handle()).collect());

  let results = tokio::select! {
    results = join_all(handles) => results,
    _ = shared.cancel.cancelled() => {
      warn!(
        execution_id = %shared.execution_id,
        node = %name,
        "workflow cancelled during parallel round"
      );
      return NodeOutcome::Cancelled { bus };
    }
  };

  let mut writes = Vec::new();
  let mut failed = Vec::new();
  let mut first_failure: Option<ExecutionFailure> = None;
  let mut flow = Flow::Continue;

  for (child, joined) in children.iter().zip(results) {
    match joined {
      Ok(NodeOutcome::Completed {
        bus: child_bus,
        flow: child_flow,
      }) => {
        writes.extend(child_bus.diff(&bus));
        if child_flow == Flow::Halt {
          flow = Flow::Halt;
        }
      }
      Ok(NodeOutcome::Failed { failure, .. }) => {
        failed.push(child.name.clone());
        first_failure.get_or_insert(failure);
      }
      Ok(NodeOutcome::Cancelled { .. }) => return NodeOutcome::Cancelled { bus },
      Err(e) => {
        failed.push(child.name.clone());
        first_failure.get_or_insert(ExecutionFailure {
          node: child.name.clone(),
          failed: vec![child.name.clone()],
          kind: FailureKind::Unit,
          message: format!("task join error: {}", e),
        });
      }
    }
  }

  let mut merged = bus;
  merged.merge(writes);

  match first_failure {
    Some(first) => NodeOutcome::Failed {
      bus: merged,
      failure: ExecutionFailure {
        node: name.to_string(),
        failed,
        kind: first.kind,
        message: first.message,
      },
    },
    None => NodeOutcome::Completed { bus: merged, flow },
  }
}

/// Run the body as a sequence until the exit condition holds, a child halts,
/// or the cap is reached.
async fn run_loop(
  shared: &Arc<Shared>,
  name: &str,
  children: &[Arc<PlanNode>],
  max_iterations: u32,
  exit: Option<&ExitCondition>,
  mut bus: StateBus,
) -> NodeOutcome {
  let mut iteration = 0;

  loop {
    if iteration >= max_iterations {
      warn!(
        execution_id = %shared.execution_id,
        node = %name,
        iterations = iteration,
        "loop reached its iteration cap without approval"
      );
      shared.cap_reached.store(true, Ordering::SeqCst);
      shared.record_loop(name, iteration, LoopExit::CapReached);
      return NodeOutcome::Completed {
        bus,
        flow: Flow::Continue,
      };
    }

    if shared.cancel.is_cancelled() {
      shared.record_loop(name, iteration, LoopExit::Cancelled);
      return NodeOutcome::Cancelled { bus };
    }

    iteration += 1;
    shared.notify(ExecutionEvent::LoopIteration {
      execution_id: shared.execution_id.clone(),
      node: name.to_string(),
      iteration,
    });

    let entry = bus.step_scoped_keys();
    let mut outcome = run_sequence(shared, children, bus).await;
    outcome.bus_mut().end_step(&entry);

    match outcome {
      NodeOutcome::Completed { bus: next, flow } => {
        bus = next;
        let approved =
          flow == Flow::Halt || exit.is_some_and(|exit| exit.is_approved(bus.get(&exit.key)));
        if approved {
          info!(
            execution_id = %shared.execution_id,
            node = %name,
            iterations = iteration,
            "loop approved"
          );
          shared.record_loop(name, iteration, LoopExit::Approved);
          return NodeOutcome::Completed {
            bus,
            flow: Flow::Continue,
          };
        }
      }
      NodeOutcome::Failed { .. } => {
        shared.record_loop(name, iteration, LoopExit::Failed);
        return outcome;
      }
      NodeOutcome::Cancelled { .. } => {
        shared.record_loop(name, iteration, LoopExit::Cancelled);
        return outcome;
      }
    }
  }
}

/// How one unit invocation ended.
enum Invocation {
  Returned(UnitResult),
  Panicked(String),
  TimedOut(Duration),
  Cancelled,
}

async fn run_unit(
  shared: &Arc<Shared>,
  name: &str,
  bound: &BoundUnit,
  bus: StateBus,
) -> NodeOutcome {
  if shared.cancel.is_cancelled() {
    return NodeOutcome::Cancelled { bus };
  }

  shared.notify(ExecutionEvent::UnitStarted {
    execution_id: shared.execution_id.clone(),
    unit: name.to_string(),
  });

  let unit_cancel = shared.cancel.child_token();
  let ctx = UnitContext {
    execution_id: shared.execution_id.clone(),
    unit: name.to_string(),
    inputs: bus.select(&bound.spec.input_keys),
    cancel: unit_cancel.clone(),
    approvals: shared.approvals.clone(),
    notifier: shared.notifier.clone(),
  };
  let timeout = bound
    .spec
    .timeout_ms
    .or(shared.default_timeout_ms)
    .map(Duration::from_millis);

  let invocation = tokio::select! {
    biased;
    _ = shared.cancel.cancelled() => Invocation::Cancelled,
    invocation = invoke_guarded(bound.unit.as_ref(), ctx, timeout) => invocation,
  };
  // Stops anything the unit spawned on its token.
  unit_cancel.cancel();

  let failure = |kind: FailureKind, message: String| ExecutionFailure {
    node: name.to_string(),
    failed: vec![name.to_string()],
    kind,
    message,
  };

  match invocation {
    Invocation::Returned(UnitResult::Continue(value)) => {
      complete_unit(shared, name, bound, bus, value, Flow::Continue)
    }
    Invocation::Returned(UnitResult::HaltLoop(value)) => {
      complete_unit(shared, name, bound, bus, value, Flow::Halt)
    }
    Invocation::Returned(UnitResult::Fail(message)) => {
      fail_unit(shared, name, UnitStatus::Failed, &message);
      NodeOutcome::Failed {
        bus,
        failure: failure(FailureKind::Unit, message),
      }
    }
    Invocation::Panicked(message) => {
      let message = format!("unit panicked: {}", message);
      fail_unit(shared, name, UnitStatus::Failed, &message);
      NodeOutcome::Failed {
        bus,
        failure: failure(FailureKind::Unit, message),
      }
    }
    Invocation::TimedOut(limit) => {
      let message = format!("timed out after {} ms", limit.as_millis());
      fail_unit(shared, name, UnitStatus::TimedOut, &message);
      NodeOutcome::Failed {
        bus,
        failure: failure(FailureKind::Timeout, message),
      }
    }
    Invocation::Cancelled => {
      shared.record_unit(name, UnitStatus::Cancelled, None, None);
      NodeOutcome::Cancelled { bus }
    }
  }
}

async fn invoke_guarded(
  unit: &dyn Unit,
  ctx: UnitContext,
  timeout: Option<Duration>,
) -> Invocation {
  let call = AssertUnwindSafe(unit.invoke(ctx)).catch_unwind();

  let result = match timeout {
    Some(limit) => match tokio::time::timeout(limit, call).await {
      Ok(result) => result,
      Err(_) => return Invocation::TimedOut(limit),
    },
    None => call.await,
  };

  match result {
    Ok(result) => Invocation::Returned(result),
    Err(panic) => Invocation::Panicked(panic_message(panic.as_ref())),
  }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
  if let Some(message) = panic.downcast_ref::<&str>() {
    message.to_string()
  } else if let Some(message) = panic.downcast_ref::<String>() {
    message.clone()
  } else {
    "unknown panic".to_string()
  }
}

fn complete_unit(
  shared: &Shared,
  name: &str,
  bound: &BoundUnit,
  mut bus: StateBus,
  value: Value,
  flow: Flow,
) -> NodeOutcome {
  shared.record_unit(name, UnitStatus::Succeeded, Some(value.clone()), None);
  shared.notify(ExecutionEvent::UnitCompleted {
    execution_id: shared.execution_id.clone(),
    unit: name.to_string(),
    output: value.clone(),
  });
  bus.insert(bound.spec.output_key.clone(), value);
  NodeOutcome::Completed { bus, flow }
}

fn fail_unit(shared: &Shared, name: &str, status: UnitStatus, message: &str) {
  shared.record_unit(name, status, None, Some(message.to_string()));
  shared.notify(ExecutionEvent::UnitFailed {
    execution_id: shared.execution_id.clone(),
    unit: name.to_string(),
    error: message.to_string(),
  });
}
