//! Workflow runtime.

use std::sync::Arc;

use braid_workflow::Workflow;
use tokio_util::sync::CancellationToken;

use crate::approval::ApprovalGate;
use crate::backend::ModelBackend;
use crate::error::RuntimeError;
use crate::events::{ExecutionNotifier, Notifiers};
use crate::execution::WorkflowExecution;
use crate::hook::PostRunHook;
use crate::plan::{Binder, PlanNode};
use crate::state::StateBus;
use crate::unit::HandlerRegistry;

/// Configuration for the workflow runtime.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
  /// Timeout for units that do not set their own. `None` means no limit.
  pub default_unit_timeout_ms: Option<u64>,
}

/// The workflow runtime.
///
/// Owns a validated workflow with every unit bound to an implementation. One
/// runtime can execute the workflow any number of times; runs share nothing
/// but the notifiers, hooks and approval gate.
pub struct WorkflowRuntime {
  pub(crate) workflow: Workflow,
  pub(crate) config: RuntimeConfig,
  pub(crate) plan: Arc<PlanNode>,
  pub(crate) notifiers: Notifiers,
  pub(crate) hooks: Vec<Arc<dyn PostRunHook>>,
  pub(crate) approvals: ApprovalGate,
}

impl WorkflowRuntime {
  pub fn builder(workflow: Workflow) -> RuntimeBuilder {
    RuntimeBuilder {
      workflow,
      config: RuntimeConfig::default(),
      handlers: HandlerRegistry::new(),
      backend: None,
      notifiers: Notifiers::default(),
      hooks: Vec::new(),
      approvals: ApprovalGate::new(),
    }
  }

  /// Execute the workflow against `initial` state.
  ///
  /// Returns a `WorkflowExecution` handle. Call `.wait()` to run the execution
  /// and get the result.
  pub fn execute_workflow(
    &self,
    initial: StateBus,
    cancel: CancellationToken,
  ) -> WorkflowExecution<'_> {
    let execution_id = uuid::Uuid::new_v4().to_string();

    WorkflowExecution::new(self, execution_id, initial, cancel)
  }

  /// Get a reference to the workflow.
  pub fn workflow(&self) -> &Workflow {
    &self.workflow
  }

  /// The gate approval units wait on. Answer requests through it.
  pub fn approvals(&self) -> &ApprovalGate {
    &self.approvals
  }
}

/// Binds a workflow's units and collects observers before the first run.
pub struct RuntimeBuilder {
  workflow: Workflow,
  config: RuntimeConfig,
  handlers: HandlerRegistry,
  backend: Option<Arc<dyn ModelBackend>>,
  notifiers: Notifiers,
  hooks: Vec<Arc<dyn PostRunHook>>,
  approvals: ApprovalGate,
}

impl RuntimeBuilder {
  pub fn config(mut self, config: RuntimeConfig) -> Self {
    self.config = config;
    self
  }

  pub fn handlers(mut self, handlers: HandlerRegistry) -> Self {
    self.handlers = handlers;
    self
  }

  /// Backend for prompt units. Required if the workflow has any.
  pub fn backend(mut self, backend: Arc<dyn ModelBackend>) -> Self {
    self.backend = Some(backend);
    self
  }

  /// Add a notifier. Notifiers receive events in the order they were added.
  pub fn notifier(mut self, notifier: impl ExecutionNotifier + 'static) -> Self {
    self.notifiers.push(Arc::new(notifier));
    self
  }

  /// Add a post-run hook. Hooks run in the order they were added.
  pub fn hook(mut self, hook: impl PostRunHook + 'static) -> Self {
    self.hooks.push(Arc::new(hook));
    self
  }

  /// Share an existing approval gate instead of creating a fresh one.
  pub fn approvals(mut self, approvals: ApprovalGate) -> Self {
    self.approvals = approvals;
    self
  }

  /// Bind every unit. Fails on unregistered handlers, prompt units without a
  /// backend, and templates that do not parse.
  pub fn build(self) -> Result<WorkflowRuntime, RuntimeError> {
    let plan = Binder {
      handlers: &self.handlers,
      backend: self.backend.as_ref(),
    }
    .bind(&self.workflow.root)?;

    Ok(WorkflowRuntime {
      workflow: self.workflow,
      config: self.config,
      plan,
      notifiers: self.notifiers,
      hooks: self.hooks,
      approvals: self.approvals,
    })
  }
}
