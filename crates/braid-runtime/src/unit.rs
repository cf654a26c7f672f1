//! Units: the leaves of a workflow.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::approval::{ApprovalError, ApprovalGate};
use crate::events::{ExecutionEvent, ExecutionNotifier, NoopNotifier};

/// What a unit hands back to its composer.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitResult {
  /// Write the value under the unit's output key and carry on.
  Continue(Value),
  /// Write the value, then stop the nearest enclosing loop as approved.
  HaltLoop(Value),
  /// Fail the unit. Nothing is written.
  Fail(String),
}

/// Everything a unit can see while it runs.
///
/// `inputs` holds only the keys the unit declared that are present on the bus;
/// units never see the rest of the state.
#[derive(Clone)]
pub struct UnitContext {
  pub(crate) execution_id: String,
  pub(crate) unit: String,
  pub(crate) inputs: BTreeMap<String, Value>,
  pub(crate) cancel: CancellationToken,
  pub(crate) approvals: ApprovalGate,
  pub(crate) notifier: Arc<dyn ExecutionNotifier>,
}

impl UnitContext {
  /// A context detached from any run. Useful for exercising a unit directly.
  pub fn standalone(unit: impl Into<String>, inputs: BTreeMap<String, Value>) -> Self {
    Self {
      execution_id: uuid::Uuid::new_v4().to_string(),
      unit: unit.into(),
      inputs,
      cancel: CancellationToken::new(),
      approvals: ApprovalGate::new(),
      notifier: Arc::new(NoopNotifier),
    }
  }

  pub fn execution_id(&self) -> &str {
    &self.execution_id
  }

  pub fn unit(&self) -> &str {
    &self.unit
  }

  pub fn input(&self, key: &str) -> Option<&Value> {
    self.inputs.get(key)
  }

  /// The input as a string slice, if it is a JSON string.
  pub fn input_str(&self, key: &str) -> Option<&str> {
    self.inputs.get(key).and_then(Value::as_str)
  }

  pub fn inputs(&self) -> &BTreeMap<String, Value> {
    &self.inputs
  }

  /// Fires when the run is cancelled or the unit times out.
  pub fn cancel_token(&self) -> &CancellationToken {
    &self.cancel
  }

  pub fn approvals(&self) -> &ApprovalGate {
    &self.approvals
  }

  pub fn notify(&self, event: ExecutionEvent) {
    self.notifier.notify(event);
  }

  /// Suspend until a human answers. Emits `ApprovalRequested` with the token
  /// the answer must carry.
  pub async fn request_approval(
    &self,
    hint: impl Into<String>,
    payload: Value,
  ) -> Result<bool, ApprovalError> {
    let (request, pending) = self
      .approvals
      .open(self.execution_id.clone(), self.unit.clone(), hint, payload);

    self.notify(ExecutionEvent::ApprovalRequested {
      execution_id: self.execution_id.clone(),
      unit: request.unit,
      token: request.token,
      hint: request.hint,
      payload: request.payload,
    });

    pending.wait(&self.cancel).await
  }
}

/// A unit implementation.
///
/// Implementations must be safe to invoke more than once per run: loops call
/// their body units once per iteration.
#[async_trait]
pub trait Unit: Send + Sync {
  async fn invoke(&self, ctx: UnitContext) -> UnitResult;
}

/// Adapts an async closure into a [`Unit`].
pub struct FnUnit<F> {
  f: F,
}

impl<F> FnUnit<F> {
  pub fn new(f: F) -> Self {
    Self { f }
  }
}

#[async_trait]
impl<F, Fut> Unit for FnUnit<F>
where
  F: Fn(UnitContext) -> Fut + Send + Sync,
  Fut: Future<Output = UnitResult> + Send,
{
  async fn invoke(&self, ctx: UnitContext) -> UnitResult {
    (self.f)(ctx).await
  }
}

/// Named unit implementations that handler units bind to.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
  handlers: HashMap<String, Arc<dyn Unit>>,
}

impl HandlerRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&mut self, name: impl Into<String>, unit: impl Unit + 'static) -> &mut Self {
    self.handlers.insert(name.into(), Arc::new(unit));
    self
  }

  pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, f: F) -> &mut Self
  where
    F: Fn(UnitContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = UnitResult> + Send + 'static,
  {
    self.register(name, FnUnit::new(f))
  }

  pub fn get(&self, name: &str) -> Option<Arc<dyn Unit>> {
    self.handlers.get(name).cloned()
  }

  pub fn contains(&self, name: &str) -> bool {
    self.handlers.contains_key(name)
  }
}
