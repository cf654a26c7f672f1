//! Human approval channel.
//!
//! A unit that needs confirmation opens a request on the gate and suspends on
//! the returned [`PendingApproval`]. Whoever holds the gate (a UI, the CLI, a
//! test) answers with [`ApprovalGate::resolve`] using the request's token.
//! Each token resolves exactly once. Answered tokens are remembered until
//! their execution is released.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApprovalError {
  #[error("unknown approval token: {0}")]
  UnknownToken(String),

  #[error("approval token already resolved: {0}")]
  AlreadyResolved(String),

  /// The waiting unit went away before the answer arrived.
  #[error("approval request abandoned: {0}")]
  Abandoned(String),

  #[error("approval wait cancelled")]
  Cancelled,
}

/// An open approval request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
  pub token: String,
  pub execution_id: String,
  pub unit: String,
  pub hint: String,
  pub payload: serde_json::Value,
}

#[derive(Default)]
struct GateState {
  pending: HashMap<String, (ApprovalRequest, oneshot::Sender<bool>)>,
  /// Answered or withdrawn tokens, mapped to their execution.
  resolved: HashMap<String, String>,
}

impl GateState {
  fn retire(&mut self, request: ApprovalRequest) {
    self.resolved.insert(request.token, request.execution_id);
  }
}

/// Registry of open approval requests, shared between runs of a runtime.
#[derive(Clone, Default)]
pub struct ApprovalGate {
  state: Arc<Mutex<GateState>>,
}

impl ApprovalGate {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, GateState> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Register a request and return the handle to wait on.
  pub fn open(
    &self,
    execution_id: impl Into<String>,
    unit: impl Into<String>,
    hint: impl Into<String>,
    payload: serde_json::Value,
  ) -> (ApprovalRequest, PendingApproval) {
    let token = uuid::Uuid::new_v4().to_string();
    let request = ApprovalRequest {
      token: token.clone(),
      execution_id: execution_id.into(),
      unit: unit.into(),
      hint: hint.into(),
      payload,
    };
    let (sender, receiver) = oneshot::channel();

    self
      .lock()
      .pending
      .insert(token.clone(), (request.clone(), sender));

    let pending = PendingApproval {
      token,
      receiver,
      gate: self.clone(),
    };
    (request, pending)
  }

  /// Answer a request. Fails for unknown tokens and for tokens that were
  /// already answered.
  pub fn resolve(&self, token: &str, approved: bool) -> Result<(), ApprovalError> {
    let sender = {
      let mut state = self.lock();
      match state.pending.remove(token) {
        Some((request, sender)) => {
          state.retire(request);
          sender
        }
        None if state.resolved.contains_key(token) => {
          return Err(ApprovalError::AlreadyResolved(token.to_string()));
        }
        None => return Err(ApprovalError::UnknownToken(token.to_string())),
      }
    };

    sender
      .send(approved)
      .map_err(|_| ApprovalError::Abandoned(token.to_string()))
  }

  /// Requests still waiting for an answer.
  pub fn pending(&self) -> Vec<ApprovalRequest> {
    let mut requests: Vec<_> = self
      .lock()
      .pending
      .values()
      .map(|(request, _)| request.clone())
      .collect();
    requests.sort_by(|a, b| a.token.cmp(&b.token));
    requests
  }

  /// Withdraw a request whose waiter gave up. No-op once answered.
  fn withdraw(&self, token: &str) {
    let mut state = self.lock();
    if let Some((request, _)) = state.pending.remove(token) {
      state.retire(request);
    }
  }

  /// Forget the answered tokens of a finished execution. Resolving one of
  /// them afterwards reports an unknown token.
  pub fn release(&self, execution_id: &str) {
    self
      .lock()
      .resolved
      .retain(|_, owner| owner.as_str() != execution_id);
  }
}

/// Handle a unit waits on until its request is answered.
///
/// Dropping the handle withdraws the request; its token then counts as
/// resolved.
pub struct PendingApproval {
  token: String,
  receiver: oneshot::Receiver<bool>,
  gate: ApprovalGate,
}

impl PendingApproval {
  pub fn token(&self) -> &str {
    &self.token
  }

  /// Wait for the answer, or until `cancel` fires.
  pub async fn wait(mut self, cancel: &CancellationToken) -> Result<bool, ApprovalError> {
    tokio::select! {
      answer = &mut self.receiver => {
        answer.map_err(|_| ApprovalError::Abandoned(self.token.clone()))
      }
      _ = cancel.cancelled() => Err(ApprovalError::Cancelled),
    }
  }
}

impl Drop for PendingApproval {
  fn drop(&mut self) {
    self.gate.withdraw(&self.token);
  }
}
