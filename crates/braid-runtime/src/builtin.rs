//! Built-in unit kinds: prompt, template and approval.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::backend::{ModelBackend, ModelRequest};
use crate::events::ExecutionEvent;
use crate::template::render;
use crate::unit::{Unit, UnitContext, UnitResult};

/// Renders its instruction and sends it to the model backend. The reply is
/// written verbatim as a JSON string.
pub(crate) struct PromptUnit {
  pub(crate) instruction: String,
  pub(crate) backend: Arc<dyn ModelBackend>,
}

#[async_trait]
impl Unit for PromptUnit {
  async fn invoke(&self, ctx: UnitContext) -> UnitResult {
    let prompt = match render(&self.instruction, ctx.inputs()) {
      Ok(prompt) => prompt,
      Err(e) => return UnitResult::Fail(format!("failed to render instruction: {}", e)),
    };

    ctx.notify(ExecutionEvent::ModelRequested {
      execution_id: ctx.execution_id().to_string(),
      unit: ctx.unit().to_string(),
    });

    let request = ModelRequest {
      unit: ctx.unit().to_string(),
      prompt,
    };

    match self.backend.generate(request).await {
      Ok(text) => UnitResult::Continue(Value::String(text)),
      Err(e) => UnitResult::Fail(e.to_string()),
    }
  }
}

/// Renders a template over its inputs without calling a model.
pub(crate) struct TemplateUnit {
  pub(crate) template: String,
}

#[async_trait]
impl Unit for TemplateUnit {
  async fn invoke(&self, ctx: UnitContext) -> UnitResult {
    match render(&self.template, ctx.inputs()) {
      Ok(text) => UnitResult::Continue(Value::String(text)),
      Err(e) => UnitResult::Fail(format!("failed to render template: {}", e)),
    }
  }
}

/// Asks a human to confirm. Writes `true` or `false`; a rejection is not a
/// failure.
pub(crate) struct ApprovalUnit {
  pub(crate) hint: String,
}

#[async_trait]
impl Unit for ApprovalUnit {
  async fn invoke(&self, ctx: UnitContext) -> UnitResult {
    let hint = match render(&self.hint, ctx.inputs()) {
      Ok(hint) => hint,
      Err(e) => return UnitResult::Fail(format!("failed to render hint: {}", e)),
    };
    let payload = Value::Object(ctx.inputs().clone().into_iter().collect());

    match ctx.request_approval(hint, payload).await {
      Ok(approved) => UnitResult::Continue(Value::Bool(approved)),
      Err(e) => UnitResult::Fail(e.to_string()),
    }
  }
}
