//! Braid Runtime
//!
//! This crate executes validated workflows. It binds every unit of a
//! [`braid_workflow::Workflow`] to an implementation, then runs the
//! composition tree against a per-run [`StateBus`].
//!
//! # Architecture
//!
//! ```text
//! WorkflowRuntime
//! ├── builder(workflow) - binds units (handlers, prompt backend), notifiers, hooks
//! └── execute_workflow(initial_state, cancel) -> WorkflowExecution
//!
//! WorkflowExecution
//! └── wait() - runs the root node, then the post-run hooks
//!     ├── sequential: children in order, stop on first failure
//!     ├── parallel:   spawn all children on a snapshot, join barrier, merge
//!     └── loop:       body as a sequence until exit sentinel or cap
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use braid_runtime::{HandlerRegistry, StateBus, UnitResult, WorkflowRuntime};
//!
//! let mut handlers = HandlerRegistry::new();
//! handlers.register_fn("outline", |ctx| async move {
//!   UnitResult::Continue(json!(format!("Outline for {}", ctx.input_str("topic").unwrap_or(""))))
//! });
//!
//! let runtime = WorkflowRuntime::builder(workflow).handlers(handlers).build()?;
//! let result = runtime
//!   .execute_workflow(StateBus::from_json(json!({ "topic": "agents" }))?, cancel)
//!   .wait()
//!   .await?;
//! ```

mod approval;
mod backend;
mod builtin;
mod error;
mod events;
mod execution;
mod hook;
mod plan;
mod result;
mod runtime;
mod state;
mod template;
mod unit;

pub use approval::{ApprovalError, ApprovalGate, ApprovalRequest, PendingApproval};
pub use backend::{
  BackendError, EchoBackend, HttpBackend, ModelBackend, ModelRequest, RetryingBackend,
};
pub use error::RuntimeError;
pub use events::{
  ChannelNotifier, ComposerKind, CountingNotifier, ExecutionEvent, ExecutionNotifier,
  LoggingNotifier, NoopNotifier,
};
pub use execution::WorkflowExecution;
pub use hook::{HookError, PostRunHook};
pub use result::{
  ExecutionFailure, FailureKind, LoopExit, LoopRecord, RunStatus, UnitRecord, UnitStatus,
  WorkflowResult,
};
pub use runtime::{RuntimeBuilder, RuntimeConfig, WorkflowRuntime};
pub use state::StateBus;
pub use template::render;
pub use unit::{FnUnit, HandlerRegistry, Unit, UnitContext, UnitResult};
