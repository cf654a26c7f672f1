//! Braid Workflow
//!
//! This crate provides the resolved workflow representation for braid.
//! A resolved workflow is a validated composition tree that is ready for
//! execution.
//!
//! Key differences from `braid-config`:
//! - Child references are replaced by an owned tree (no cycles, no sharing)
//! - Composition invariants are checked (non-empty composers, disjoint
//!   parallel output keys, non-zero loop caps, unique names)
//! - Unit input wiring is checked against the keys produced upstream
//!
//! Every check runs before any unit is invoked; a [`Workflow`] value is proof
//! that the composition is well formed.

mod error;
mod node;
mod resolve;
mod validate;
mod workflow;

pub use error::WorkflowError;
pub use node::{
  ExitCondition, LoopSpec, Node, NodeKind, STEP_SCOPE_PREFIX, USER_SCOPE_PREFIX, UnitKind,
  UnitSpec,
};
pub use resolve::resolve;
pub use workflow::Workflow;
