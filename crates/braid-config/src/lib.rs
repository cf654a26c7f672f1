//! Braid Config
//!
//! This crate contains the serializable configuration types for braid.
//! These types represent workflow definitions before they are resolved and
//! validated into a composition tree.
//!
//! A workflow definition is a flat list of nodes. Composer nodes reference
//! their children by `node_id`, so a definition can describe structures that
//! are not trees (cycles, shared children). Catching that is the resolver's job.
//!
//! Configuration can be loaded from JSON files (via `braid run workflow.json`).

mod backend;
mod compaction;
mod node;
mod retry;
mod workflow;

pub use backend::BackendConfig;
pub use compaction::CompactionConfig;
pub use node::{ExitDef, NodeDef, NodeType, UnitDef};
pub use retry::RetryConfig;
pub use workflow::WorkflowDef;
