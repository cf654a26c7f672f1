//! Executable form of a workflow: the composition tree with every unit bound
//! to its implementation.

use std::sync::Arc;

use braid_workflow::{ExitCondition, Node, NodeKind, UnitKind, UnitSpec};

use crate::backend::ModelBackend;
use crate::builtin::{ApprovalUnit, PromptUnit, TemplateUnit};
use crate::error::RuntimeError;
use crate::template;
use crate::unit::{HandlerRegistry, Unit};

pub(crate) struct PlanNode {
  pub(crate) name: String,
  pub(crate) kind: PlanKind,
}

pub(crate) enum PlanKind {
  Unit(BoundUnit),
  Sequential(Vec<Arc<PlanNode>>),
  Parallel(Vec<Arc<PlanNode>>),
  Loop {
    children: Vec<Arc<PlanNode>>,
    max_iterations: u32,
    exit: Option<ExitCondition>,
  },
}

pub(crate) struct BoundUnit {
  pub(crate) spec: UnitSpec,
  pub(crate) unit: Arc<dyn Unit>,
}

/// What a plan needs to bind units.
pub(crate) struct Binder<'a> {
  pub(crate) handlers: &'a HandlerRegistry,
  pub(crate) backend: Option<&'a Arc<dyn ModelBackend>>,
}

impl Binder<'_> {
  pub(crate) fn bind(&self, node: &Node) -> Result<Arc<PlanNode>, RuntimeError> {
    let kind = match &node.kind {
      NodeKind::Unit(spec) => PlanKind::Unit(BoundUnit {
        spec: spec.clone(),
        unit: self.bind_unit(&node.name, spec)?,
      }),
      NodeKind::Sequential(children) => PlanKind::Sequential(self.bind_all(children)?),
      NodeKind::Parallel(children) => PlanKind::Parallel(self.bind_all(children)?),
      NodeKind::Loop(spec) => PlanKind::Loop {
        children: self.bind_all(&spec.children)?,
        max_iterations: spec.max_iterations,
        exit: spec.exit.clone(),
      },
    };

    Ok(Arc::new(PlanNode {
      name: node.name.clone(),
      kind,
    }))
  }

  fn bind_all(&self, children: &[Node]) -> Result<Vec<Arc<PlanNode>>, RuntimeError> {
    children.iter().map(|child| self.bind(child)).collect()
  }

  fn bind_unit(&self, name: &str, spec: &UnitSpec) -> Result<Arc<dyn Unit>, RuntimeError> {
    let unit: Arc<dyn Unit> = match &spec.kind {
      UnitKind::Prompt { instruction } => {
        check_template(name, instruction)?;
        let backend = self
          .backend
          .ok_or_else(|| RuntimeError::MissingBackend {
            unit: name.to_string(),
          })?
          .clone();
        Arc::new(PromptUnit {
          instruction: instruction.clone(),
          backend,
        })
      }
      UnitKind::Template { template } => {
        check_template(name, template)?;
        Arc::new(TemplateUnit {
          template: template.clone(),
        })
      }
      UnitKind::Handler { handler } => {
        self
          .handlers
          .get(handler)
          .ok_or_else(|| RuntimeError::UnknownHandler {
            unit: name.to_string(),
            handler: handler.clone(),
          })?
      }
      UnitKind::Approval { hint } => {
        check_template(name, hint)?;
        Arc::new(ApprovalUnit { hint: hint.clone() })
      }
    };
    Ok(unit)
  }
}

fn check_template(unit: &str, source: &str) -> Result<(), RuntimeError> {
  template::compile(source).map_err(|message| RuntimeError::InvalidTemplate {
    unit: unit.to_string(),
    message,
  })
}
