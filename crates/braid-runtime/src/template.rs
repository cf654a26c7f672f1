//! Instruction templates.
//!
//! Prompt instructions, template bodies and approval hints are minijinja
//! templates rendered over the unit's declared inputs. Referencing a key the
//! unit did not declare (or that is absent from the bus) is an error, not an
//! empty string.

use std::collections::BTreeMap;

use minijinja::{Environment, UndefinedBehavior};
use serde_json::Value;

fn environment() -> Environment<'static> {
  let mut env = Environment::new();
  env.set_undefined_behavior(UndefinedBehavior::Strict);
  env
}

/// Check that a template parses.
pub(crate) fn compile(source: &str) -> Result<(), String> {
  environment()
    .template_from_str(source)
    .map(|_| ())
    .map_err(|e| e.to_string())
}

/// Render `source` with `inputs` as the template context.
pub fn render(source: &str, inputs: &BTreeMap<String, Value>) -> Result<String, String> {
  let env = environment();
  let template = env.template_from_str(source).map_err(|e| e.to_string())?;
  template.render(inputs).map_err(|e| e.to_string())
}
