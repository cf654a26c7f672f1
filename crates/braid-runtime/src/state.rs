//! The per-run state bus.

use std::collections::{BTreeMap, BTreeSet};

use braid_workflow::STEP_SCOPE_PREFIX;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RuntimeError;

/// Keyed state shared by all units of one workflow run.
///
/// The bus is owned by whichever composer is currently running. Parallel
/// children each receive their own copy of the pre-round snapshot; only the
/// parallel composer writes their results back, after the join barrier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateBus {
  values: BTreeMap<String, Value>,
}

impl StateBus {
  pub fn new() -> Self {
    Self::default()
  }

  /// Build a bus from a JSON object. `null` yields an empty bus.
  pub fn from_json(value: Value) -> Result<Self, RuntimeError> {
    match value {
      Value::Object(map) => Ok(map.into_iter().collect()),
      Value::Null => Ok(Self::new()),
      other => Err(RuntimeError::InvalidInitialState {
        found: json_type_name(&other).to_string(),
      }),
    }
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    self.values.get(key)
  }

  pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
    self.values.insert(key.into(), value)
  }

  pub fn contains_key(&self, key: &str) -> bool {
    self.values.contains_key(key)
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
    self.values.iter()
  }

  /// Copy out the given keys; missing keys are skipped.
  pub fn select(&self, keys: &[String]) -> BTreeMap<String, Value> {
    keys
      .iter()
      .filter_map(|k| self.values.get(k).map(|v| (k.clone(), v.clone())))
      .collect()
  }

  /// Entries that are new or changed relative to `base`.
  pub fn diff(&self, base: &StateBus) -> Vec<(String, Value)> {
    self
      .values
      .iter()
      .filter(|(k, v)| base.values.get(*k) != Some(*v))
      .map(|(k, v)| (k.clone(), v.clone()))
      .collect()
  }

  /// Apply writes in order.
  pub fn merge(&mut self, writes: impl IntoIterator<Item = (String, Value)>) {
    self.values.extend(writes);
  }

  /// Step-scoped keys currently present.
  pub(crate) fn step_scoped_keys(&self) -> BTreeSet<String> {
    self
      .values
      .keys()
      .filter(|k| k.starts_with(STEP_SCOPE_PREFIX))
      .cloned()
      .collect()
  }

  /// Drop step-scoped keys that were not present when the step began.
  pub(crate) fn end_step(&mut self, entry: &BTreeSet<String>) {
    self
      .values
      .retain(|k, _| !k.starts_with(STEP_SCOPE_PREFIX) || entry.contains(k));
  }

  pub fn into_json(self) -> Value {
    Value::Object(self.values.into_iter().collect())
  }
}

impl FromIterator<(String, Value)> for StateBus {
  fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
    Self {
      values: iter.into_iter().collect(),
    }
  }
}

fn json_type_name(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "boolean",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_from_json_object() {
    let bus = StateBus::from_json(json!({ "topic": "agents", "count": 3 })).unwrap();
    assert_eq!(bus.get("topic"), Some(&json!("agents")));
    assert_eq!(bus.get("count"), Some(&json!(3)));
    assert_eq!(bus.len(), 2);
  }

  #[test]
  fn test_from_json_null_is_empty() {
    assert!(StateBus::from_json(Value::Null).unwrap().is_empty());
  }

  #[test]
  fn test_from_json_rejects_non_objects() {
    let err = StateBus::from_json(json!([1, 2])).unwrap_err();
    assert!(matches!(
      err,
      RuntimeError::InvalidInitialState { ref found } if found == "array"
    ));
  }

  #[test]
  fn test_select_skips_missing() {
    let bus = StateBus::from_json(json!({ "a": 1, "b": 2 })).unwrap();
    let selected = bus.select(&["a".to_string(), "z".to_string()]);
    assert_eq!(selected.len(), 1);
    assert_eq!(selected["a"], json!(1));
  }

  #[test]
  fn test_diff_reports_new_and_changed() {
    let base = StateBus::from_json(json!({ "a": 1, "b": 2 })).unwrap();
    let mut next = base.clone();
    next.insert("b", json!(20));
    next.insert("c", json!(3));

    let diff = next.diff(&base);
    assert_eq!(
      diff,
      vec![("b".to_string(), json!(20)), ("c".to_string(), json!(3))]
    );
  }

  #[test]
  fn test_end_step_drops_new_scoped_keys() {
    let mut bus = StateBus::from_json(json!({ "temp:outer": 1, "kept": 2 })).unwrap();
    let entry = bus.step_scoped_keys();

    bus.insert("temp:inner", json!(3));
    bus.insert("result", json!(4));
    bus.end_step(&entry);

    assert!(bus.contains_key("temp:outer"));
    assert!(!bus.contains_key("temp:inner"));
    assert!(bus.contains_key("kept"));
    assert!(bus.contains_key("result"));
  }

  #[test]
  fn test_into_json_round_trip() {
    let value = json!({ "a": { "nested": true } });
    let bus = StateBus::from_json(value.clone()).unwrap();
    assert_eq!(bus.into_json(), value);
  }
}
