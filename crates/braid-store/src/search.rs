//! Keyword search over recorded session state.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A state value of a past session that matched a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryMatch {
  pub session_id: String,
  pub key: String,
  pub value: Value,
}

/// Lowercased, deduplicated words of a query.
pub(crate) fn keywords(query: &str) -> Vec<String> {
  let mut words: Vec<String> = query
    .split_whitespace()
    .map(|word| word.to_lowercase())
    .collect();
  words.sort();
  words.dedup();
  words
}

/// Entries of one session's state whose value mentions any keyword,
/// ignoring case. Non-string values are matched on their JSON text.
pub(crate) fn search_state(
  session_id: &str,
  state: &Map<String, Value>,
  keywords: &[String],
) -> Vec<MemoryMatch> {
  if keywords.is_empty() {
    return Vec::new();
  }

  let mut matches: Vec<MemoryMatch> = state
    .iter()
    .filter(|(_, value)| {
      let text = match value {
        Value::String(s) => s.to_lowercase(),
        other => other.to_string().to_lowercase(),
      };
      keywords.iter().any(|word| text.contains(word.as_str()))
    })
    .map(|(key, value)| MemoryMatch {
      session_id: session_id.to_string(),
      key: key.clone(),
      value: value.clone(),
    })
    .collect();
  matches.sort_by(|a, b| a.key.cmp(&b.key));
  matches
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn state(value: Value) -> Map<String, Value> {
    match value {
      Value::Object(map) => map,
      _ => unreachable!(),
    }
  }

  #[test]
  fn test_keywords_are_lowercased_and_deduplicated() {
    assert_eq!(keywords("Blue  blue Color"), vec!["blue", "color"]);
    assert!(keywords("   ").is_empty());
  }

  #[test]
  fn test_matches_any_keyword_ignoring_case() {
    let state = state(json!({
      "favorite": "My favourite colour is BLUE",
      "birthday": "March 14",
      "count": 42,
    }));

    let matches = search_state("s1", &state, &keywords("blue march"));
    let keys: Vec<_> = matches.iter().map(|m| m.key.as_str()).collect();
    assert_eq!(keys, vec!["birthday", "favorite"]);
    assert_eq!(matches[0].session_id, "s1");
  }

  #[test]
  fn test_non_string_values_match_on_json_text() {
    let state = state(json!({ "count": 42, "tags": ["owls", "night"] }));

    let matches = search_state("s1", &state, &keywords("owls"));
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].value, json!(["owls", "night"]));
  }

  #[test]
  fn test_empty_query_matches_nothing() {
    let state = state(json!({ "a": "anything" }));
    assert!(search_state("s1", &state, &keywords("")).is_empty());
  }
}
