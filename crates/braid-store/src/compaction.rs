//! Session history compaction.

use braid_config::CompactionConfig;
use sqlx::types::Json;

use crate::merge_states;
use crate::types::{RecordStatus, RunRecord};

/// Fold old runs into a single compacted record.
///
/// Compaction triggers once `config.interval` runs have been recorded since
/// the last compacted record (or since the start). Everything except the
/// newest `config.overlap` runs is then merged into one record. Returns `None`
/// when the history should be left as is.
pub fn compact(runs: &[RunRecord], config: CompactionConfig) -> Option<Vec<RunRecord>> {
  if config.interval == 0 {
    return None;
  }

  let since_last = runs
    .iter()
    .rev()
    .take_while(|run| run.status != RecordStatus::Compacted)
    .count();
  if since_last < config.interval {
    return None;
  }

  let keep = config.overlap.min(runs.len());
  let (folded, kept) = runs.split_at(runs.len() - keep);

  // A lone compacted record has nothing left to fold into.
  match folded {
    [] => return None,
    [only] if only.status == RecordStatus::Compacted => return None,
    _ => {}
  }

  let last = folded.last()?;
  let compacted = RunRecord {
    session_id: last.session_id.clone(),
    execution_id: format!("compacted:{}", last.execution_id),
    status: RecordStatus::Compacted,
    state: Json(serde_json::Value::Object(merge_states(folded))),
    completed_at: last.completed_at,
  };

  let mut history = Vec::with_capacity(kept.len() + 1);
  history.push(compacted);
  history.extend_from_slice(kept);
  Some(history)
}
