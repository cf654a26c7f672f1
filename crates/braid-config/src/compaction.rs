use serde::{Deserialize, Serialize};

/// Session history compaction settings.
///
/// Every `interval` recorded runs, all runs except the newest `overlap` are
/// folded into a single compacted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionConfig {
  pub interval: usize,
  #[serde(default)]
  pub overlap: usize,
}
