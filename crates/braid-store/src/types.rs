use braid_runtime::RunStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;

/// Status of a recorded run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum RecordStatus {
  Succeeded,
  Failed,
  CapReached,
  /// Several older runs folded into one record.
  Compacted,
}

impl RecordStatus {
  /// Cancelled runs are never recorded.
  pub fn from_run(status: RunStatus) -> Option<Self> {
    match status {
      RunStatus::Succeeded => Some(RecordStatus::Succeeded),
      RunStatus::Failed => Some(RecordStatus::Failed),
      RunStatus::CapReached => Some(RecordStatus::CapReached),
      RunStatus::Cancelled => None,
    }
  }
}

/// Owner of sessions created without an explicit user.
pub const DEFAULT_USER: &str = "default";

/// A session as stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Session {
  pub session_id: String,
  pub workflow_id: String,
  /// Owner of the session. `user:` keys are shared between sessions of the
  /// same user.
  pub user_id: String,
  pub created_at: DateTime<Utc>,
}

impl Session {
  pub fn new(session_id: impl Into<String>, workflow_id: impl Into<String>) -> Self {
    Self {
      session_id: session_id.into(),
      workflow_id: workflow_id.into(),
      user_id: DEFAULT_USER.to_string(),
      created_at: Utc::now(),
    }
  }

  pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
    self.user_id = user_id.into();
    self
  }
}

/// One run of a session as stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct RunRecord {
  pub session_id: String,
  pub execution_id: String,
  pub status: RecordStatus,
  /// Terminal state of the run, a JSON object.
  pub state: Json<serde_json::Value>,
  pub completed_at: DateTime<Utc>,
}
