use std::sync::Arc;

use async_trait::async_trait;
use braid_config::CompactionConfig;
use braid_runtime::{HookError, PostRunHook, WorkflowResult};
use braid_workflow::{STEP_SCOPE_PREFIX, USER_SCOPE_PREFIX};
use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::types::Json;
use tracing::{debug, info};

use crate::types::{RecordStatus, RunRecord};
use crate::SessionStore;

/// Records every finished run into a session.
///
/// Cancelled runs are skipped. Step-scoped keys are not persisted, and
/// `user:` keys go to the session owner's shared state instead of the run.
/// When compaction is configured the history is compacted after each append.
pub struct SessionRecorder {
  store: Arc<dyn SessionStore>,
  session_id: String,
  compaction: Option<CompactionConfig>,
}

impl SessionRecorder {
  pub fn new(store: Arc<dyn SessionStore>, session_id: impl Into<String>) -> Self {
    Self {
      store,
      session_id: session_id.into(),
      compaction: None,
    }
  }

  pub fn with_compaction(mut self, compaction: CompactionConfig) -> Self {
    self.compaction = Some(compaction);
    self
  }
}

#[async_trait]
impl PostRunHook for SessionRecorder {
  fn name(&self) -> &str {
    "session_recorder"
  }

  async fn after_run(&self, result: &WorkflowResult) -> Result<(), HookError> {
    let Some(status) = RecordStatus::from_run(result.status) else {
      debug!(
        session_id = %self.session_id,
        execution_id = %result.execution_id,
        "skipping cancelled run"
      );
      return Ok(());
    };

    let session = self.store.get_session(&self.session_id).await?;

    let mut state = Map::new();
    let mut user_state = Map::new();
    for (key, value) in result.state.iter() {
      if key.starts_with(STEP_SCOPE_PREFIX) {
        continue;
      }
      let scope = if key.starts_with(USER_SCOPE_PREFIX) {
        &mut user_state
      } else {
        &mut state
      };
      scope.insert(key.clone(), value.clone());
    }

    let run = RunRecord {
      session_id: self.session_id.clone(),
      execution_id: result.execution_id.clone(),
      status,
      state: Json(Value::Object(state)),
      completed_at: Utc::now(),
    };
    self.store.append_run(&run).await?;

    if !user_state.is_empty() {
      self
        .store
        .update_user_state(&session.user_id, &user_state)
        .await?;
    }

    if let Some(config) = self.compaction {
      if let Some(history) = self.store.compact_runs(&self.session_id, config).await? {
        info!(
          session_id = %self.session_id,
          runs = history.len(),
          "compacted session history"
        );
      }
    }

    Ok(())
  }
}
