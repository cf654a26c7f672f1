//! Braid Store
//!
//! This crate persists workflow state across runs. A session is a named
//! history of runs of one workflow; the merged state of that history is fed
//! back as the initial state of the next run.
//!
//! The [`SessionStore`] trait defines operations for:
//! - Creating and looking up sessions
//! - Appending and listing recorded runs
//! - Compacting the history in place
//! - Keeping `user:` keys shared by all sessions of a user
//! - Searching the recorded state of a user's past sessions
//!
//! [`SessionRecorder`] plugs a store into the runtime as a post-run hook.

mod compaction;
mod memory;
mod recorder;
mod search;
mod sqlite;
mod types;

pub use compaction::compact;
pub use memory::InMemoryStore;
pub use recorder::SessionRecorder;
pub use search::MemoryMatch;
pub use sqlite::SqliteStore;
pub use types::{DEFAULT_USER, RecordStatus, RunRecord, Session};

use async_trait::async_trait;
use braid_config::CompactionConfig;
use serde_json::{Map, Value};

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The requested record was not found.
  #[error("not found: {0}")]
  NotFound(String),

  /// A session with this ID already exists.
  #[error("already exists: {0}")]
  AlreadyExists(String),

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  #[error("migration error: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Storage for sessions and their run history.
#[async_trait]
pub trait SessionStore: Send + Sync {
  /// Create a new session.
  async fn create_session(&self, session: &Session) -> Result<(), Error>;

  /// Get a session by ID.
  async fn get_session(&self, session_id: &str) -> Result<Session, Error>;

  /// Append a run to its session's history.
  async fn append_run(&self, run: &RunRecord) -> Result<(), Error>;

  /// Runs of a session, oldest first.
  async fn list_runs(&self, session_id: &str) -> Result<Vec<RunRecord>, Error>;

  /// Replace a session's whole history.
  async fn replace_runs(&self, session_id: &str, runs: &[RunRecord]) -> Result<(), Error>;

  /// Compact a session's history as one atomic step, so runs appended
  /// concurrently are never lost. Returns the new history when it changed.
  async fn compact_runs(
    &self,
    session_id: &str,
    config: CompactionConfig,
  ) -> Result<Option<Vec<RunRecord>>, Error>;

  /// State shared by every session of a user.
  async fn user_state(&self, user_id: &str) -> Result<Map<String, Value>, Error>;

  /// Insert or overwrite keys of a user's shared state.
  async fn update_user_state(
    &self,
    user_id: &str,
    state: &Map<String, Value>,
  ) -> Result<(), Error>;

  /// Values recorded by the sessions of `user_id` that mention any word of
  /// `query`, ordered by session then key.
  async fn search_memory(&self, user_id: &str, query: &str) -> Result<Vec<MemoryMatch>, Error>;

  /// Get a session, creating it if it does not exist yet.
  async fn open_session(
    &self,
    session_id: &str,
    workflow_id: &str,
    user_id: &str,
  ) -> Result<Session, Error> {
    match self.get_session(session_id).await {
      Err(Error::NotFound(_)) => {
        let session = Session::new(session_id, workflow_id).with_user(user_id);
        match self.create_session(&session).await {
          Ok(()) => Ok(session),
          // Another run created it first.
          Err(Error::AlreadyExists(_)) => self.get_session(session_id).await,
          Err(e) => Err(e),
        }
      }
      other => other,
    }
  }

  /// The owner's `user:` state overlaid with the merged state of every
  /// recorded run, later runs winning.
  async fn session_state(&self, session_id: &str) -> Result<Map<String, Value>, Error> {
    let session = self.get_session(session_id).await?;
    let mut state = self.user_state(&session.user_id).await?;
    let runs = self.list_runs(session_id).await?;
    state.extend(merge_states(&runs));
    Ok(state)
  }
}

/// Fold run states in order; later keys overwrite earlier ones.
pub(crate) fn merge_states(runs: &[RunRecord]) -> Map<String, Value> {
  let mut merged = Map::new();
  for run in runs {
    if let Value::Object(state) = &run.state.0 {
      merged.extend(state.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
  }
  merged
}
