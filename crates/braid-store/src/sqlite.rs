use std::path::Path;

use async_trait::async_trait;
use braid_config::CompactionConfig;
use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::types::Json;
use sqlx::{SqliteConnection, SqlitePool};

use crate::search::{keywords, search_state};
use crate::{Error, MemoryMatch, RunRecord, Session, SessionStore, compact, merge_states};

/// SQLite-based store implementation.
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if needed) the database file at `path` and migrate it.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
    let options = SqliteConnectOptions::new()
      .filename(path)
      .create_if_missing(true)
      .foreign_keys(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;

    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), Error> {
    sqlx::migrate!("./migrations").run(&self.pool).await?;
    Ok(())
  }
}

#[async_trait]
impl SessionStore for SqliteStore {
  async fn create_session(&self, session: &Session) -> Result<(), Error> {
    let result = sqlx::query(
      r#"
      INSERT INTO sessions (session_id, workflow_id, user_id, created_at)
      VALUES (?, ?, ?, ?)
      ON CONFLICT (session_id) DO NOTHING
      "#,
    )
    .bind(&session.session_id)
    .bind(&session.workflow_id)
    .bind(&session.user_id)
    .bind(session.created_at)
    .execute(&self.pool)
    .await?;

    if result.rows_affected() == 0 {
      return Err(Error::AlreadyExists(session.session_id.clone()));
    }
    Ok(())
  }

  async fn get_session(&self, session_id: &str) -> Result<Session, Error> {
    sqlx::query_as(
      r#"
      SELECT session_id, workflow_id, user_id, created_at
      FROM sessions
      WHERE session_id = ?
      "#,
    )
    .bind(session_id)
    .fetch_optional(&self.pool)
    .await?
    .ok_or_else(|| Error::NotFound(session_id.to_string()))
  }

  async fn append_run(&self, run: &RunRecord) -> Result<(), Error> {
    self.get_session(&run.session_id).await?;

    sqlx::query(
      r#"
      INSERT INTO session_runs (session_id, execution_id, status, state, completed_at)
      VALUES (?, ?, ?, ?, ?)
      "#,
    )
    .bind(&run.session_id)
    .bind(&run.execution_id)
    .bind(run.status)
    .bind(&run.state)
    .bind(run.completed_at)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn list_runs(&self, session_id: &str) -> Result<Vec<RunRecord>, Error> {
    self.get_session(session_id).await?;

    let runs = sqlx::query_as(
      r#"
      SELECT session_id, execution_id, status, state, completed_at
      FROM session_runs
      WHERE session_id = ?
      ORDER BY id ASC
      "#,
    )
    .bind(session_id)
    .fetch_all(&self.pool)
    .await?;

    Ok(runs)
  }

  async fn replace_runs(&self, session_id: &str, runs: &[RunRecord]) -> Result<(), Error> {
    self.get_session(session_id).await?;

    let mut tx = self.pool.begin().await?;
    rewrite_runs(&mut tx, session_id, runs).await?;
    tx.commit().await?;
    Ok(())
  }

  async fn compact_runs(
    &self,
    session_id: &str,
    config: CompactionConfig,
  ) -> Result<Option<Vec<RunRecord>>, Error> {
    self.get_session(session_id).await?;

    // IMMEDIATE takes the write lock before the read, so no run can be
    // appended between reading the history and rewriting it.
    let mut conn = self.pool.acquire().await?;
    sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

    let result = compact_locked(&mut conn, session_id, config).await;
    let end = if result.is_ok() { "COMMIT" } else { "ROLLBACK" };
    sqlx::query(end).execute(&mut *conn).await?;

    result
  }

  async fn user_state(&self, user_id: &str) -> Result<Map<String, Value>, Error> {
    let rows: Vec<(String, Json<Value>)> = sqlx::query_as(
      r#"
      SELECT state_key, state_value
      FROM user_state
      WHERE user_id = ?
      ORDER BY state_key ASC
      "#,
    )
    .bind(user_id)
    .fetch_all(&self.pool)
    .await?;

    Ok(rows.into_iter().map(|(key, value)| (key, value.0)).collect())
  }

  async fn update_user_state(
    &self,
    user_id: &str,
    state: &Map<String, Value>,
  ) -> Result<(), Error> {
    let updated_at = Utc::now();
    let mut tx = self.pool.begin().await?;

    for (key, value) in state {
      sqlx::query(
        r#"
        INSERT INTO user_state (user_id, state_key, state_value, updated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT (user_id, state_key)
        DO UPDATE SET state_value = excluded.state_value, updated_at = excluded.updated_at
        "#,
      )
      .bind(user_id)
      .bind(key)
      .bind(Json(value.clone()))
      .bind(updated_at)
      .execute(&mut *tx)
      .await?;
    }

    tx.commit().await?;
    Ok(())
  }

  async fn search_memory(&self, user_id: &str, query: &str) -> Result<Vec<MemoryMatch>, Error> {
    let words = keywords(query);
    if words.is_empty() {
      return Ok(Vec::new());
    }

    let runs: Vec<RunRecord> = sqlx::query_as(
      r#"
      SELECT r.session_id, r.execution_id, r.status, r.state, r.completed_at
      FROM session_runs r
      JOIN sessions s ON s.session_id = r.session_id
      WHERE s.user_id = ?
      ORDER BY r.session_id ASC, r.id ASC
      "#,
    )
    .bind(user_id)
    .fetch_all(&self.pool)
    .await?;

    let mut matches = Vec::new();
    for session_runs in runs.chunk_by(|a, b| a.session_id == b.session_id) {
      let session_id = &session_runs[0].session_id;
      matches.extend(search_state(session_id, &merge_states(session_runs), &words));
    }
    Ok(matches)
  }
}

async fn compact_locked(
  conn: &mut SqliteConnection,
  session_id: &str,
  config: CompactionConfig,
) -> Result<Option<Vec<RunRecord>>, Error> {
  let runs: Vec<RunRecord> = sqlx::query_as(
    r#"
    SELECT session_id, execution_id, status, state, completed_at
    FROM session_runs
    WHERE session_id = ?
    ORDER BY id ASC
    "#,
  )
  .bind(session_id)
  .fetch_all(&mut *conn)
  .await?;

  let Some(history) = compact(&runs, config) else {
    return Ok(None);
  };
  rewrite_runs(conn, session_id, &history).await?;
  Ok(Some(history))
}

async fn rewrite_runs(
  conn: &mut SqliteConnection,
  session_id: &str,
  runs: &[RunRecord],
) -> Result<(), Error> {
  sqlx::query("DELETE FROM session_runs WHERE session_id = ?")
    .bind(session_id)
    .execute(&mut *conn)
    .await?;

  for run in runs {
    sqlx::query(
      r#"
      INSERT INTO session_runs (session_id, execution_id, status, state, completed_at)
      VALUES (?, ?, ?, ?, ?)
      "#,
    )
    .bind(session_id)
    .bind(&run.execution_id)
    .bind(run.status)
    .bind(&run.state)
    .bind(run.completed_at)
    .execute(&mut *conn)
    .await?;
  }

  Ok(())
}
