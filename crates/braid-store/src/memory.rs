use std::collections::HashMap;

use async_trait::async_trait;
use braid_config::CompactionConfig;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::search::{keywords, search_state};
use crate::{Error, MemoryMatch, RunRecord, Session, SessionStore, compact, merge_states};

#[derive(Default)]
struct Inner {
  sessions: HashMap<String, Session>,
  runs: HashMap<String, Vec<RunRecord>>,
  users: HashMap<String, Map<String, Value>>,
}

/// Process-local store. History is lost when the process exits.
#[derive(Default)]
pub struct InMemoryStore {
  inner: RwLock<Inner>,
}

impl InMemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl SessionStore for InMemoryStore {
  async fn create_session(&self, session: &Session) -> Result<(), Error> {
    let mut inner = self.inner.write().await;
    if inner.sessions.contains_key(&session.session_id) {
      return Err(Error::AlreadyExists(session.session_id.clone()));
    }
    inner
      .sessions
      .insert(session.session_id.clone(), session.clone());
    inner.runs.insert(session.session_id.clone(), Vec::new());
    Ok(())
  }

  async fn get_session(&self, session_id: &str) -> Result<Session, Error> {
    self
      .inner
      .read()
      .await
      .sessions
      .get(session_id)
      .cloned()
      .ok_or_else(|| Error::NotFound(session_id.to_string()))
  }

  async fn append_run(&self, run: &RunRecord) -> Result<(), Error> {
    self
      .inner
      .write()
      .await
      .runs
      .get_mut(&run.session_id)
      .ok_or_else(|| Error::NotFound(run.session_id.clone()))?
      .push(run.clone());
    Ok(())
  }

  async fn list_runs(&self, session_id: &str) -> Result<Vec<RunRecord>, Error> {
    self
      .inner
      .read()
      .await
      .runs
      .get(session_id)
      .cloned()
      .ok_or_else(|| Error::NotFound(session_id.to_string()))
  }

  async fn replace_runs(&self, session_id: &str, runs: &[RunRecord]) -> Result<(), Error> {
    let mut inner = self.inner.write().await;
    let history = inner
      .runs
      .get_mut(session_id)
      .ok_or_else(|| Error::NotFound(session_id.to_string()))?;
    *history = runs.to_vec();
    Ok(())
  }

  async fn compact_runs(
    &self,
    session_id: &str,
    config: CompactionConfig,
  ) -> Result<Option<Vec<RunRecord>>, Error> {
    let mut inner = self.inner.write().await;
    let history = inner
      .runs
      .get_mut(session_id)
      .ok_or_else(|| Error::NotFound(session_id.to_string()))?;

    let compacted = compact(history, config);
    if let Some(runs) = &compacted {
      *history = runs.clone();
    }
    Ok(compacted)
  }

  async fn user_state(&self, user_id: &str) -> Result<Map<String, Value>, Error> {
    Ok(
      self
        .inner
        .read()
        .await
        .users
        .get(user_id)
        .cloned()
        .unwrap_or_default(),
    )
  }

  async fn update_user_state(
    &self,
    user_id: &str,
    state: &Map<String, Value>,
  ) -> Result<(), Error> {
    self
      .inner
      .write()
      .await
      .users
      .entry(user_id.to_string())
      .or_default()
      .extend(state.iter().map(|(k, v)| (k.clone(), v.clone())));
    Ok(())
  }

  async fn search_memory(&self, user_id: &str, query: &str) -> Result<Vec<MemoryMatch>, Error> {
    let words = keywords(query);
    let inner = self.inner.read().await;

    let mut sessions: Vec<_> = inner
      .sessions
      .values()
      .filter(|session| session.user_id == user_id)
      .map(|session| session.session_id.as_str())
      .collect();
    sessions.sort();

    let mut matches = Vec::new();
    for session_id in sessions {
      let runs = inner.runs.get(session_id).map(Vec::as_slice).unwrap_or_default();
      matches.extend(search_state(session_id, &merge_states(runs), &words));
    }
    Ok(matches)
  }
}
