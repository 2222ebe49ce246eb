//! Engine wiring: cache, coordinators, and collaborators in one handle.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::cache::{CacheEntry, CacheKey, EntityCache, SlotStatus};
use crate::mutation::MutationCoordinator;
use crate::notify::Notifier;
use crate::query::{QueryCoordinator, QueryOptions, QueryResult};
use crate::remote::{AuthContext, RemoteStore};

/// The sync engine: a process-wide entity cache with query and mutation
/// coordination over an abstract remote store.
///
/// This wraps the underlying pieces the way a client wraps transport plus
/// cache, so callers hold one handle.
#[derive(Clone)]
pub struct SyncEngine {
  cache: Arc<EntityCache>,
  queries: Arc<QueryCoordinator>,
  mutations: Arc<MutationCoordinator>,
  remote: Arc<dyn RemoteStore>,
}

impl SyncEngine {
  pub fn new(remote: Arc<dyn RemoteStore>, notifier: Arc<dyn Notifier>) -> Self {
    let cache = Arc::new(EntityCache::new());
    let queries = Arc::new(QueryCoordinator::new(Arc::clone(&cache)));
    let mutations = Arc::new(MutationCoordinator::new(
      Arc::clone(&cache),
      Arc::clone(&queries),
      notifier,
    ));
    Self {
      cache,
      queries,
      mutations,
      remote,
    }
  }

  pub fn cache(&self) -> &Arc<EntityCache> {
    &self.cache
  }

  pub fn queries(&self) -> &Arc<QueryCoordinator> {
    &self.queries
  }

  pub fn mutations(&self) -> &Arc<MutationCoordinator> {
    &self.mutations
  }

  pub fn remote(&self) -> &Arc<dyn RemoteStore> {
    &self.remote
  }

  /// Observe `key`, fetching it from the remote store when absent or stale.
  pub fn observe_remote<T: DeserializeOwned>(
    &self,
    key: &CacheKey,
    auth: Option<AuthContext>,
    options: &QueryOptions,
  ) -> QueryResult<T> {
    let remote = Arc::clone(&self.remote);
    let fetch_key = key.clone();
    self.queries.observe(
      key,
      move || {
        let remote = Arc::clone(&remote);
        let key = fetch_key.clone();
        let auth = auth.clone();
        async move { remote.fetch_entity(&key, auth.as_ref()).await }
      },
      options,
    )
  }

  /// Wait until the entry for `key` settles (Success or Error, not stale),
  /// or the timeout elapses. Returns the entry as of settling.
  pub async fn await_settled(&self, key: &CacheKey, timeout: Duration) -> Option<CacheEntry> {
    let mut events = self.cache.subscribe();
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
      if let Some(entry) = self.cache.get(key) {
        if matches!(entry.status, SlotStatus::Success | SlotStatus::Error) && !entry.stale {
          return Some(entry);
        }
      }
      match tokio::time::timeout_at(deadline, events.recv()).await {
        Ok(Ok(_)) => continue,
        // Lagged or closed channel, or deadline: settle for the current state
        Ok(Err(_)) | Err(_) => return self.cache.get(key),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::notify::RecordingNotifier;
  use crate::remote::{EntityRef, RemoteError};
  use async_trait::async_trait;
  use serde_json::{json, Value};

  /// Scripted remote store: routes a couple of fixed keys.
  struct ScriptedRemote;

  #[async_trait]
  impl RemoteStore for ScriptedRemote {
    async fn fetch_entity(
      &self,
      key: &CacheKey,
      auth: Option<&AuthContext>,
    ) -> Result<Value, RemoteError> {
      match key.to_string().as_str() {
        "staff" => Ok(json!([{"id": 1, "name": "Sandra"}])),
        "user" => match auth {
          Some(auth) => Ok(json!({"id": auth.user_id, "name": "Mary"})),
          None => Err(RemoteError::Auth("not signed in".into())),
        },
        other => Err(RemoteError::NotFound(other.to_string())),
      }
    }

    async fn write_entity(
      &self,
      entity: &EntityRef,
      _patch: Value,
      _auth: Option<&AuthContext>,
    ) -> Result<Value, RemoteError> {
      Err(RemoteError::NotFound(entity.to_string()))
    }
  }

  fn engine() -> SyncEngine {
    SyncEngine::new(Arc::new(ScriptedRemote), Arc::new(RecordingNotifier::new()))
  }

  #[tokio::test]
  async fn test_observe_remote_populates_and_settles() {
    let engine = engine();
    let key = CacheKey::new("staff");

    let first: QueryResult<Value> =
      engine.observe_remote(&key, None, &QueryOptions::default());
    assert!(first.data.is_none());

    let entry = engine
      .await_settled(&key, Duration::from_secs(1))
      .await
      .unwrap();
    assert_eq!(entry.status, SlotStatus::Success);
    assert_eq!(entry.value, Some(json!([{"id": 1, "name": "Sandra"}])));
  }

  #[tokio::test]
  async fn test_observe_remote_threads_auth_context() {
    let engine = engine();
    let key = CacheKey::new("user");
    let auth = AuthContext {
      user_id: 9,
      token: "jwt".into(),
    };

    let _: QueryResult<Value> =
      engine.observe_remote(&key, Some(auth), &QueryOptions::default());
    let entry = engine
      .await_settled(&key, Duration::from_secs(1))
      .await
      .unwrap();
    assert_eq!(entry.value, Some(json!({"id": 9, "name": "Mary"})));
  }

  #[tokio::test]
  async fn test_await_settled_times_out_to_current_state() {
    let engine = engine();
    let key = CacheKey::new("never-fetched");
    let entry = engine.await_settled(&key, Duration::from_millis(50)).await;
    assert!(entry.is_none());
  }
}
