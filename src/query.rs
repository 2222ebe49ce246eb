//! Query coordination: reads that populate the entity cache.
//!
//! Inspired by TanStack Query, the coordinator issues idempotent reads keyed
//! by [`CacheKey`], coalesces concurrent identical reads into one in-flight
//! fetch, and writes successful results into the [`EntityCache`]. Cancellation
//! is driven by per-key generation counters rather than timing: every fetch is
//! tagged with the generation current when it was spawned, and a result whose
//! tag no longer matches is discarded without touching the cache.
//!
//! # Example
//!
//! ```ignore
//! let queries = QueryCoordinator::new(cache.clone());
//! let result: QueryResult<Vec<Staff>> = queries.observe(
//!   &CacheKey::new("staff"),
//!   move || {
//!     let remote = remote.clone();
//!     async move { remote.fetch_entity(&CacheKey::new("staff"), None).await }
//!   },
//!   &QueryOptions::default(),
//! );
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::cache::{CacheKey, EntityCache, SlotStatus};
use crate::remote::RemoteError;

/// A stored fetch closure; produces one attempt at reading a key's value.
pub type Fetcher = Arc<dyn Fn() -> BoxFuture<'static, Result<Value, RemoteError>> + Send + Sync>;

/// Options for [`QueryCoordinator::observe`].
#[derive(Clone, Debug)]
pub struct QueryOptions {
  /// When false, the observe returns the current entry but never fetches.
  /// Used when a query's precondition entity (e.g. the signed-in user) is
  /// absent.
  pub enabled: bool,
}

impl Default for QueryOptions {
  fn default() -> Self {
    Self { enabled: true }
  }
}

/// Typed view of a cache entry handed back to an observer.
#[derive(Clone, Debug)]
pub struct QueryResult<T> {
  pub data: Option<T>,
  pub status: SlotStatus,
  pub stale: bool,
  pub error: Option<String>,
  pub version: u64,
}

impl<T> QueryResult<T> {
  fn empty() -> Self {
    Self {
      data: None,
      status: SlotStatus::Idle,
      stale: false,
      error: None,
      version: 0,
    }
  }
}

/// Per-key coordination state.
#[derive(Default)]
struct KeyState {
  /// Bumped whenever in-flight work for the key is superseded
  generation: u64,
  /// Generation of the outstanding fetch, if one is in flight
  inflight: Option<u64>,
  /// Fetcher registered by the most recent enabled observer, kept so
  /// invalidation can refetch in the background
  fetcher: Option<Fetcher>,
}

/// Issues reads against the remote store and reconciles them into the cache.
pub struct QueryCoordinator {
  cache: Arc<EntityCache>,
  states: Arc<Mutex<HashMap<CacheKey, KeyState>>>,
}

impl QueryCoordinator {
  pub fn new(cache: Arc<EntityCache>) -> Self {
    Self {
      cache,
      states: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  /// Return the current entry for `key` and, when it is absent or stale and
  /// the query is enabled, start exactly one in-flight fetch for it.
  /// Concurrent observes for the same key coalesce onto the outstanding
  /// fetch.
  pub fn observe<T, F, Fut>(&self, key: &CacheKey, fetch: F, options: &QueryOptions) -> QueryResult<T>
  where
    T: DeserializeOwned,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, RemoteError>> + Send + 'static,
  {
    if options.enabled {
      let fetcher: Fetcher = Arc::new(move || {
        let fut: BoxFuture<'static, Result<Value, RemoteError>> = Box::pin(fetch());
        fut
      });
      self.attach(key, fetcher);
    }
    self.current(key)
  }

  /// [`observe`](Self::observe) with a pure transform applied to the cached
  /// value before it is returned. The cache itself is never mutated.
  pub fn observe_select<T, U, F, Fut, S>(
    &self,
    key: &CacheKey,
    fetch: F,
    options: &QueryOptions,
    select: S,
  ) -> QueryResult<U>
  where
    T: DeserializeOwned,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, RemoteError>> + Send + 'static,
    S: Fn(&T) -> U,
  {
    let result: QueryResult<T> = self.observe(key, fetch, options);
    QueryResult {
      data: result.data.as_ref().map(select),
      status: result.status,
      stale: result.stale,
      error: result.error,
      version: result.version,
    }
  }

  /// Read the current entry without registering an observer or fetching.
  pub fn current<T: DeserializeOwned>(&self, key: &CacheKey) -> QueryResult<T> {
    match self.cache.get(key) {
      Some(entry) => QueryResult {
        data: entry.decode(),
        status: entry.status,
        stale: entry.stale,
        error: entry.error,
        version: entry.version,
      },
      None => QueryResult::empty(),
    }
  }

  /// Cancel any outstanding fetch for `key`. The cancelled fetch's eventual
  /// result is discarded; it never mutates the cache or notifies.
  pub fn cancel(&self, key: &CacheKey) {
    let mut states = self.states.lock().expect("query state lock poisoned");
    if let Some(state) = states.get_mut(key) {
      if state.inflight.take().is_some() {
        state.generation += 1;
        debug!(key = %key, "cancelled in-flight query");
      }
    }
  }

  /// Supersede any in-flight fetch for `key` and start a new one with the
  /// registered fetcher. No-op when no observer ever registered one.
  pub fn refetch(&self, key: &CacheKey) {
    let started = {
      let mut states = self.states.lock().expect("query state lock poisoned");
      let state = states.entry(key.clone()).or_default();
      match state.fetcher.clone() {
        Some(fetcher) => {
          state.generation += 1;
          let generation = state.generation;
          state.inflight = Some(generation);
          Some((fetcher, generation))
        }
        None => {
          state.inflight = None;
          None
        }
      }
    };
    if let Some((fetcher, generation)) = started {
      self.cache.set_loading(key);
      self.spawn_fetch(key.clone(), generation, fetcher);
    }
  }

  /// Mark every entry under `prefix` stale and refetch, in the background,
  /// each matching key with a registered observer. Returns immediately.
  pub fn invalidate(&self, prefix: &CacheKey) {
    let marked = self.cache.invalidate_prefix(prefix);
    for key in marked {
      let observed = {
        let states = self.states.lock().expect("query state lock poisoned");
        states.get(&key).map(|s| s.fetcher.is_some()).unwrap_or(false)
      };
      if observed {
        self.refetch(&key);
      }
    }
  }

  /// Unregister the observer for `key` and cancel its in-flight fetch.
  pub fn detach(&self, key: &CacheKey) {
    let mut states = self.states.lock().expect("query state lock poisoned");
    if let Some(state) = states.get_mut(key) {
      state.fetcher = None;
      if state.inflight.take().is_some() {
        state.generation += 1;
      }
    }
  }

  /// Detach every observer under `prefix`, cancel their fetches, and remove
  /// the matching cache entries. Returns the removed keys.
  pub fn evict(&self, prefix: &CacheKey) -> Vec<CacheKey> {
    {
      let mut states = self.states.lock().expect("query state lock poisoned");
      for (key, state) in states.iter_mut() {
        if key.starts_with(prefix) {
          state.fetcher = None;
          if state.inflight.take().is_some() {
            state.generation += 1;
          }
        }
      }
    }
    self.cache.remove(prefix)
  }

  /// Register `fetcher` for `key` and start a fetch if one is due.
  fn attach(&self, key: &CacheKey, fetcher: Fetcher) {
    let started = {
      let mut states = self.states.lock().expect("query state lock poisoned");
      let state = states.entry(key.clone()).or_default();
      state.fetcher = Some(fetcher.clone());

      let fresh = self.cache.get(key).map(|e| e.is_fresh()).unwrap_or(false);
      if fresh || state.inflight.is_some() {
        None
      } else {
        state.generation += 1;
        let generation = state.generation;
        state.inflight = Some(generation);
        Some(generation)
      }
    };
    if let Some(generation) = started {
      self.cache.set_loading(key);
      self.spawn_fetch(key.clone(), generation, fetcher);
    }
  }

  fn spawn_fetch(&self, key: CacheKey, generation: u64, fetcher: Fetcher) {
    let cache = Arc::clone(&self.cache);
    let states = Arc::clone(&self.states);

    tokio::spawn(async move {
      let result = fetcher().await;

      // The result is applied only if this fetch is still the current one
      // for its key; a bumped generation means a newer read or an optimistic
      // write superseded it while it was in flight.
      let accepted = {
        let mut states = states.lock().expect("query state lock poisoned");
        match states.get_mut(&key) {
          Some(state) if state.generation == generation => {
            state.inflight = None;
            true
          }
          Some(state) => {
            if state.inflight == Some(generation) {
              state.inflight = None;
            }
            false
          }
          None => false,
        }
      };

      if !accepted {
        debug!(key = %key, generation, "discarded stale query response");
        return;
      }

      match result {
        Ok(value) => cache.set_value(&key, value),
        Err(e) => cache.set_error(&key, &e.to_string()),
      }
    });
  }
}
