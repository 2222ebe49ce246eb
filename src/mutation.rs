//! Optimistic mutation coordination.
//!
//! Each mutation invocation runs an explicit state machine:
//! `Idle -> Pending -> {Committed, RolledBack}`. Entering `Pending` is fully
//! synchronous: the coordinator snapshots the current cached value, cancels
//! any outstanding read for the key, and applies the optimistic value before
//! the remote write is issued. On success the server's canonical value
//! overwrites the guess; on failure the snapshot is reinstated exactly.
//! Either way, settling invalidates the mutation's declared keys so the next
//! read reconciles with the server.
//!
//! Concurrent mutations targeting the same key are not deduplicated; the
//! last one to settle wins.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{CacheKey, EntityCache};
use crate::notify::{Notifier, Severity};
use crate::query::QueryCoordinator;
use crate::remote::RemoteError;

/// States of one mutation invocation. `Committed` and `RolledBack` are
/// terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutationState {
  Idle,
  Pending,
  Committed,
  RolledBack,
}

type OptimisticFn = Box<dyn FnOnce(Option<Value>) -> Option<Value> + Send>;

/// One optimistic write against a single cache key.
///
/// # Example
///
/// ```ignore
/// let mutation = Mutation::new(
///   CacheKey::new("user"),
///   move |current| current.map(|user| merge(user, patch)),
///   async move { remote.write_entity(&target, body, Some(&auth)).await },
/// )
/// .invalidates(CacheKey::new("user"))
/// .on_commit(Severity::Success, "User updated")
/// .on_rollback(Severity::Warning, "Update failed; restoring previous values");
/// ```
pub struct Mutation {
  key: CacheKey,
  /// Pure function of the current cached value producing the optimistic one
  optimistic: OptimisticFn,
  /// The remote write; resolves to the server's canonical value
  write: BoxFuture<'static, Result<Value, RemoteError>>,
  /// Keys invalidated when the mutation settles
  invalidates: Vec<CacheKey>,
  on_commit: Option<(Severity, String)>,
  on_rollback: Option<(Severity, String)>,
}

impl Mutation {
  pub fn new<O, W>(key: CacheKey, optimistic: O, write: W) -> Self
  where
    O: FnOnce(Option<Value>) -> Option<Value> + Send + 'static,
    W: Future<Output = Result<Value, RemoteError>> + Send + 'static,
  {
    Self {
      key,
      optimistic: Box::new(optimistic),
      write: Box::pin(write),
      invalidates: Vec::new(),
      on_commit: None,
      on_rollback: None,
    }
  }

  /// Add a key to invalidate when the mutation settles.
  pub fn invalidates(mut self, key: CacheKey) -> Self {
    self.invalidates.push(key);
    self
  }

  /// Notification emitted when the remote write succeeds.
  pub fn on_commit(mut self, severity: Severity, message: impl Into<String>) -> Self {
    self.on_commit = Some((severity, message.into()));
    self
  }

  /// Notification emitted when the write fails and the snapshot is restored.
  pub fn on_rollback(mut self, severity: Severity, message: impl Into<String>) -> Self {
    self.on_rollback = Some((severity, message.into()));
    self
  }
}

/// A mutation that has entered `Pending`: the optimistic value is already in
/// the cache and the snapshot is owned here until the write settles.
struct PendingMutation {
  key: CacheKey,
  snapshot: Option<Value>,
  write: BoxFuture<'static, Result<Value, RemoteError>>,
  invalidates: Vec<CacheKey>,
  on_commit: Option<(Severity, String)>,
  on_rollback: Option<(Severity, String)>,
}

/// Orchestrates optimistic mutations against the entity cache.
#[derive(Clone)]
pub struct MutationCoordinator {
  cache: Arc<EntityCache>,
  queries: Arc<QueryCoordinator>,
  notifier: Arc<dyn Notifier>,
}

impl MutationCoordinator {
  pub fn new(
    cache: Arc<EntityCache>,
    queries: Arc<QueryCoordinator>,
    notifier: Arc<dyn Notifier>,
  ) -> Self {
    Self {
      cache,
      queries,
      notifier,
    }
  }

  /// Run a mutation to completion and return its terminal state.
  ///
  /// The optimistic value is applied before the first await point, so it is
  /// visible to every observer while the remote write is in flight.
  pub async fn run(&self, mutation: Mutation) -> MutationState {
    let pending = self.begin(mutation);
    self.settle(pending).await
  }

  /// Fire-and-forget form of [`run`](Self::run): the optimistic value is
  /// applied synchronously, the remote phase completes on a spawned task,
  /// and the outcome is observed through the cache and the notifier.
  pub fn dispatch(&self, mutation: Mutation) {
    let pending = self.begin(mutation);
    let coordinator = self.clone();
    tokio::spawn(async move {
      coordinator.settle(pending).await;
    });
  }

  /// `Idle -> Pending`: snapshot, cancel reads, apply the optimistic value.
  fn begin(&self, mutation: Mutation) -> PendingMutation {
    let Mutation {
      key,
      optimistic,
      write,
      invalidates,
      on_commit,
      on_rollback,
    } = mutation;

    // The snapshot is taken before this mutation touches shared state, and
    // is owned by this invocation alone. An interleaved mutation snapshots
    // for itself.
    let snapshot = self.cache.get(&key).and_then(|entry| entry.value);

    // A read resolving after this point must not clobber the optimistic
    // value.
    self.queries.cancel(&key);

    match optimistic(snapshot.clone()) {
      Some(value) => self.cache.set_value(&key, value),
      None => self.cache.restore(&key, None),
    }
    debug!(key = %key, "applied optimistic value");

    PendingMutation {
      key,
      snapshot,
      write,
      invalidates,
      on_commit,
      on_rollback,
    }
  }

  /// `Pending -> {Committed, RolledBack}`.
  async fn settle(&self, pending: PendingMutation) -> MutationState {
    let PendingMutation {
      key,
      snapshot,
      write,
      invalidates,
      on_commit,
      on_rollback,
    } = pending;

    let state = match write.await {
      Ok(canonical) => {
        // The server is authoritative, even where it differs from the guess
        self.cache.set_value(&key, canonical);
        if let Some((severity, message)) = on_commit {
          self.notifier.notify(severity, &message);
        }
        MutationState::Committed
      }
      Err(e) => {
        warn!(key = %key, error = %e, "mutation failed, restoring snapshot");
        self.cache.restore(&key, snapshot);
        if let Some((severity, message)) = on_rollback {
          self.notifier.notify(severity, &message);
        }
        MutationState::RolledBack
      }
    };

    for key in &invalidates {
      self.queries.invalidate(key);
    }
    state
  }
}
