//! Abstract remote store capability.
//!
//! The engine never talks to a concrete transport. Reads and writes go
//! through [`RemoteStore`], which the `spa` module backs with HTTP and tests
//! back with scripted in-memory stores.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::cache::CacheKey;

#[derive(Error, Debug)]
pub enum RemoteError {
  /// Transient transport failure; retry by re-invoking the query or mutation
  #[error("Network error: {0}")]
  Network(String),

  #[error("Not found: {0}")]
  NotFound(String),

  #[error("Validation failed: {0}")]
  Validation(String),

  #[error("Unauthorized: {0}")]
  Auth(String),
}

impl RemoteError {
  /// Whether re-invoking the same operation could succeed.
  pub fn is_retryable(&self) -> bool {
    matches!(self, RemoteError::Network(_))
  }

  /// Classify an HTTP response by status code.
  pub fn from_status(status: u16, body: &str) -> Self {
    match status {
      401 | 403 => RemoteError::Auth(body.to_string()),
      404 => RemoteError::NotFound(body.to_string()),
      400 | 422 => RemoteError::Validation(body.to_string()),
      _ => RemoteError::Network(format!("status {}: {}", status, body)),
    }
  }
}

/// Credentials attached to remote calls for the signed-in user.
#[derive(Clone, Debug)]
pub struct AuthContext {
  pub user_id: i64,
  pub token: String,
}

/// Identifies the server-side entity a write targets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityRef {
  pub kind: String,
  pub id: i64,
}

impl EntityRef {
  pub fn new(kind: impl Into<String>, id: i64) -> Self {
    Self {
      kind: kind.into(),
      id,
    }
  }
}

impl fmt::Display for EntityRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.kind, self.id)
  }
}

/// Transport-agnostic reads and writes against the server.
#[async_trait]
pub trait RemoteStore: Send + Sync {
  /// Fetch the value a cache key names. Idempotent.
  async fn fetch_entity(
    &self,
    key: &CacheKey,
    auth: Option<&AuthContext>,
  ) -> Result<Value, RemoteError>;

  /// Apply a patch to an entity and return the server's canonical value.
  async fn write_entity(
    &self,
    entity: &EntityRef,
    patch: Value,
    auth: Option<&AuthContext>,
  ) -> Result<Value, RemoteError>;
}
