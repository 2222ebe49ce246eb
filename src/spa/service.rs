//! High-level spa operations driving the sync engine.
//!
//! Each operation mirrors a screen-level concern: the signed-in user, the
//! staff roster with treatment filtering, the user's appointments, and the
//! optimistic patch/cancel mutations.

use std::sync::{Arc, Mutex};

use color_eyre::Result;
use serde_json::{json, Value};

use crate::cache::CacheKey;
use crate::engine::SyncEngine;
use crate::mutation::{Mutation, MutationState};
use crate::notify::Severity;
use crate::query::{QueryOptions, QueryResult};
use crate::remote::{AuthContext, EntityRef};
use crate::session::SessionStore;

use super::types::{Appointment, Staff, User};

// ============================================================================
// Query keys
// ============================================================================

pub fn user_key() -> CacheKey {
  CacheKey::new("user")
}

pub fn staff_key() -> CacheKey {
  CacheKey::new("staff")
}

pub fn appointments_key() -> CacheKey {
  CacheKey::new("appointments")
}

/// Collection of the signed-in user's appointments. Scoped under the
/// appointments prefix so logout eviction is a single prefix removal.
pub fn user_appointments_key() -> CacheKey {
  appointments_key().join("user")
}

pub fn appointment_key(id: i64) -> CacheKey {
  CacheKey::new("appointment").join(id)
}

/// Filter staff to those who perform the named treatment.
pub fn filter_by_treatment(staff: &[Staff], treatment: &str) -> Vec<Staff> {
  let treatment = treatment.to_lowercase();
  staff
    .iter()
    .filter(|s| {
      s.treatment_names
        .iter()
        .any(|name| name.to_lowercase() == treatment)
    })
    .cloned()
    .collect()
}

// ============================================================================
// Service
// ============================================================================

/// Spa operations over one engine and one session store.
pub struct SpaService {
  engine: SyncEngine,
  session: SessionStore,
  auth: Mutex<Option<AuthContext>>,
}

impl SpaService {
  pub fn new(engine: SyncEngine, session: SessionStore) -> Self {
    Self {
      engine,
      session,
      auth: Mutex::new(None),
    }
  }

  pub fn engine(&self) -> &SyncEngine {
    &self.engine
  }

  /// Seed the user slot from the stored session at startup. The stored
  /// profile is shown immediately but marked stale so the next observe
  /// refreshes it from the server.
  pub fn bootstrap(&self) -> Result<Option<User>> {
    match self.session.load()? {
      Some(user) => {
        self.set_auth(&user);
        self.engine.cache().set(&user_key(), &user)?;
        self.engine.cache().invalidate(&user_key());
        Ok(Some(user))
      }
      None => Ok(None),
    }
  }

  fn set_auth(&self, user: &User) {
    let auth = user.token.clone().map(|token| AuthContext {
      user_id: user.id,
      token,
    });
    *self.auth.lock().expect("auth lock poisoned") = auth;
  }

  /// Credentials for remote calls, held while a user is signed in.
  fn auth(&self) -> Option<AuthContext> {
    self.auth.lock().expect("auth lock poisoned").clone()
  }

  pub fn signed_in(&self) -> bool {
    self.auth().is_some()
  }

  /// The signed-in user, refreshed from the server. Disabled while nobody
  /// is signed in.
  pub fn current_user(&self) -> QueryResult<User> {
    let auth = self.auth();
    let options = QueryOptions {
      enabled: auth.is_some(),
    };
    self.engine.observe_remote(&user_key(), auth, &options)
  }

  /// Record a fresh sign-in: seed the session store and the user slot.
  pub fn set_current_user(&self, user: &User) -> Result<()> {
    self.session.save(user)?;
    self.set_auth(user);
    self.engine.cache().set(&user_key(), user)?;
    Ok(())
  }

  /// Sign out: clear the stored session, drop the user's slot, and evict
  /// every collection scoped to the user.
  pub fn sign_out(&self) -> Result<()> {
    self.session.clear()?;
    *self.auth.lock().expect("auth lock poisoned") = None;
    self.engine.queries().evict(&user_key());
    self.engine.queries().evict(&user_appointments_key());
    Ok(())
  }

  /// The staff roster, optionally narrowed to one treatment. Filtering is a
  /// `select` transform; the cache always holds the full roster.
  pub fn staff(&self, treatment: Option<&str>) -> QueryResult<Vec<Staff>> {
    let remote = Arc::clone(self.engine.remote());
    let fetch = move || {
      let remote = Arc::clone(&remote);
      async move { remote.fetch_entity(&staff_key(), None).await }
    };

    match treatment {
      Some(treatment) => {
        let treatment = treatment.to_string();
        self.engine.queries().observe_select(
          &staff_key(),
          fetch,
          &QueryOptions::default(),
          move |all: &Vec<Staff>| filter_by_treatment(all, &treatment),
        )
      }
      None => self
        .engine
        .queries()
        .observe(&staff_key(), fetch, &QueryOptions::default()),
    }
  }

  /// The signed-in user's appointments. Disabled while signed out.
  pub fn user_appointments(&self) -> QueryResult<Vec<Appointment>> {
    let auth = self.auth();
    let options = QueryOptions {
      enabled: auth.is_some(),
    };
    self
      .engine
      .observe_remote(&user_appointments_key(), auth, &options)
  }

  /// Cancel an appointment: optimistically release the slot by dropping its
  /// `userId`, then let the server's canonical record settle in.
  pub async fn cancel_appointment(&self, appointment: &Appointment) -> MutationState {
    let key = appointment_key(appointment.id);
    let auth = self.auth();
    let remote = Arc::clone(self.engine.remote());
    let target = EntityRef::new("appointment", appointment.id);
    let patch = json!([{"op": "remove", "path": "/userId"}]);
    let input = serde_json::to_value(appointment).unwrap_or(Value::Null);

    let mutation = Mutation::new(
      key.clone(),
      move |current| {
        let mut value = current.unwrap_or(input);
        if let Some(obj) = value.as_object_mut() {
          obj.remove("userId");
        }
        Some(value)
      },
      async move { remote.write_entity(&target, patch, auth.as_ref()).await },
    )
    .invalidates(key)
    .invalidates(appointments_key())
    .on_commit(Severity::Info, "Appointment cancelled")
    .on_rollback(Severity::Warning, "Cancellation failed; restoring previous values");

    self.engine.mutations().run(mutation).await
  }

  /// Patch the signed-in user's editable profile fields optimistically.
  pub async fn patch_user(&self, edited: &User) -> MutationState {
    let key = user_key();
    let auth = self.auth();
    let remote = Arc::clone(self.engine.remote());
    let target = EntityRef::new("user", edited.id);
    let patch = json!({
      "name": edited.name.clone(),
      "address": edited.address.clone(),
      "phone": edited.phone.clone(),
    });
    let edited_value = serde_json::to_value(edited).unwrap_or(Value::Null);

    let write_auth = auth.clone();
    let mutation = Mutation::new(
      key.clone(),
      move |current| match current {
        Some(mut user) => {
          if let (Some(user_obj), Some(edited_obj)) =
            (user.as_object_mut(), edited_value.as_object())
          {
            for field in ["name", "address", "phone"] {
              if let Some(value) = edited_obj.get(field) {
                user_obj.insert(field.to_string(), value.clone());
              }
            }
          }
          Some(user)
        }
        None => Some(edited_value),
      },
      async move { remote.write_entity(&target, patch, write_auth.as_ref()).await },
    )
    .invalidates(user_key())
    .on_commit(Severity::Success, "User updated")
    .on_rollback(Severity::Warning, "Update failed; restoring previous values");

    let state = self.engine.mutations().run(mutation).await;

    if state == MutationState::Committed {
      if let Some(mut user) = self.engine.cache().get_as::<User>(&key) {
        // Profile responses carry no JWT; persist the one from sign-in so
        // the next startup can still authenticate
        user.token = auth.map(|a| a.token);
        let _ = self.session.save(&user);
      }
    }
    state
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::notify::{Notifier, RecordingNotifier};
  use crate::remote::{RemoteError, RemoteStore};
  use async_trait::async_trait;
  use chrono::{TimeZone, Utc};
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Mutex;
  use std::time::Duration;
  use tokio::sync::oneshot;

  /// Scripted remote store with one-shot write responses and an optional
  /// gate holding the next write open.
  #[derive(Default)]
  struct MockRemote {
    fetches: AtomicU32,
    write_response: Mutex<Option<Result<Value, RemoteError>>>,
    write_gate: Mutex<Option<oneshot::Receiver<()>>>,
  }

  impl MockRemote {
    fn respond_with(&self, response: Result<Value, RemoteError>) {
      *self.write_response.lock().unwrap() = Some(response);
    }

    fn gate_next_write(&self) -> oneshot::Sender<()> {
      let (tx, rx) = oneshot::channel();
      *self.write_gate.lock().unwrap() = Some(rx);
      tx
    }
  }

  #[async_trait]
  impl RemoteStore for MockRemote {
    async fn fetch_entity(
      &self,
      key: &CacheKey,
      _auth: Option<&AuthContext>,
    ) -> Result<Value, RemoteError> {
      self.fetches.fetch_add(1, Ordering::SeqCst);
      match key.to_string().as_str() {
        "staff" => Ok(json!([
          {"id": 1, "name": "Sandra", "treatmentNames": ["Massage"]},
          {"id": 2, "name": "Divya", "treatmentNames": ["Facial", "Scrub"]}
        ])),
        "user" => Ok(json!({"id": 9, "name": "Mary", "email": "mary@example.com"})),
        other => Err(RemoteError::NotFound(other.to_string())),
      }
    }

    async fn write_entity(
      &self,
      entity: &EntityRef,
      _patch: Value,
      _auth: Option<&AuthContext>,
    ) -> Result<Value, RemoteError> {
      let gate = self.write_gate.lock().unwrap().take();
      if let Some(gate) = gate {
        gate.await.ok();
      }
      self
        .write_response
        .lock()
        .unwrap()
        .take()
        .unwrap_or_else(|| Err(RemoteError::NotFound(entity.to_string())))
    }
  }

  struct Fixture {
    service: Arc<SpaService>,
    remote: Arc<MockRemote>,
    notifier: Arc<RecordingNotifier>,
  }

  fn fixture() -> Fixture {
    let remote = Arc::new(MockRemote::default());
    let notifier = Arc::new(RecordingNotifier::new());
    let engine = SyncEngine::new(
      Arc::clone(&remote) as Arc<dyn RemoteStore>,
      Arc::clone(&notifier) as Arc<dyn Notifier>,
    );
    let session = SessionStore::open_in_memory().unwrap();
    Fixture {
      service: Arc::new(SpaService::new(engine, session)),
      remote,
      notifier,
    }
  }

  fn mary() -> User {
    User {
      id: 9,
      name: "Mary".into(),
      email: "mary@example.com".into(),
      address: None,
      phone: None,
      token: Some("jwt".into()),
    }
  }

  fn massage_appointment() -> Appointment {
    Appointment {
      id: 1,
      treatment_name: "Massage".into(),
      user_id: Some(7),
      date_time: Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(),
      cancelled_at: None,
    }
  }

  #[tokio::test]
  async fn test_cancel_appointment_scenario() {
    let f = fixture();
    let appointment = massage_appointment();
    let key = appointment_key(appointment.id);
    f.service
      .engine()
      .cache()
      .set(&key, &appointment)
      .unwrap();

    let release = f.remote.gate_next_write();
    f.remote.respond_with(Ok(json!({
      "id": 1,
      "treatmentName": "Massage",
      "userId": null,
      "dateTime": "2024-03-01T10:00:00Z",
      "cancelledAt": "2024-03-01T09:30:00Z"
    })));

    let service = Arc::clone(&f.service);
    let pending = tokio::spawn(async move {
      let appointment = massage_appointment();
      service.cancel_appointment(&appointment).await
    });

    // Before the server responds, the optimistic value is already visible
    // with the userId dropped
    tokio::time::sleep(Duration::from_millis(50)).await;
    let optimistic = f.service.engine().cache().get(&key).unwrap();
    assert!(optimistic.value.as_ref().unwrap().get("userId").is_none());

    release.send(()).unwrap();
    let state = pending.await.unwrap();
    assert_eq!(state, MutationState::Committed);

    // The server's canonical record wins, cancelledAt included
    let settled = f.service.engine().cache().get(&key).unwrap();
    assert_eq!(
      settled.value.as_ref().unwrap().get("cancelledAt"),
      Some(&json!("2024-03-01T09:30:00Z"))
    );
    assert_eq!(
      f.notifier.take(),
      vec![(Severity::Info, "Appointment cancelled".to_string())]
    );
  }

  #[tokio::test]
  async fn test_patch_user_rollback_scenario() {
    let f = fixture();
    f.service.set_current_user(&mary()).unwrap();
    let before = f.service.engine().cache().get(&user_key()).unwrap().value;

    f.remote
      .respond_with(Err(RemoteError::Validation("name rejected".into())));

    let mut edited = mary();
    edited.name = "B".into();
    let state = f.service.patch_user(&edited).await;

    assert_eq!(state, MutationState::RolledBack);
    let after = f.service.engine().cache().get(&user_key()).unwrap().value;
    assert_eq!(after, before);
    assert_eq!(f.service.session_user(), Some(mary()));
    assert_eq!(
      f.notifier.take(),
      vec![(
        Severity::Warning,
        "Update failed; restoring previous values".to_string()
      )]
    );
  }

  #[tokio::test]
  async fn test_patch_user_commit_keeps_token_and_persists() {
    let f = fixture();
    f.service.set_current_user(&mary()).unwrap();

    // Server echoes the canonical profile without the JWT
    f.remote.respond_with(Ok(json!({
      "id": 9,
      "name": "Mary Q",
      "email": "mary@example.com"
    })));

    let mut edited = mary();
    edited.name = "Mary Q".into();
    let state = f.service.patch_user(&edited).await;

    assert_eq!(state, MutationState::Committed);
    let user: User = f.service.engine().cache().get_as(&user_key()).unwrap();
    assert_eq!(user.name, "Mary Q");
    assert!(f.service.signed_in());

    // The persisted session keeps the sign-in JWT alongside the new profile
    let stored = f.service.session_user().unwrap();
    assert_eq!(stored.name, "Mary Q");
    assert_eq!(stored.token.as_deref(), Some("jwt"));
  }

  #[tokio::test]
  async fn test_staff_filter_is_a_pure_select() {
    let f = fixture();
    let _ = f.service.staff(None);
    f.service
      .engine()
      .await_settled(&staff_key(), Duration::from_secs(1))
      .await;

    let filtered = f.service.staff(Some("facial"));
    assert_eq!(
      filtered.data.unwrap().iter().map(|s| s.id).collect::<Vec<_>>(),
      vec![2]
    );

    // The cache still holds the full roster
    let cached: Vec<Staff> = f.service.engine().cache().get_as(&staff_key()).unwrap();
    assert_eq!(cached.len(), 2);
  }

  #[tokio::test]
  async fn test_current_user_query_disabled_when_signed_out() {
    let f = fixture();
    let result = f.service.current_user();
    assert!(result.data.is_none());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(f.remote.fetches.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_sign_out_evicts_user_scope_only() {
    let f = fixture();
    f.service.set_current_user(&mary()).unwrap();
    let cache = f.service.engine().cache();
    cache
      .set(&user_appointments_key(), &json!([{"id": 1}]))
      .unwrap();
    cache.set(&staff_key(), &json!([])).unwrap();

    f.service.sign_out().unwrap();

    assert!(cache.get(&user_key()).is_none());
    assert!(cache.get(&user_appointments_key()).is_none());
    assert!(cache.get(&staff_key()).is_some());
    assert!(f.service.session_user().is_none());
    assert!(!f.service.signed_in());
  }

  impl SpaService {
    /// Test helper: read the durable session directly.
    fn session_user(&self) -> Option<User> {
      self.session.load().unwrap()
    }
  }
}
