//! Durable storage for the signed-in user.
//!
//! The engine is seeded with the stored user at startup and the row is
//! cleared on logout; the core never touches this module otherwise.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::path::PathBuf;
use std::sync::Mutex;

use crate::spa::User;

/// Schema for the session table. A CHECK on the id keeps it single-row.
const SESSION_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS session (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    user TEXT NOT NULL,
    saved_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// SQLite-backed store for the current user.
pub struct SessionStore {
  conn: Mutex<Connection>,
}

impl SessionStore {
  /// Open or create the session database at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;

    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create session directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open session database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open an in-memory store. Used by tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory session database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("spaq").join("session.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(SESSION_SCHEMA)
      .map_err(|e| eyre!("Failed to run session migrations: {}", e))?;

    Ok(())
  }

  /// Persist the signed-in user, replacing any previous row.
  pub fn save(&self, user: &User) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let data =
      serde_json::to_string(user).map_err(|e| eyre!("Failed to serialize user: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO session (id, user, saved_at) VALUES (1, ?, datetime('now'))",
        params![data],
      )
      .map_err(|e| eyre!("Failed to save session: {}", e))?;

    Ok(())
  }

  /// Load the stored user, if anyone is signed in.
  pub fn load(&self) -> Result<Option<User>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let data: Option<String> = conn
      .query_row("SELECT user FROM session WHERE id = 1", [], |row| row.get(0))
      .ok();

    match data {
      Some(data) => {
        let user =
          serde_json::from_str(&data).map_err(|e| eyre!("Failed to parse stored user: {}", e))?;
        Ok(Some(user))
      }
      None => Ok(None),
    }
  }

  /// Clear the stored user on logout.
  pub fn clear(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM session WHERE id = 1", [])
      .map_err(|e| eyre!("Failed to clear session: {}", e))?;

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

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

  #[test]
  fn test_save_load_roundtrip() {
    let store = SessionStore::open_in_memory().unwrap();
    assert!(store.load().unwrap().is_none());

    store.save(&mary()).unwrap();
    assert_eq!(store.load().unwrap(), Some(mary()));
  }

  #[test]
  fn test_save_replaces_previous_user() {
    let store = SessionStore::open_in_memory().unwrap();
    store.save(&mary()).unwrap();

    let mut other = mary();
    other.id = 10;
    other.name = "Taylor".into();
    store.save(&other).unwrap();

    assert_eq!(store.load().unwrap(), Some(other));
  }

  #[test]
  fn test_clear_removes_user() {
    let store = SessionStore::open_in_memory().unwrap();
    store.save(&mary()).unwrap();
    store.clear().unwrap();
    assert!(store.load().unwrap().is_none());
  }
}
