//! Process-wide entity cache.
//!
//! Holds the latest known state of named entities and collections, keyed by
//! [`CacheKey`]. Slots are versioned so observers can detect staleness, and
//! every change is announced on a broadcast channel. All operations take the
//! slot map mutex for their full duration, so no entry is ever observed
//! partially written.

use std::collections::BTreeMap;
use std::sync::Mutex;

use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use super::key::CacheKey;

/// Capacity of the change-event channel. Slow subscribers that fall more
/// than this far behind miss events and must re-read the entries they watch.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle status of a cache slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotStatus {
  /// Slot exists but no fetch has run yet
  Idle,
  /// A fetch for this slot is in flight
  Loading,
  /// The slot holds a successfully written value
  Success,
  /// The last fetch failed; any prior value is retained
  Error,
}

/// The cached state of one entity or collection.
#[derive(Clone, Debug)]
pub struct CacheEntry {
  /// Latest known value, if any write ever succeeded
  pub value: Option<Value>,
  /// Incremented on every successful write
  pub version: u64,
  /// Lifecycle status of the slot
  pub status: SlotStatus,
  /// Marked by invalidation: data is shown but a refetch is due
  pub stale: bool,
  /// Failure detail retained when `status` is [`SlotStatus::Error`]
  pub error: Option<String>,
}

impl CacheEntry {
  fn idle() -> Self {
    Self {
      value: None,
      version: 0,
      status: SlotStatus::Idle,
      stale: false,
      error: None,
    }
  }

  /// Deserialize the cached value, if present.
  pub fn decode<T: DeserializeOwned>(&self) -> Option<T> {
    self
      .value
      .as_ref()
      .and_then(|v| serde_json::from_value(v.clone()).ok())
  }

  /// Whether the slot holds a value that needs no refetch.
  pub fn is_fresh(&self) -> bool {
    self.status == SlotStatus::Success && !self.stale
  }
}

/// Change notification emitted by the cache.
#[derive(Clone, Debug)]
pub enum CacheEvent {
  /// The entry's value, status, or error changed
  Updated(CacheKey),
  /// The entry was marked stale without losing its value
  Invalidated(CacheKey),
  /// The entry was removed
  Removed(CacheKey),
}

impl CacheEvent {
  /// The key the event concerns.
  pub fn key(&self) -> &CacheKey {
    match self {
      CacheEvent::Updated(key) | CacheEvent::Invalidated(key) | CacheEvent::Removed(key) => key,
    }
  }
}

/// Keyed store of [`CacheEntry`] slots with change notifications.
///
/// The slot map is a `BTreeMap` ordered by key, so all keys sharing a prefix
/// are contiguous and prefix-scoped operations walk only the matching range.
pub struct EntityCache {
  slots: Mutex<BTreeMap<CacheKey, CacheEntry>>,
  events: broadcast::Sender<CacheEvent>,
}

impl EntityCache {
  pub fn new() -> Self {
    let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    Self {
      slots: Mutex::new(BTreeMap::new()),
      events,
    }
  }

  /// Subscribe to change events for all keys.
  pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
    self.events.subscribe()
  }

  /// Read the entry for a key. No side effects.
  pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
    self.slots.lock().expect("cache lock poisoned").get(key).cloned()
  }

  /// Read and deserialize the value for a key.
  pub fn get_as<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
    self.get(key).and_then(|entry| entry.decode())
  }

  /// Current version of a key's slot, 0 if the slot does not exist.
  pub fn version(&self, key: &CacheKey) -> u64 {
    self.get(key).map(|entry| entry.version).unwrap_or(0)
  }

  /// Overwrite a slot's value: bump the version, set status to `Success`,
  /// and clear any stale mark or retained error.
  pub fn set_value(&self, key: &CacheKey, value: Value) {
    {
      let mut slots = self.slots.lock().expect("cache lock poisoned");
      let entry = slots.entry(key.clone()).or_insert_with(CacheEntry::idle);
      entry.value = Some(value);
      entry.version += 1;
      entry.status = SlotStatus::Success;
      entry.stale = false;
      entry.error = None;
    }
    self.emit(CacheEvent::Updated(key.clone()));
  }

  /// Serialize and store a value.
  pub fn set<T: Serialize>(&self, key: &CacheKey, value: &T) -> Result<()> {
    let value =
      serde_json::to_value(value).map_err(|e| eyre!("Failed to serialize cache value: {}", e))?;
    self.set_value(key, value);
    Ok(())
  }

  /// Mark a slot as loading without touching its value. Creates the slot if
  /// it does not exist yet.
  pub fn set_loading(&self, key: &CacheKey) {
    {
      let mut slots = self.slots.lock().expect("cache lock poisoned");
      let entry = slots.entry(key.clone()).or_insert_with(CacheEntry::idle);
      entry.status = SlotStatus::Loading;
    }
    self.emit(CacheEvent::Updated(key.clone()));
  }

  /// Record a fetch failure on a slot. The value is left as it was.
  pub fn set_error(&self, key: &CacheKey, detail: &str) {
    {
      let mut slots = self.slots.lock().expect("cache lock poisoned");
      let entry = slots.entry(key.clone()).or_insert_with(CacheEntry::idle);
      entry.status = SlotStatus::Error;
      entry.error = Some(detail.to_string());
    }
    self.emit(CacheEvent::Updated(key.clone()));
  }

  /// Mark an entry stale without deleting its data. No-op if the key has no
  /// slot.
  pub fn invalidate(&self, key: &CacheKey) {
    let marked = {
      let mut slots = self.slots.lock().expect("cache lock poisoned");
      match slots.get_mut(key) {
        Some(entry) => {
          entry.stale = true;
          true
        }
        None => false,
      }
    };
    if marked {
      self.emit(CacheEvent::Invalidated(key.clone()));
    }
  }

  /// Mark every entry whose key starts with `prefix` as stale. Returns the
  /// keys that were marked.
  pub fn invalidate_prefix(&self, prefix: &CacheKey) -> Vec<CacheKey> {
    let marked: Vec<CacheKey> = {
      let mut slots = self.slots.lock().expect("cache lock poisoned");
      let keys: Vec<CacheKey> = slots
        .range(prefix.clone()..)
        .take_while(|(key, _)| key.starts_with(prefix))
        .map(|(key, _)| key.clone())
        .collect();
      for key in &keys {
        if let Some(entry) = slots.get_mut(key) {
          entry.stale = true;
        }
      }
      keys
    };
    for key in &marked {
      self.emit(CacheEvent::Invalidated(key.clone()));
    }
    marked
  }

  /// Remove the entry for `prefix` and every entry whose key extends it.
  /// Returns the keys that were removed.
  pub fn remove(&self, prefix: &CacheKey) -> Vec<CacheKey> {
    let removed: Vec<CacheKey> = {
      let mut slots = self.slots.lock().expect("cache lock poisoned");
      let keys: Vec<CacheKey> = slots
        .range(prefix.clone()..)
        .take_while(|(key, _)| key.starts_with(prefix))
        .map(|(key, _)| key.clone())
        .collect();
      for key in &keys {
        slots.remove(key);
      }
      keys
    };
    for key in &removed {
      debug!(key = %key, "evicted cache entry");
      self.emit(CacheEvent::Removed(key.clone()));
    }
    removed
  }

  /// Reinstate a snapshot taken before an optimistic write. A `Some`
  /// snapshot overwrites the slot with exactly that value; a `None` snapshot
  /// restores absence by removing the slot.
  pub fn restore(&self, key: &CacheKey, snapshot: Option<Value>) {
    match snapshot {
      Some(value) => self.set_value(key, value),
      None => {
        let existed = {
          let mut slots = self.slots.lock().expect("cache lock poisoned");
          slots.remove(key).is_some()
        };
        if existed {
          self.emit(CacheEvent::Removed(key.clone()));
        }
      }
    }
  }

  fn emit(&self, event: CacheEvent) {
    // Send fails only when nobody subscribes, which is fine
    let _ = self.events.send(event);
  }
}

impl Default for EntityCache {
  fn default() -> Self {
    Self::new()
  }
}
