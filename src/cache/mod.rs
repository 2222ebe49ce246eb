//! Process-wide keyed cache of server-derived entities.
//!
//! This module provides the storage half of the sync engine:
//! - Structured, ordered cache keys with prefix matching
//! - Versioned entries with Idle/Loading/Success/Error status
//! - Invalidation that keeps data visible while a refetch is due
//! - Prefix-scoped eviction for entity-dependent collections
//! - Broadcast change events for observers

mod key;
mod store;

pub use key::{CacheKey, Segment};
pub use store::{CacheEntry, CacheEvent, EntityCache, SlotStatus};
