//! spaq — a client-side cache synchronization engine for spa booking APIs.
//!
//! The engine keeps a process-wide keyed cache of server-derived entities in
//! sync with a remote store:
//! - Queries populate the cache, coalesce concurrent identical reads, and
//!   discard superseded in-flight responses via generation counters
//! - Mutations apply optimistic values immediately, roll back to an owned
//!   snapshot on failure, and commit the server's canonical value on success
//! - Invalidation marks entries stale while keeping data visible, and
//!   triggers background refetches for observed keys
//! - Eviction removes an entity's slot and every collection scoped to it
//!
//! The `spa` module binds the engine to a concrete booking service over
//! HTTP; everything above it is transport-agnostic.

pub mod cache;
pub mod config;
pub mod engine;
pub mod mutation;
pub mod notify;
pub mod query;
pub mod remote;
pub mod session;
pub mod spa;

pub use cache::{CacheEntry, CacheEvent, CacheKey, EntityCache, Segment, SlotStatus};
pub use engine::SyncEngine;
pub use mutation::{Mutation, MutationCoordinator, MutationState};
pub use notify::{ConsoleNotifier, Notifier, RecordingNotifier, Severity};
pub use query::{QueryCoordinator, QueryOptions, QueryResult};
pub use remote::{AuthContext, EntityRef, RemoteError, RemoteStore};
pub use session::SessionStore;
