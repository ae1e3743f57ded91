//! Object Cache
//!
//! Digest-keyed object caches with size and count ceilings, per-entry expiry
//! and optional chaining to an overflow cache.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                  TieredCache<S: EntryStore>                │
//! │   admission · expiry · eviction policy · rollover · stats  │
//! └──────────────┬─────────────────────────────┬───────────────┘
//!                │                             │ overflow
//!       ┌────────▼────────┐          ┌─────────▼─────────┐
//!       │   MemoryStore   │          │  dyn ObjectCache  │
//!       │  (ShardedMap)   │          │   (any variant)   │
//!       ├─────────────────┤          └───────────────────┘
//!       │   SqliteStore   │
//!       │   (rusqlite)    │
//!       └─────────────────┘
//! ```
//!
//! Backends only store, fetch and enumerate. Limits, the accepting flag and
//! the management cadence live in the engine so every backend behaves the
//! same way under pressure.

pub mod cadence;
pub mod engine;
pub mod entry;
pub mod memory;
pub mod metrics;
pub mod object;
pub mod policy;
pub mod shard;
pub mod sqlite;
pub mod store;
pub mod task;

pub use cadence::ManagementCadence;
pub use engine::{MemoryCache, SqliteCache, TieredCache};
pub use entry::{CacheEntry, EntryMeta};
pub use memory::MemoryStore;
pub use metrics::{CacheCounters, CacheStats, CounterSnapshot};
pub use object::{Admission, ManageReport, ObjectCache, ObjectCacheExt, RejectReason};
pub use policy::{CacheLimits, EvictionOrder, EvictionPolicy};
pub use sqlite::{SqliteLocation, SqliteStore};
pub use store::EntryStore;
pub use task::ManagementTask;

/// Cache line size for padding
pub const CACHE_LINE_SIZE: usize = 64;

/// Number of shards in the memory backend (must be power of 2)
pub const SHARD_COUNT: usize = 64;
