//! Casket - Content-Addressed Storage Kit
//!
//! Objects are named by cryptographic digests, placed on cache tiers by a
//! consistent-hash ring, and moved between tiers or peers in tamper-evident
//! binary containers.
//!
//! # Architecture
//!
//! ```text
//!   content ──▶ DigestId ──▶ ConsistentHashRing ──▶ owning tier
//!                                                       │
//!               MessageContainer ◀── transport ──┐      ▼
//!                 (verify on receipt) ───────────┴─▶ TieredCache ──▶ overflow
//! ```
//!
//! # Modules
//!
//! - [`digest`] - Providers, identifiers, hashable items and base64 forms
//! - [`ring`] - Consistent hash ring with staged rebuilds
//! - [`cache`] - Object cache engine, memory and SQLite backends, rollover
//! - [`message`] - Message container wire format
//! - [`router`] - Ring-placed cache tiers and container ingest
//! - [`bench`] - Mixed-load cache benchmark
//! - [`telemetry`] - Prometheus exposition of cache statistics
//! - [`config`] - File configuration
//! - [`error`] - Error types

pub mod bench;
pub mod cache;
pub mod config;
pub mod digest;
pub mod error;
pub mod message;
pub mod ring;
pub mod router;
pub mod telemetry;

// Re-export commonly used types
pub use cache::{
    Admission, CacheLimits, EvictionPolicy, ManageReport, ManagementTask, MemoryCache,
    ObjectCache, ObjectCacheExt, SqliteCache, TieredCache,
};
pub use config::CasketConfig;
pub use digest::{DigestId, DigestProvider, Hashable, HashableString};
pub use error::{Error, Result};
pub use message::MessageContainer;
pub use ring::ConsistentHashRing;
pub use router::CacheRouter;
