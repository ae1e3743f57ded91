//! Backend Seam
//!
//! The engine in `engine.rs` implements admission, expiry and rollover once,
//! on top of any [`EntryStore`]. A store only has to keep entries keyed by
//! identifier and report its own size. Each single-key operation must be
//! atomic with respect to the others on the same key.

use chrono::{DateTime, Utc};

use super::entry::{CacheEntry, EntryMeta};
use crate::digest::DigestId;
use crate::error::Result;

pub trait EntryStore: Send + Sync {
    /// Short backend name for logs and stats
    fn kind(&self) -> &'static str;

    /// Acquire backend resources; called once by `initialize()`
    fn open(&self) -> Result<()>;

    /// Release backend resources; safe to call when not open
    fn close(&self) -> Result<()>;

    /// Insert or replace, returning the previous entry's metadata
    fn upsert(&self, entry: CacheEntry) -> Result<Option<EntryMeta>>;

    fn fetch(&self, key: &DigestId) -> Result<Option<CacheEntry>>;

    /// Metadata for one key without reading its value
    fn probe(&self, key: &DigestId) -> Result<Option<EntryMeta>>;

    /// Remove a key, returning the removed entry's metadata
    fn remove(&self, key: &DigestId) -> Result<Option<EntryMeta>>;

    /// Remove a key only if it still holds the given write generation
    fn remove_generation(&self, key: &DigestId, generation: u64) -> Result<Option<EntryMeta>>;

    /// Metadata of every stored entry
    fn scan(&self) -> Result<Vec<EntryMeta>>;

    /// Remove every entry that expired at or before `now`, returning their metadata
    fn purge_expired(&self, now: DateTime<Utc>) -> Result<Vec<EntryMeta>>;

    /// Number of stored entries
    fn len(&self) -> u64;

    /// Total stored value bytes
    fn size_bytes(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
