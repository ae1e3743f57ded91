//! In-Memory Store
//!
//! Entries live in a [`ShardedMap`]; nothing is persisted.

use chrono::{DateTime, Utc};

use super::entry::{CacheEntry, EntryMeta};
use super::shard::ShardedMap;
use super::store::EntryStore;
use super::SHARD_COUNT;
use crate::digest::DigestId;
use crate::error::Result;

#[derive(Default)]
pub struct MemoryStore {
    map: ShardedMap<DigestId, CacheEntry, SHARD_COUNT>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.map.len())
            .field("bytes", &self.map.weight())
            .finish()
    }
}

impl EntryStore for MemoryStore {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn open(&self) -> Result<()> {
        self.map.clear();
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.map.clear();
        Ok(())
    }

    fn upsert(&self, entry: CacheEntry) -> Result<Option<EntryMeta>> {
        let key = *entry.key();
        Ok(self.map.insert(key, entry).map(|old| old.meta))
    }

    fn fetch(&self, key: &DigestId) -> Result<Option<CacheEntry>> {
        Ok(self.map.get(key))
    }

    fn probe(&self, key: &DigestId) -> Result<Option<EntryMeta>> {
        Ok(self.map.peek(key, |entry| entry.meta))
    }

    fn remove(&self, key: &DigestId) -> Result<Option<EntryMeta>> {
        Ok(self.map.remove(key).map(|old| old.meta))
    }

    fn remove_generation(&self, key: &DigestId, generation: u64) -> Result<Option<EntryMeta>> {
        Ok(self
            .map
            .remove_if(key, |entry| entry.meta.generation == generation)
            .map(|old| old.meta))
    }

    fn scan(&self) -> Result<Vec<EntryMeta>> {
        Ok(self.map.collect(|_, entry| Some(entry.meta)))
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> Result<Vec<EntryMeta>> {
        let expired = self
            .map
            .collect(|_, entry| entry.is_expired_at(now).then_some(entry.meta));

        // Re-check under the write lock so a concurrent refresh survives
        Ok(expired
            .into_iter()
            .filter_map(|meta| {
                self.map
                    .remove_if(&meta.key, |entry| entry.is_expired_at(now))
                    .map(|old| old.meta)
            })
            .collect())
    }

    fn len(&self) -> u64 {
        self.map.len() as u64
    }

    fn size_bytes(&self) -> u64 {
        self.map.weight()
    }
}

// =============================================================================
// Tests
// =============================================================================
