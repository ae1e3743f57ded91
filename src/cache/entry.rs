//! Cache Entry Types

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::time::Duration;

use super::shard::Weighted;
use crate::digest::DigestId;

/// Entry metadata without the value
///
/// Used for management sweeps so candidates can be ranked without copying
/// payloads out of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMeta {
    pub key: DigestId,
    /// Value size in bytes
    pub size: u64,
    pub inserted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Write generation, bumped on every add or update
    pub generation: u64,
}

impl EntryMeta {
    #[inline]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Time left before expiry, zero if already expired
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

/// A stored object
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub meta: EntryMeta,
    pub value: Bytes,
}

impl CacheEntry {
    /// Build an entry expiring `ttl` after `now`
    pub fn new(key: DigestId, value: Bytes, now: DateTime<Utc>, ttl: Duration, generation: u64) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let expires_at = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            meta: EntryMeta {
                key,
                size: value.len() as u64,
                inserted_at: now,
                expires_at,
                generation,
            },
            value,
        }
    }

    #[inline]
    pub fn key(&self) -> &DigestId {
        &self.meta.key
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.meta.size
    }

    #[inline]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.meta.is_expired_at(now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

impl Weighted for CacheEntry {
    fn weight(&self) -> u64 {
        self.meta.size
    }
}

// =============================================================================
// Tests
// =============================================================================
