//! Object Cache Capability
//!
//! Every cache variant implements [`ObjectCache`]. Variants are chosen at
//! construction time and may be chained: a cache can own an overflow cache
//! of the same capability that absorbs entries it no longer has room for.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use super::metrics::CacheStats;
use crate::digest::{DigestId, Hashable};
use crate::error::Result;

/// Outcome of an add-or-update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// New entry created
    Stored,
    /// Existing entry replaced
    Updated,
    /// Not admitted; see the reason
    Rejected(RejectReason),
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Admission::Rejected(_))
    }
}

/// Why an object was not admitted
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    #[error("identifier of empty content is not a valid key")]
    InvalidKey,

    #[error("object of {size} bytes exceeds the {max} byte object limit")]
    ObjectTooLarge { size: u64, max: u64 },

    #[error("collection full ({count} objects, {size} bytes) and no overflow cache is configured")]
    CollectionFull { count: u64, size: u64 },

    #[error("collection full and the overflow cache refused relocation")]
    OverflowRefused,
}

/// Summary of one management cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManageReport {
    /// Another cycle was already running; nothing was done
    pub skipped: bool,
    pub expired: u64,
    pub evicted: u64,
    pub relocated: u64,
    /// Entries left after the cycle
    pub remaining: u64,
    /// Bytes left after the cycle
    pub remaining_bytes: u64,
    pub accepting_objects: bool,
}

/// Capability shared by every cache variant
pub trait ObjectCache: Send + Sync {
    fn name(&self) -> &str;

    /// Backend kind, e.g. "memory" or "sqlite"
    fn backend(&self) -> &'static str;

    /// Prepare backend resources and reset counters; a second call is a no-op
    fn initialize(&self) -> Result<()>;

    /// Insert or refresh an entry
    ///
    /// Capacity conditions return `Ok(Admission::Rejected(_))` and clear the
    /// accepting flag. A write while the flag is clear fails with
    /// [`Error::NotAccepting`](crate::Error::NotAccepting).
    fn add_or_update(&self, key: DigestId, value: Bytes, ttl: Duration) -> Result<Admission>;

    fn get(&self, key: &DigestId) -> Result<Option<Bytes>>;

    fn exists(&self, key: &DigestId) -> Result<bool>;

    /// Remove from this cache and its overflow; true if anything was removed
    fn remove(&self, key: &DigestId) -> Result<bool>;

    /// Run one management cycle now
    fn manage(&self) -> Result<ManageReport>;

    fn accepting_objects(&self) -> bool;

    fn collection_count(&self) -> u64;

    fn collection_size(&self) -> u64;

    fn stats(&self) -> CacheStats;

    /// Reads plus writes per second since `initialize()`
    fn total_average_iops(&self) -> f64;

    /// Release backend resources
    fn dispose(&self) -> Result<()>;

    fn overflow(&self) -> Option<Arc<dyn ObjectCache>>;
}

/// Typed helpers over any [`ObjectCache`]
pub trait ObjectCacheExt: ObjectCache {
    /// Store a hashable item's canonical bytes under its own identifier
    fn add_hashable<H: Hashable + ?Sized>(&self, item: &H, ttl: Duration) -> Result<Admission> {
        self.add_or_update(item.digest(), Bytes::from(item.hash_input()), ttl)
    }

    /// Fetch and confirm the bytes still hash to `key`
    fn get_verified(&self, key: &DigestId) -> Result<Option<Bytes>> {
        match self.get(key)? {
            Some(bytes) => {
                key.verify(&bytes)?;
                Ok(Some(bytes))
            }
            None => Ok(None),
        }
    }

    fn add_json<T: Serialize + ?Sized>(&self, key: DigestId, value: &T, ttl: Duration) -> Result<Admission> {
        let bytes = serde_json::to_vec(value)?;
        self.add_or_update(key, Bytes::from(bytes), ttl)
    }

    fn get_json<T: DeserializeOwned>(&self, key: &DigestId) -> Result<Option<T>> {
        self.get(key)?
            .map(|bytes| serde_json::from_slice(&bytes).map_err(Into::into))
            .transpose()
    }
}

impl<C: ObjectCache + ?Sized> ObjectCacheExt for C {}
