//! Cache Engine
//!
//! [`TieredCache`] implements admission control, expiry, eviction and
//! rollover once, over any [`EntryStore`] backend.
//!
//! # Rollover
//!
//! When the store is at a ceiling and an overflow cache is configured, the
//! least fit entries (per the [`EvictionPolicy`]) are copied into the overflow
//! cache first and only then removed from the store, guarded by their write
//! generation. An entry is therefore always visible in the primary, the
//! overflow or both; reads prefer the primary. No store lock is held while
//! talking to the overflow cache.
//!
//! Writes are admitted one at a time: the capacity check, any rollover it
//! triggers and the insert run under a single admission lock, so concurrent
//! writers never push the store past its ceilings.

use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::cadence::ManagementCadence;
use super::entry::{CacheEntry, EntryMeta};
use super::memory::MemoryStore;
use super::metrics::{CacheCounters, CacheStats};
use super::object::{Admission, ManageReport, ObjectCache, RejectReason};
use super::policy::{CacheLimits, EvictionPolicy};
use super::sqlite::{SqliteLocation, SqliteStore};
use super::store::EntryStore;
use crate::digest::DigestId;
use crate::error::{Error, Result};

/// Map-backed cache
pub type MemoryCache = TieredCache<MemoryStore>;

/// Cache persisted in an embedded SQLite database
pub type SqliteCache = TieredCache<SqliteStore>;

pub struct TieredCache<S: EntryStore> {
    name: String,
    store: S,
    limits: CacheLimits,
    policy: EvictionPolicy,
    cadence: ManagementCadence,
    counters: CacheCounters,
    accepting: AtomicBool,
    initialized: AtomicBool,
    generation: AtomicU64,
    last_rejection: Mutex<Option<RejectReason>>,
    /// Serializes initialize/dispose
    lifecycle: Mutex<()>,
    /// Serializes the capacity check with the insert it admits
    admission: Mutex<()>,
    /// Serializes rollover batches
    relocation: Mutex<()>,
    overflow: Option<Arc<dyn ObjectCache>>,
}

impl MemoryCache {
    pub fn memory(name: impl Into<String>) -> Self {
        Self::new(name, MemoryStore::new())
    }
}

impl SqliteCache {
    pub fn sqlite(name: impl Into<String>, location: SqliteLocation) -> Self {
        Self::new(name, SqliteStore::new(location))
    }
}

impl<S: EntryStore> TieredCache<S> {
    pub fn new(name: impl Into<String>, store: S) -> Self {
        Self {
            name: name.into(),
            store,
            limits: CacheLimits::default(),
            policy: EvictionPolicy::default(),
            cadence: ManagementCadence::disabled(),
            counters: CacheCounters::new(),
            accepting: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            last_rejection: Mutex::new(None),
            lifecycle: Mutex::new(()),
            admission: Mutex::new(()),
            relocation: Mutex::new(()),
            overflow: None,
        }
    }

    pub fn with_limits(mut self, limits: CacheLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_policy(mut self, policy: EvictionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run management inline every `every` wall-clock time or `every_io` operations
    pub fn with_cadence(mut self, every: Duration, every_io: u64) -> Self {
        self.cadence = ManagementCadence::new(every, every_io);
        self
    }

    pub fn with_overflow(mut self, overflow: Arc<dyn ObjectCache>) -> Self {
        self.overflow = Some(overflow);
        self
    }

    pub fn limits(&self) -> &CacheLimits {
        &self.limits
    }

    pub fn policy(&self) -> &EvictionPolicy {
        &self.policy
    }

    pub fn cadence(&self) -> &ManagementCadence {
        &self.cadence
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Reason the accepting flag was last cleared
    pub fn last_rejection(&self) -> Option<RejectReason> {
        self.last_rejection.lock().clone()
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(Error::NotInitialized(self.name.clone()))
        }
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Clear the accepting flag and report the rejection
    fn refuse(&self, reason: RejectReason) -> Admission {
        self.accepting.store(false, Ordering::Release);
        self.counters.record_rejected();
        warn!(cache = %self.name, %reason, "Cache stopped accepting objects");
        *self.last_rejection.lock() = Some(reason.clone());
        Admission::Rejected(reason)
    }

    /// Count one operation and run a management cycle when one is due
    fn after_io(&self) {
        if !self.cadence.record_io() {
            return;
        }
        if let Some(_cycle) = self.cadence.try_begin() {
            if let Err(e) = self.manage_cycle() {
                warn!(cache = %self.name, error = %e, "Inline management cycle failed");
            }
        }
    }

    /// Make room for `reserve` bytes by moving entries to the overflow cache
    fn roll_over(&self, overflow: &dyn ObjectCache, reserve: u64) -> Result<u64> {
        let _batch = self.relocation.lock();

        let expired = self.store.purge_expired(Utc::now())?;
        self.counters.record_expired(expired.len() as u64);

        let victims = self.policy.select_victims(
            &self.limits,
            self.store.scan()?,
            self.store.len(),
            self.store.size_bytes(),
            reserve,
        );
        self.relocate(overflow, victims)
    }

    /// Copy each victim to the overflow cache, then drop it from the store
    fn relocate(&self, overflow: &dyn ObjectCache, victims: Vec<EntryMeta>) -> Result<u64> {
        let now = Utc::now();
        let mut moved = 0u64;

        for meta in victims {
            if meta.is_expired_at(now) {
                if self.store.remove_generation(&meta.key, meta.generation)?.is_some() {
                    self.counters.record_expired(1);
                }
                continue;
            }

            let Some(entry) = self.store.fetch(&meta.key)? else {
                continue;
            };
            if entry.meta.generation != meta.generation {
                continue;
            }

            let ttl = entry.meta.remaining_ttl(now).max(Duration::from_millis(1));
            match overflow.add_or_update(meta.key, entry.value, ttl) {
                Ok(Admission::Rejected(reason)) => {
                    warn!(cache = %self.name, overflow = %overflow.name(), %reason, "Overflow cache rejected relocation");
                    break;
                }
                Ok(_) => {}
                Err(e) if e.is_capacity() => {
                    warn!(cache = %self.name, overflow = %overflow.name(), error = %e, "Overflow cache not accepting");
                    break;
                }
                Err(e) => return Err(e),
            }

            if self.store.remove_generation(&meta.key, meta.generation)?.is_some() {
                moved += 1;
            }
        }

        if moved > 0 {
            self.counters.record_relocated(moved);
            debug!(cache = %self.name, overflow = %overflow.name(), moved, "Rolled entries over");
        }
        Ok(moved)
    }

    #[instrument(skip(self), fields(cache = %self.name))]
    fn manage_cycle(&self) -> Result<ManageReport> {
        let expired = self.store.purge_expired(Utc::now())?.len() as u64;
        self.counters.record_expired(expired);

        let mut evicted = 0;
        let mut relocated = 0;
        let count = self.store.len();
        let size = self.store.size_bytes();

        if self.policy.needs_relief(&self.limits, count, size) {
            match &self.overflow {
                Some(overflow) => {
                    let _batch = self.relocation.lock();
                    let victims =
                        self.policy
                            .select_victims(&self.limits, self.store.scan()?, count, size, 0);
                    relocated = self.relocate(overflow.as_ref(), victims)?;
                }
                None => {
                    let victims =
                        self.policy
                            .select_victims(&self.limits, self.store.scan()?, count, size, 0);
                    for meta in victims {
                        if self.store.remove_generation(&meta.key, meta.generation)?.is_some() {
                            evicted += 1;
                        }
                    }
                    self.counters.record_evicted(evicted);
                }
            }
        }

        let remaining = self.store.len();
        let remaining_bytes = self.store.size_bytes();
        let below = remaining < self.limits.max_collection_count
            && remaining_bytes < self.limits.max_collection_size;
        if below && !self.accepting.swap(true, Ordering::AcqRel) {
            self.last_rejection.lock().take();
            info!(cache = %self.name, remaining, "Cache accepting objects again");
        }
        self.counters.record_manage_run();

        let report = ManageReport {
            skipped: false,
            expired,
            evicted,
            relocated,
            remaining,
            remaining_bytes,
            accepting_objects: self.accepting.load(Ordering::Acquire),
        };
        debug!(?report, "Management cycle complete");
        Ok(report)
    }
}

impl<S: EntryStore> ObjectCache for TieredCache<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn backend(&self) -> &'static str {
        self.store.kind()
    }

    fn initialize(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        if self.is_initialized() {
            return Ok(());
        }

        if let Some(overflow) = &self.overflow {
            overflow.initialize()?;
        }
        self.store.open()?;
        // Durable stores keep generations from earlier runs; start above them
        let seed = Utc::now().timestamp_micros().max(0) as u64;
        self.generation.fetch_max(seed, Ordering::Relaxed);
        self.counters.reset();
        self.cadence.reset();
        self.last_rejection.lock().take();
        self.accepting.store(true, Ordering::Release);
        self.initialized.store(true, Ordering::Release);

        info!(
            cache = %self.name,
            backend = self.store.kind(),
            entries = self.store.len(),
            overflow = self.overflow.as_ref().map(|o| o.name()).unwrap_or("-"),
            "Initialized cache"
        );
        Ok(())
    }

    fn add_or_update(&self, key: DigestId, value: Bytes, ttl: Duration) -> Result<Admission> {
        self.ensure_ready()?;

        if !key.is_valid() {
            self.counters.record_rejected();
            debug!(cache = %self.name, "Refused invalid key");
            return Ok(Admission::Rejected(RejectReason::InvalidKey));
        }

        if !self.accepting.load(Ordering::Acquire) {
            let reason = self
                .last_rejection()
                .map(|r| r.to_string())
                .unwrap_or_else(|| "admission closed".to_string());
            return Err(Error::NotAccepting {
                cache: self.name.clone(),
                reason,
            });
        }

        let size = value.len() as u64;
        if size > self.limits.max_object_size {
            return Ok(self.refuse(RejectReason::ObjectTooLarge {
                size,
                max: self.limits.max_object_size,
            }));
        }

        let previous = {
            let _admit = self.admission.lock();

            let (added_count, delta) = match self.store.probe(&key)? {
                Some(existing) => (0, size as i64 - existing.size as i64),
                None => (1, size as i64),
            };
            let full = |store: &S| {
                self.limits
                    .would_exceed(store.len(), store.size_bytes(), added_count, delta)
            };

            if full(&self.store) {
                if let Some(overflow) = &self.overflow {
                    self.roll_over(overflow.as_ref(), size)?;
                    if full(&self.store) {
                        return Ok(self.refuse(RejectReason::OverflowRefused));
                    }
                } else {
                    return Ok(self.refuse(RejectReason::CollectionFull {
                        count: self.store.len(),
                        size: self.store.size_bytes(),
                    }));
                }
            }

            let ttl = self.limits.clamp_ttl(ttl);
            let entry = CacheEntry::new(key, value, Utc::now(), ttl, self.next_generation());
            self.store.upsert(entry)?
        };
        self.counters.record_write();
        self.after_io();

        Ok(if previous.is_some() {
            Admission::Updated
        } else {
            Admission::Stored
        })
    }

    fn get(&self, key: &DigestId) -> Result<Option<Bytes>> {
        self.ensure_ready()?;
        self.counters.record_read();

        if key.is_valid() {
            if let Some(entry) = self.store.fetch(key)? {
                if !entry.is_expired() {
                    self.counters.record_hit();
                    self.after_io();
                    return Ok(Some(entry.value));
                }
                if self
                    .store
                    .remove_generation(key, entry.meta.generation)?
                    .is_some()
                {
                    self.counters.record_expired(1);
                }
            }
        }
        self.counters.record_miss();

        let found = match &self.overflow {
            Some(overflow) => overflow.get(key)?,
            None => None,
        };
        if found.is_some() {
            self.counters.record_overflow_hit();
        }
        self.after_io();
        Ok(found)
    }

    fn exists(&self, key: &DigestId) -> Result<bool> {
        self.ensure_ready()?;
        self.counters.record_read();

        let present = key.is_valid()
            && self
                .store
                .probe(key)?
                .is_some_and(|meta| !meta.is_expired_at(Utc::now()));

        let found = match (&self.overflow, present) {
            (_, true) => true,
            (Some(overflow), false) => overflow.exists(key)?,
            (None, false) => false,
        };
        self.after_io();
        Ok(found)
    }

    fn remove(&self, key: &DigestId) -> Result<bool> {
        self.ensure_ready()?;

        let mut removed = self.store.remove(key)?.is_some();
        if let Some(overflow) = &self.overflow {
            removed |= overflow.remove(key)?;
        }
        self.counters.record_write();
        self.after_io();
        Ok(removed)
    }

    fn manage(&self) -> Result<ManageReport> {
        self.ensure_ready()?;
        match self.cadence.try_begin() {
            Some(_cycle) => self.manage_cycle(),
            None => Ok(ManageReport {
                skipped: true,
                accepting_objects: self.accepting_objects(),
                ..Default::default()
            }),
        }
    }

    fn accepting_objects(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    fn collection_count(&self) -> u64 {
        self.store.len()
    }

    fn collection_size(&self) -> u64 {
        self.store.size_bytes()
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            name: self.name.clone(),
            backend: self.store.kind(),
            accepting_objects: self.accepting_objects(),
            collection_count: self.store.len(),
            collection_size: self.store.size_bytes(),
            counters: self.counters.snapshot(),
            overflow: self.overflow.as_ref().map(|o| Box::new(o.stats())),
        }
    }

    fn total_average_iops(&self) -> f64 {
        self.counters.average_iops()
    }

    fn dispose(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        if !self.initialized.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        self.accepting.store(false, Ordering::Release);

        let closed = self.store.close();
        let overflow_closed = match &self.overflow {
            Some(overflow) => overflow.dispose(),
            None => Ok(()),
        };
        info!(cache = %self.name, "Disposed cache");
        closed.and(overflow_closed)
    }

    fn overflow(&self) -> Option<Arc<dyn ObjectCache>> {
        self.overflow.clone()
    }
}

impl<S: EntryStore> std::fmt::Debug for TieredCache<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("name", &self.name)
            .field("backend", &self.store.kind())
            .field("limits", &self.limits)
            .field("accepting", &self.accepting_objects())
            .field("overflow", &self.overflow.as_ref().map(|o| o.name().to_string()))
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ObjectCacheExt;
    use crate::digest::{DigestProvider, Hashable, HashableString};
    use assert_matches::assert_matches;

    const HOUR: Duration = Duration::from_secs(3600);

    fn limits(count: u64) -> CacheLimits {
        CacheLimits {
            max_collection_count: count,
            max_collection_size: 1024 * 1024,
            max_object_size: 1024,
            max_expiration: HOUR,
        }
    }

    fn item(i: usize) -> HashableString {
        HashableString::new(i.to_string(), DigestProvider::Sha256)
    }

    fn ready(cache: MemoryCache) -> MemoryCache {
        cache.initialize().unwrap();
        cache
    }

    #[test]
    fn test_requires_initialize() {
        let cache = MemoryCache::memory("primary");
        let key = item(1).digest();
        assert_matches!(cache.get(&key), Err(Error::NotInitialized(_)));
        assert_matches!(
            cache.add_or_update(key, Bytes::new(), HOUR),
            Err(Error::NotInitialized(_))
        );
    }

    #[test]
    fn test_add_get_exists_remove() {
        let cache = ready(MemoryCache::memory("primary"));
        let first = item(1);

        assert_eq!(cache.add_hashable(&first, HOUR).unwrap(), Admission::Stored);
        assert_eq!(cache.add_hashable(&first, HOUR).unwrap(), Admission::Updated);
        assert_eq!(cache.collection_count(), 1);

        let key = first.digest();
        assert!(cache.exists(&key).unwrap());
        assert_eq!(cache.get(&key).unwrap(), Some(Bytes::from_static(b"1")));
        assert_eq!(cache.get_verified(&key).unwrap(), Some(Bytes::from_static(b"1")));

        assert!(cache.remove(&key).unwrap());
        assert!(!cache.exists(&key).unwrap());
        assert!(cache.get(&key).unwrap().is_none());
        assert!(!cache.remove(&key).unwrap());
    }

    #[test]
    fn test_invalid_key_refused() {
        let cache = ready(MemoryCache::memory("primary"));
        let empty = DigestId::compute(b"", DigestProvider::Md5);

        assert_eq!(
            cache.add_or_update(empty, Bytes::new(), HOUR).unwrap(),
            Admission::Rejected(RejectReason::InvalidKey)
        );
        assert!(cache.accepting_objects());
        assert!(!cache.exists(&empty).unwrap());
    }

    #[test]
    fn test_oversized_object_clears_flag() {
        let cache = ready(MemoryCache::memory("primary").with_limits(limits(10)));
        let key = item(1).digest();

        let admission = cache
            .add_or_update(key, Bytes::from(vec![0u8; 2048]), HOUR)
            .unwrap();
        assert_matches!(admission, Admission::Rejected(RejectReason::ObjectTooLarge { size: 2048, .. }));
        assert!(!cache.accepting_objects());

        // Ignoring the flag fails loudly without touching accounting
        let next = item(2).digest();
        assert_matches!(
            cache.add_or_update(next, Bytes::from_static(b"2"), HOUR),
            Err(Error::NotAccepting { .. })
        );
        assert_eq!(cache.collection_count(), 0);

        // A management cycle re-opens admission
        let report = cache.manage().unwrap();
        assert!(report.accepting_objects);
        assert!(cache.accepting_objects());
    }

    #[test]
    fn test_full_without_overflow_rejects() {
        let cache = ready(MemoryCache::memory("primary").with_limits(limits(5)));
        for i in 0..5 {
            assert!(cache.add_hashable(&item(i), HOUR).unwrap().is_admitted());
        }

        let admission = cache.add_hashable(&item(5), HOUR).unwrap();
        assert_matches!(admission, Admission::Rejected(RejectReason::CollectionFull { count: 5, .. }));
        assert!(!cache.accepting_objects());
        assert_eq!(cache.collection_count(), 5);

        // Updating an existing key while full is still refused by the flag
        assert_matches!(
            cache.add_hashable(&item(0), HOUR),
            Err(Error::NotAccepting { .. })
        );
    }

    #[test]
    fn test_manage_evicts_oldest_first() {
        let cache = ready(MemoryCache::memory("primary").with_limits(limits(10)));
        let keys: Vec<DigestId> = (0..10)
            .map(|i| {
                cache.add_hashable(&item(i), HOUR).unwrap();
                std::thread::sleep(Duration::from_millis(2));
                item(i).digest()
            })
            .collect();

        let report = cache.manage().unwrap();
        assert_eq!(report.evicted, 1);
        assert_eq!(report.remaining, 9);
        assert!(!cache.exists(&keys[0]).unwrap());
        assert!(cache.exists(&keys[9]).unwrap());
    }

    #[test]
    fn test_expired_entries_absent() {
        let cache = ready(MemoryCache::memory("primary"));
        let key = item(1).digest();
        cache
            .add_or_update(key, Bytes::from_static(b"1"), Duration::from_millis(20))
            .unwrap();
        assert!(cache.exists(&key).unwrap());

        std::thread::sleep(Duration::from_millis(40));
        assert!(!cache.exists(&key).unwrap());

        let report = cache.manage().unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(cache.collection_count(), 0);
    }

    #[test]
    fn test_ttl_clamped_to_max_expiration() {
        let cache = ready(MemoryCache::memory("primary").with_limits(CacheLimits {
            max_expiration: Duration::from_millis(20),
            ..limits(10)
        }));
        let key = item(1).digest();
        cache
            .add_or_update(key, Bytes::from_static(b"1"), Duration::from_secs(99 * 3600))
            .unwrap();

        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get(&key).unwrap().is_none());
    }

    #[test]
    fn test_rollover_to_overflow() {
        let secondary: Arc<dyn ObjectCache> =
            Arc::new(MemoryCache::memory("secondary").with_limits(limits(1000)));
        let primary = MemoryCache::memory("primary")
            .with_limits(limits(50))
            .with_overflow(Arc::clone(&secondary));
        primary.initialize().unwrap();
        assert!(secondary.accepting_objects());

        for i in 0..200 {
            let admission = primary.add_hashable(&item(i), HOUR).unwrap();
            assert!(admission.is_admitted(), "item {} rejected", i);
        }

        assert!(primary.collection_count() <= 50);
        assert_eq!(
            primary.collection_count() + secondary.collection_count(),
            200
        );

        // Every item is reachable through the primary
        for i in 0..200 {
            let key = item(i).digest();
            assert!(primary.exists(&key).unwrap(), "item {} lost", i);
            assert_eq!(primary.get(&key).unwrap(), Some(Bytes::from(i.to_string())));
        }

        let stats = primary.stats();
        assert!(stats.counters.relocated > 0);
        assert!(stats.counters.overflow_hits > 0);
        assert!(stats.overflow.is_some());
    }

    #[test]
    fn test_remove_reaches_overflow() {
        let secondary: Arc<dyn ObjectCache> = Arc::new(MemoryCache::memory("secondary"));
        let primary = MemoryCache::memory("primary")
            .with_limits(limits(2))
            .with_overflow(Arc::clone(&secondary));
        primary.initialize().unwrap();

        for i in 0..4 {
            primary.add_hashable(&item(i), HOUR).unwrap();
            std::thread::sleep(Duration::from_millis(2));
        }
        let key = item(0).digest();
        assert!(secondary.exists(&key).unwrap());

        assert!(primary.remove(&key).unwrap());
        assert!(!primary.exists(&key).unwrap());
        assert!(!secondary.exists(&key).unwrap());
    }

    #[test]
    fn test_io_cadence_runs_management() {
        let cache = ready(
            MemoryCache::memory("primary")
                .with_limits(limits(100))
                .with_cadence(Duration::ZERO, 10),
        );
        let key = item(1).digest();
        cache
            .add_or_update(key, Bytes::from_static(b"1"), Duration::from_millis(5))
            .unwrap();
        std::thread::sleep(Duration::from_millis(20));

        for i in 2..20 {
            cache.add_hashable(&item(i), HOUR).unwrap();
        }
        assert!(cache.stats().counters.manage_runs >= 1);
        assert_eq!(cache.stats().counters.expired, 1);
    }

    #[test]
    fn test_json_helpers() {
        let cache = ready(MemoryCache::memory("primary"));
        let key = DigestId::compute(b"config", DigestProvider::Sha1);
        cache.add_json(key, &vec![1u32, 2, 3], HOUR).unwrap();

        let back: Option<Vec<u32>> = cache.get_json(&key).unwrap();
        assert_eq!(back, Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_iops_and_dispose() {
        let cache = ready(MemoryCache::memory("primary"));
        for i in 0..100 {
            cache.add_hashable(&item(i), HOUR).unwrap();
        }
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.total_average_iops() > 0.0);

        cache.dispose().unwrap();
        assert!(!cache.is_initialized());
        assert_matches!(cache.exists(&item(1).digest()), Err(Error::NotInitialized(_)));
        // Second dispose is a no-op
        cache.dispose().unwrap();
    }

    #[test]
    fn test_concurrent_writers() {
        let cache = Arc::new(ready(MemoryCache::memory("primary").with_limits(limits(100_000))));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..500 {
                        let value = HashableString::new(format!("{}-{}", t, i), DigestProvider::Md5);
                        cache.add_hashable(&value, HOUR).unwrap();
                        assert!(cache.exists(&value.digest()).unwrap());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.collection_count(), 4000);
    }

    #[test]
    fn test_concurrent_writers_respect_count_ceiling() {
        for round in 0..20 {
            let cache = Arc::new(ready(MemoryCache::memory("primary").with_limits(limits(100))));

            let handles: Vec<_> = (0..16)
                .map(|t| {
                    let cache = Arc::clone(&cache);
                    std::thread::spawn(move || {
                        let mut peak = 0;
                        for i in 0..50 {
                            let value = HashableString::new(
                                format!("{}-{}-{}", round, t, i),
                                DigestProvider::Md5,
                            );
                            match cache.add_hashable(&value, HOUR) {
                                Ok(_) => {}
                                Err(e) => assert!(e.is_capacity(), "unexpected error: {}", e),
                            }
                            peak = peak.max(cache.collection_count());
                        }
                        peak
                    })
                })
                .collect();

            for handle in handles {
                let peak = handle.join().unwrap();
                assert!(peak <= 100, "round {} observed {} entries", round, peak);
            }
            assert_eq!(cache.collection_count(), 100);
            assert!(!cache.accepting_objects());
        }
    }

    #[test]
    fn test_concurrent_updates_same_key() {
        let cache = Arc::new(ready(MemoryCache::memory("primary").with_limits(limits(10))));
        let key = item(0).digest();

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let value = Bytes::from(format!("{}-{}", t, i));
                        assert!(cache.add_or_update(key, value, HOUR).unwrap().is_admitted());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.collection_count(), 1);
        let last = cache.get(&key).unwrap().unwrap();
        let text = std::str::from_utf8(&last).unwrap();
        let (t, i) = text.split_once('-').unwrap();
        assert!(t.parse::<usize>().unwrap() < 8);
        assert!(i.parse::<usize>().unwrap() < 200);
        assert_eq!(cache.collection_size(), last.len() as u64);
    }

    #[test]
    fn test_rollover_keeps_entries_visible_to_readers() {
        let secondary: Arc<dyn ObjectCache> =
            Arc::new(MemoryCache::memory("secondary").with_limits(limits(10_000)));
        let primary = Arc::new(
            MemoryCache::memory("primary")
                .with_limits(limits(20))
                .with_overflow(Arc::clone(&secondary)),
        );
        primary.initialize().unwrap();

        for i in 0..20 {
            primary.add_hashable(&item(i), HOUR).unwrap();
        }

        let done = Arc::new(AtomicBool::new(false));
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let primary = Arc::clone(&primary);
                let done = Arc::clone(&done);
                std::thread::spawn(move || {
                    while !done.load(Ordering::Acquire) {
                        for i in 0..20 {
                            let key = item(i).digest();
                            assert!(primary.exists(&key).unwrap(), "item {} vanished", i);
                            assert_eq!(
                                primary.get(&key).unwrap(),
                                Some(Bytes::from(i.to_string())),
                                "item {} unreadable",
                                i
                            );
                        }
                    }
                })
            })
            .collect();

        let writers: Vec<_> = (0..4)
            .map(|t| {
                let primary = Arc::clone(&primary);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        let admission = primary.add_hashable(&item(20 + t * 250 + i), HOUR).unwrap();
                        assert!(admission.is_admitted());
                    }
                })
            })
            .collect();

        for writer in writers {
            writer.join().unwrap();
        }
        done.store(true, Ordering::Release);
        for reader in readers {
            reader.join().unwrap();
        }

        assert!(primary.collection_count() <= 20);
        assert_eq!(
            primary.collection_count() + secondary.collection_count(),
            1020
        );
        assert!(primary.stats().counters.relocated >= 1000);
    }
}
