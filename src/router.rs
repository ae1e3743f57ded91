//! Tier Router
//!
//! Ties placement to storage: the ring picks which named cache tier owns an
//! identifier, and the router forwards cache operations to that tier.
//! Containers received from peers are verified before their payload is
//! stored under its own identifier.
//!
//! Tier registration (`add_tier`, `remove_tier`, `rebuild`) is the load phase
//! and takes the ring's write lock; lookups share its read lock.

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::{Admission, CacheStats, ManageReport, ObjectCache, ObjectCacheExt};
use crate::digest::{DigestId, DigestProvider, Hashable, HashableString};
use crate::error::{Error, Result};
use crate::message::MessageContainer;
use crate::ring::ConsistentHashRing;

struct Tier {
    cache: Arc<dyn ObjectCache>,
    node_keys: Vec<DigestId>,
}

pub struct CacheRouter {
    provider: DigestProvider,
    ring: RwLock<ConsistentHashRing<HashableString>>,
    tiers: DashMap<String, Tier>,
}

impl CacheRouter {
    /// Empty router; `provider` keys both the ring and ingested payloads
    pub fn new(provider: DigestProvider) -> Self {
        Self {
            provider,
            ring: RwLock::new(ConsistentHashRing::new(provider)),
            tiers: DashMap::new(),
        }
    }

    pub fn provider(&self) -> DigestProvider {
        self.provider
    }

    /// Register a tier under `name` with `virtual_nodes` ring entries
    ///
    /// Zero virtual nodes places the tier once, unsalted. The tier receives
    /// traffic after the next [`rebuild`](Self::rebuild).
    pub fn add_tier(
        &self,
        name: impl Into<String>,
        cache: Arc<dyn ObjectCache>,
        virtual_nodes: u32,
    ) -> Result<()> {
        let name = name.into();
        if self.tiers.contains_key(&name) {
            return Err(Error::DuplicateNode(name));
        }

        let node = HashableString::new(name.clone(), self.provider);
        let node_keys = {
            let mut ring = self.ring.write();
            if virtual_nodes == 0 {
                vec![ring.add(node, None)?]
            } else {
                ring.add_virtual(node, virtual_nodes)?
            }
        };

        debug!(tier = %name, nodes = node_keys.len(), "Registered cache tier");
        self.tiers.insert(name, Tier { cache, node_keys });
        Ok(())
    }

    /// Unregister a tier and drop its ring entries
    pub fn remove_tier(&self, name: &str) -> Option<Arc<dyn ObjectCache>> {
        let (_, tier) = self.tiers.remove(name)?;
        let mut ring = self.ring.write();
        for key in &tier.node_keys {
            ring.remove(key);
        }
        info!(tier = %name, "Removed cache tier");
        Some(tier.cache)
    }

    /// Make staged tiers visible to lookups
    pub fn rebuild(&self) {
        self.ring.write().rebuild();
    }

    /// Registered tier names, unordered
    pub fn tier_names(&self) -> Vec<String> {
        self.tiers.iter().map(|t| t.key().clone()).collect()
    }

    pub fn tier(&self, name: &str) -> Option<Arc<dyn ObjectCache>> {
        self.tiers.get(name).map(|t| Arc::clone(&t.cache))
    }

    /// Name of the tier owning `key`
    pub fn owner_name(&self, key: &DigestId) -> Result<String> {
        Ok(self.ring.read().locate(key)?.value().to_string())
    }

    /// Tier owning `key`
    pub fn owner(&self, key: &DigestId) -> Result<Arc<dyn ObjectCache>> {
        let name = self.owner_name(key)?;
        self.tier(&name).ok_or(Error::TierNotFound(name))
    }

    pub fn store(&self, key: DigestId, value: Bytes, ttl: Duration) -> Result<Admission> {
        self.owner(&key)?.add_or_update(key, value, ttl)
    }

    /// Store a hashable item's canonical bytes under its identifier
    pub fn store_hashable<H: Hashable + ?Sized>(&self, item: &H, ttl: Duration) -> Result<Admission> {
        self.owner(&item.digest())?.add_hashable(item, ttl)
    }

    pub fn get(&self, key: &DigestId) -> Result<Option<Bytes>> {
        self.owner(key)?.get(key)
    }

    pub fn exists(&self, key: &DigestId) -> Result<bool> {
        self.owner(key)?.exists(key)
    }

    pub fn remove(&self, key: &DigestId) -> Result<bool> {
        self.owner(key)?.remove(key)
    }

    /// Verify a received container and store its payload under its identifier
    pub fn ingest(&self, frame: &[u8], ttl: Duration) -> Result<(DigestId, Admission)> {
        let container = MessageContainer::from_binary(frame, true).inspect_err(|e| {
            if e.is_rejection() {
                warn!(error = %e, len = frame.len(), "Rejected incoming container");
            }
        })?;

        let key = DigestId::compute(container.payload(), self.provider);
        let admission = self.store(key, container.payload().clone(), ttl)?;
        debug!(
            sender = %container.sender(),
            key = %key,
            ?admission,
            "Ingested container"
        );
        Ok((key, admission))
    }

    pub fn initialize_all(&self) -> Result<()> {
        for tier in self.tiers.iter() {
            tier.cache.initialize()?;
        }
        Ok(())
    }

    /// Run one management cycle on every tier
    pub fn manage_all(&self) -> Result<Vec<(String, ManageReport)>> {
        self.tiers
            .iter()
            .map(|t| Ok((t.key().clone(), t.cache.manage()?)))
            .collect()
    }

    pub fn stats(&self) -> Vec<CacheStats> {
        self.tiers.iter().map(|t| t.cache.stats()).collect()
    }

    /// Dispose every tier, returning the first failure
    pub fn dispose_all(&self) -> Result<()> {
        let mut first = None;
        for tier in self.tiers.iter() {
            if let Err(e) = tier.cache.dispose() {
                warn!(tier = %tier.key(), error = %e, "Failed to dispose tier");
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for CacheRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ring = self.ring.read();
        f.debug_struct("CacheRouter")
            .field("provider", &self.provider)
            .field("tiers", &self.tier_names())
            .field("ring_nodes", &ring.active_count())
            .field("pending", &ring.pending_count())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
