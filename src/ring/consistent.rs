//! Consistent Hash Ring
//!
//! Maps identifiers to owning nodes by successor search over a sorted key
//! space. Inserts go to an unsorted staging list and only become visible to
//! lookups after an explicit [`ConsistentHashRing::rebuild`], so a bulk load
//! of N nodes pays for one sort instead of N.
//!
//! Phases are enforced by borrowing: `add`, `rebuild` and `remove` take
//! `&mut self` while `locate` and `contains` take `&self`. Callers that share
//! a ring across threads wrap it in a lock and take the write side for the
//! load phase.

use std::collections::HashSet;

use tracing::debug;

use crate::digest::{DigestId, DigestProvider, Hashable};
use crate::error::{Error, Result};

/// What to do when a node key is already present
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Fail the insert with [`Error::DuplicateNode`]
    #[default]
    Reject,
    /// Keep the existing node and return its key
    Ignore,
}

/// Sorted ring of (node key, node) pairs
#[derive(Debug)]
pub struct ConsistentHashRing<T> {
    provider: DigestProvider,
    policy: DuplicatePolicy,
    /// Inserted but not yet sorted into `active`
    staging: Vec<(DigestId, T)>,
    /// Sorted by key after every rebuild
    active: Vec<(DigestId, T)>,
    keys: HashSet<DigestId>,
    dirty: bool,
}

impl<T: Hashable> ConsistentHashRing<T> {
    /// Create an empty ring keyed under `provider`
    pub fn new(provider: DigestProvider) -> Self {
        Self::with_policy(provider, DuplicatePolicy::default())
    }

    pub fn with_policy(provider: DigestProvider, policy: DuplicatePolicy) -> Self {
        Self {
            provider,
            policy,
            staging: Vec::new(),
            active: Vec::new(),
            keys: HashSet::new(),
            dirty: false,
        }
    }

    /// Provider node keys are computed with
    pub fn provider(&self) -> DigestProvider {
        self.provider
    }

    /// Key a node would be stored under
    ///
    /// A plain node is keyed by the digest of its canonical bytes. A virtual
    /// node salts those bytes with the big-endian replica index.
    pub fn node_key(&self, item: &T, replica: Option<u32>) -> DigestId {
        let mut input = item.hash_input();
        if let Some(index) = replica {
            input.extend_from_slice(&index.to_be_bytes());
        }
        DigestId::compute(&input, self.provider)
    }

    /// Stage a node; it becomes visible to lookups after `rebuild()`
    pub fn add(&mut self, item: T, replica: Option<u32>) -> Result<DigestId> {
        let key = self.node_key(&item, replica);

        if !self.keys.insert(key) {
            return match self.policy {
                DuplicatePolicy::Reject => Err(Error::DuplicateNode(key.to_string())),
                DuplicatePolicy::Ignore => Ok(key),
            };
        }

        self.staging.push((key, item));
        self.dirty = true;
        Ok(key)
    }

    /// Stage `replicas` virtual nodes for one logical node
    pub fn add_virtual(&mut self, item: T, replicas: u32) -> Result<Vec<DigestId>>
    where
        T: Clone,
    {
        (0..replicas)
            .map(|index| self.add(item.clone(), Some(index)))
            .collect()
    }

    /// Merge staged nodes into the sorted lookup structure
    ///
    /// Safe to call with nothing staged.
    pub fn rebuild(&mut self) {
        if !self.dirty {
            return;
        }

        let staged = self.staging.len();
        self.active.append(&mut self.staging);
        self.active.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        self.dirty = false;

        debug!(staged, nodes = self.active.len(), "Rebuilt hash ring");
    }

    /// Remove a node by key, from either the active or the staged set
    pub fn remove(&mut self, key: &DigestId) -> Option<T> {
        if !self.keys.remove(key) {
            return None;
        }

        if let Ok(idx) = self.active.binary_search_by(|(k, _)| k.cmp(key)) {
            return Some(self.active.remove(idx).1);
        }

        let idx = self.staging.iter().position(|(k, _)| k == key)?;
        let (_, item) = self.staging.swap_remove(idx);
        if self.staging.is_empty() {
            self.dirty = false;
        }
        Some(item)
    }

    /// Exact node-key membership in the active structure
    pub fn contains(&self, key: &DigestId) -> bool {
        self.active.binary_search_by(|(k, _)| k.cmp(key)).is_ok()
    }

    /// Node owning `key`: smallest node key >= `key`, wrapping to the first
    pub fn locate(&self, key: &DigestId) -> Result<&T> {
        self.locate_entry(key).map(|(_, node)| node)
    }

    /// Like [`locate`](Self::locate) but also returns the owning node key
    pub fn locate_entry(&self, key: &DigestId) -> Result<(&DigestId, &T)> {
        if self.active.is_empty() {
            return Err(Error::EmptyRing);
        }

        let idx = self.active.partition_point(|(k, _)| k < key);
        let (node_key, node) = &self.active[idx % self.active.len()];
        Ok((node_key, node))
    }

    /// Node owning the identifier of `item`
    pub fn locate_item<H: Hashable>(&self, item: &H) -> Result<&T> {
        self.locate(&item.digest())
    }

    /// Active node keys in ring order
    pub fn keys(&self) -> impl Iterator<Item = &DigestId> {
        self.active.iter().map(|(k, _)| k)
    }

    /// Active nodes in ring order
    pub fn nodes(&self) -> impl Iterator<Item = &T> {
        self.active.iter().map(|(_, n)| n)
    }

    /// All nodes, active and staged
    pub fn node_count(&self) -> usize {
        self.active.len() + self.staging.len()
    }

    /// Nodes visible to lookups
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Nodes waiting for the next rebuild
    pub fn pending_count(&self) -> usize {
        self.staging.len()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_empty(&self) -> bool {
        self.node_count() == 0
    }
}

// =============================================================================
// Tests
// =============================================================================
