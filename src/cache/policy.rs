//! Capacity Limits and Eviction Policy
//!
//! Limits bound what a cache may hold. The policy decides which entries are
//! least fit to stay once a limit is reached, and how far below the limit a
//! relief pass should go before stopping.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::entry::EntryMeta;

/// Capacity ceilings for one cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLimits {
    /// Maximum number of entries
    pub max_collection_count: u64,
    /// Maximum total value bytes
    pub max_collection_size: u64,
    /// Maximum size of a single value
    pub max_object_size: u64,
    /// Upper bound for any entry TTL
    pub max_expiration: Duration,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            max_collection_count: 1_000_000,
            max_collection_size: 1024 * 1024 * 1024, // 1GB
            max_object_size: 1024 * 1024,            // 1MB
            max_expiration: Duration::from_secs(3600),
        }
    }
}

impl CacheLimits {
    /// Clamp a requested TTL; zero means "as long as allowed"
    pub fn clamp_ttl(&self, ttl: Duration) -> Duration {
        if ttl.is_zero() || ttl > self.max_expiration {
            self.max_expiration
        } else {
            ttl
        }
    }

    /// Whether admitting `added_count` entries and `added_size` bytes would exceed a ceiling
    pub fn would_exceed(&self, count: u64, size: u64, added_count: u64, added_size: i64) -> bool {
        let next_size = if added_size >= 0 {
            size.saturating_add(added_size as u64)
        } else {
            size.saturating_sub(added_size.unsigned_abs())
        };
        count + added_count > self.max_collection_count || next_size > self.max_collection_size
    }
}

/// Which entries go first when space must be freed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionOrder {
    /// Earliest insertion first
    #[default]
    OldestFirst,
    /// Biggest value first
    LargestFirst,
    /// Nearest expiry first
    SoonestExpiring,
}

/// Eviction policy configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvictionPolicy {
    pub order: EvictionOrder,
    /// Fraction of a ceiling at which management starts relieving pressure
    pub high_watermark: f64,
    /// Fraction of a ceiling a relief pass brings the cache down to
    pub low_watermark: f64,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self::oldest_first()
    }
}

impl EvictionPolicy {
    pub fn oldest_first() -> Self {
        Self {
            order: EvictionOrder::OldestFirst,
            high_watermark: 1.0,
            low_watermark: 0.90,
        }
    }

    pub fn largest_first() -> Self {
        Self {
            order: EvictionOrder::LargestFirst,
            ..Self::oldest_first()
        }
    }

    pub fn soonest_expiring() -> Self {
        Self {
            order: EvictionOrder::SoonestExpiring,
            ..Self::oldest_first()
        }
    }

    pub fn with_order(order: EvictionOrder) -> Self {
        Self {
            order,
            ..Self::oldest_first()
        }
    }

    /// Whether usage has reached the high watermark of either ceiling
    pub fn needs_relief(&self, limits: &CacheLimits, count: u64, size: u64) -> bool {
        count as f64 >= limits.max_collection_count as f64 * self.high_watermark
            || size as f64 >= limits.max_collection_size as f64 * self.high_watermark
    }

    /// Entry count and byte size a relief pass stops at
    pub fn relief_target(&self, limits: &CacheLimits) -> (u64, u64) {
        let count = (limits.max_collection_count as f64 * self.low_watermark) as u64;
        let size = (limits.max_collection_size as f64 * self.low_watermark) as u64;
        (
            count.min(limits.max_collection_count.saturating_sub(1)),
            size,
        )
    }

    /// Sort candidates so the least fit come first
    pub fn rank(&self, candidates: &mut [EntryMeta]) {
        match self.order {
            EvictionOrder::OldestFirst => {
                candidates.sort_by(|a, b| a.inserted_at.cmp(&b.inserted_at).then(a.key.cmp(&b.key)))
            }
            EvictionOrder::LargestFirst => {
                candidates.sort_by(|a, b| b.size.cmp(&a.size).then(a.inserted_at.cmp(&b.inserted_at)))
            }
            EvictionOrder::SoonestExpiring => {
                candidates.sort_by(|a, b| a.expires_at.cmp(&b.expires_at).then(a.inserted_at.cmp(&b.inserted_at)))
            }
        }
    }

    /// Pick victims from `candidates` until usage falls to the relief target
    ///
    /// `count` and `size` are current usage; `reserve` is room needed for an
    /// incoming value on top of the target.
    pub fn select_victims(
        &self,
        limits: &CacheLimits,
        mut candidates: Vec<EntryMeta>,
        count: u64,
        size: u64,
        reserve: u64,
    ) -> Vec<EntryMeta> {
        let (target_count, target_size) = self.relief_target(limits);
        let target_size = target_size.min(limits.max_collection_size.saturating_sub(reserve));

        self.rank(&mut candidates);

        let mut count = count;
        let mut size = size;
        candidates
            .into_iter()
            .take_while(|meta| {
                if count <= target_count && size <= target_size {
                    return false;
                }
                count = count.saturating_sub(1);
                size = size.saturating_sub(meta.size);
                true
            })
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
