//! Cache Counters
//!
//! Running operation counters shared by every caller of a cache. All updates
//! are single atomic adds; nothing here takes a lock except the start instant.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Counters for one cache instance
#[derive(Debug)]
pub struct CacheCounters {
    reads: AtomicU64,
    writes: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    overflow_hits: AtomicU64,
    expired: AtomicU64,
    evicted: AtomicU64,
    relocated: AtomicU64,
    rejected: AtomicU64,
    manage_runs: AtomicU64,
    started: Mutex<Instant>,
}

impl Default for CacheCounters {
    fn default() -> Self {
        Self {
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            overflow_hits: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            relocated: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            manage_runs: AtomicU64::new(0),
            started: Mutex::new(Instant::now()),
        }
    }
}

impl CacheCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_overflow_hit(&self) {
        self.overflow_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expired(&self, n: u64) {
        self.expired.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_evicted(&self, n: u64) {
        self.evicted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_relocated(&self, n: u64) {
        self.relocated.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_manage_run(&self) {
        self.manage_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let total = hits + self.misses.load(Ordering::Relaxed) as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Time since the last reset
    pub fn elapsed(&self) -> Duration {
        self.started.lock().elapsed()
    }

    /// Reads plus writes per second since the last reset
    pub fn average_iops(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        (self.reads() + self.writes()) as f64 / secs
    }

    /// Zero every counter and restart the clock
    pub fn reset(&self) {
        for counter in [
            &self.reads,
            &self.writes,
            &self.hits,
            &self.misses,
            &self.overflow_hits,
            &self.expired,
            &self.evicted,
            &self.relocated,
            &self.rejected,
            &self.manage_runs,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        *self.started.lock() = Instant::now();
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            reads: self.reads(),
            writes: self.writes(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            overflow_hits: self.overflow_hits.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            relocated: self.relocated.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            manage_runs: self.manage_runs.load(Ordering::Relaxed),
            hit_ratio: self.hit_ratio(),
            average_iops: self.average_iops(),
        }
    }
}

/// Point-in-time copy of [`CacheCounters`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct CounterSnapshot {
    pub reads: u64,
    pub writes: u64,
    pub hits: u64,
    pub misses: u64,
    pub overflow_hits: u64,
    pub expired: u64,
    pub evicted: u64,
    pub relocated: u64,
    pub rejected: u64,
    pub manage_runs: u64,
    pub hit_ratio: f64,
    pub average_iops: f64,
}

/// Full statistics for one cache and its overflow chain
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub name: String,
    pub backend: &'static str,
    pub accepting_objects: bool,
    pub collection_count: u64,
    pub collection_size: u64,
    pub counters: CounterSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overflow: Option<Box<CacheStats>>,
}

// =============================================================================
// Tests
// =============================================================================
